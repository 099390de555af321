pub mod api;
pub mod hoops;

use std::sync::Arc;

use anyhow::anyhow;
use salvo::prelude::*;
use tracing::info;

use crate::error::{PoolError, PoolResult};
use crate::service::Pipeline;
use crate::web::api::proxy_api::proxy_router;
use crate::web::hoops::access_log::access_log;

/// 把共享的 [`Pipeline`] 放进每个请求的 depot。
struct InjectPipeline(Arc<Pipeline>);

#[async_trait]
impl Handler for InjectPipeline {
    async fn handle(&self, _req: &mut Request, depot: &mut Depot, _res: &mut Response, _ctrl: &mut FlowCtrl) {
        depot.inject(self.0.clone());
    }
}

pub fn pipeline_of(depot: &Depot) -> PoolResult<Arc<Pipeline>> {
    depot
        .obtain::<Arc<Pipeline>>()
        .cloned()
        .map_err(|_| PoolError::AnyhowError(anyhow!("pipeline is not injected")))
}

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .hoop(access_log)
        .hoop(InjectPipeline(pipeline))
        .push(proxy_router())
}

/// 监听 `addr` 直到进程退出。
pub async fn serve(pipeline: Arc<Pipeline>, addr: &str) -> PoolResult<()> {
    let acceptor = TcpListener::new(addr.to_string())
        .try_bind()
        .await
        .map_err(|e| PoolError::AnyhowError(anyhow!("failed to bind {}: {}", addr, e)))?;
    info!("🌐 API 监听在 http://{}", addr);
    Server::new(acceptor).serve(router(pipeline)).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use salvo::test::{ResponseExt, TestClient};

    use crate::db::ProxyStorage;
    use crate::db::sqlite::tests::memory_storage;
    use crate::model::{AppConfig, Candidate, ProxyStatus, TableStats};

    const BASE: &str = "http://127.0.0.1:4444";

    async fn service() -> (Service, Arc<Pipeline>) {
        let store = memory_storage().await;
        store
            .upsert_candidates(&[
                (Candidate::new("http://1.1.1.1:80", "a"), "US".to_string()),
                (Candidate::new("http://2.2.2.2:80", "b"), "DE".to_string()),
                (Candidate::new("http://3.3.3.3:80", "b"), "US".to_string()),
            ])
            .await
            .unwrap();
        for (address, anonymous) in [("http://1.1.1.1:80", true), ("http://2.2.2.2:80", false)] {
            let mut record = store.find_by_address(address).await.unwrap().unwrap();
            record.check_count = 1;
            record.success_count = 1;
            record.last_status = ProxyStatus::Good;
            record.anonymous = anonymous;
            store.update_checked(&record).await.unwrap();
        }

        let mut config = AppConfig::default();
        // 测试里不允许真的连出去
        config.judge.sites = vec!["http://127.0.0.1:9".to_string()];
        config.judge.attempts = 1;
        config.judge.backoff = 0;
        let pipeline = Arc::new(
            Pipeline::new(Arc::new(store), config)
                .with_providers(Vec::new())
                .with_geo(None),
        );
        (Service::new(router(pipeline.clone())), pipeline)
    }

    #[tokio::test]
    async fn test_get_filters() {
        let (service, _) = service().await;

        let one: serde_json::Value = TestClient::get(format!("{BASE}/get?anon"))
            .send(&service)
            .await
            .take_json()
            .await
            .unwrap();
        assert_eq!(one["proxy"], "http://1.1.1.1:80");
        assert_eq!(one["anonymous"], true);

        let body = TestClient::get(format!("{BASE}/get/10?country=de"))
            .send(&service)
            .await
            .take_string()
            .await
            .unwrap();
        let list: Vec<serde_json::Value> = serde_json::from_str(&body).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["proxy"], "http://2.2.2.2:80");
        assert_eq!(list[0]["country"], "DE");

        let none = TestClient::get(format!("{BASE}/get?anon&country=DE"))
            .send(&service)
            .await
            .take_string()
            .await
            .unwrap();
        assert_eq!(none.trim(), "null");
    }

    #[tokio::test]
    async fn test_getall_find_delete() {
        let (service, _) = service().await;

        let all: Vec<serde_json::Value> = TestClient::get(format!("{BASE}/getall"))
            .send(&service)
            .await
            .take_json()
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let found: serde_json::Value = TestClient::post(format!("{BASE}/find"))
            .json(&serde_json::json!({"proxy": "http://3.3.3.3:80"}))
            .send(&service)
            .await
            .take_json()
            .await
            .unwrap();
        assert_eq!(found["source"], "b");

        let mut res = TestClient::post(format!("{BASE}/find")).send(&service).await;
        assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));
        assert_eq!(res.take_string().await.unwrap(), "missing proxy");

        for expected in ["1", "0"] {
            let affected = TestClient::post(format!("{BASE}/delete"))
                .json(&serde_json::json!({"proxy": "http://3.3.3.3:80"}))
                .send(&service)
                .await
                .take_string()
                .await
                .unwrap();
            assert_eq!(affected, expected);
        }
    }

    #[tokio::test]
    async fn test_stats_and_db() {
        let (service, _) = service().await;

        let stats: TableStats = TestClient::get(format!("{BASE}/stats"))
            .send(&service)
            .await
            .take_json()
            .await
            .unwrap();
        assert_eq!((stats.anon, stats.good, stats.total), (1, 2, 3));

        let db: serde_json::Value = TestClient::get(format!("{BASE}/db"))
            .send(&service)
            .await
            .take_json()
            .await
            .unwrap();
        assert_eq!(db["max_connections"], 1);
    }

    #[tokio::test]
    async fn test_refresh_busy_and_status() {
        let (service, pipeline) = service().await;

        let busy = TestClient::get(format!("{BASE}/busy"))
            .send(&service)
            .await
            .take_string()
            .await
            .unwrap();
        assert_eq!(busy, "false");

        let mut res = TestClient::get(format!("{BASE}/refresh")).send(&service).await;
        assert_eq!(res.status_code.unwrap_or(StatusCode::OK), StatusCode::OK);
        assert_eq!(res.take_string().await.unwrap(), "ok");

        // 第一轮还没结束时再次刷新
        if pipeline.is_busy() {
            let mut res = TestClient::get(format!("{BASE}/refresh")).send(&service).await;
            assert_eq!(res.status_code, Some(StatusCode::CONFLICT));
            assert_eq!(res.take_string().await.unwrap(), "busy");
        }

        let status: serde_json::Value = TestClient::get(format!("{BASE}/status"))
            .send(&service)
            .await
            .take_json()
            .await
            .unwrap();
        assert!(status.get("busy").is_some());
        assert!(status.get("progress").is_some());
    }
}
