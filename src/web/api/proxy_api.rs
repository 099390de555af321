use serde::Deserialize;
use salvo::prelude::*;

use crate::db::PoolStats;
use crate::error::PoolResult;
use crate::model::{ProxyFilter, ProxyRecord, TableStats};
use crate::service::RefreshOutcome;
use crate::service::pipeline::PipelineStatus;
use crate::web::hoops::cache::{STATS_KEY, cache_stats};
use crate::web::pipeline_of;

#[derive(Debug, Deserialize)]
struct ProxyLookup {
    proxy: String,
}

/// `?anon` 只看是否出现，`?country=us` 不区分大小写。
fn filter_of(req: &Request) -> ProxyFilter {
    ProxyFilter {
        country: req.query::<String>("country"),
        anonymous: req.queries().contains_key("anon"),
    }
}

/// 表单、JSON 或查询串里的 `proxy`。
async fn lookup_of(req: &mut Request) -> Option<String> {
    if let Some(proxy) = req.form::<String>("proxy").await {
        return Some(proxy);
    }
    if let Ok(lookup) = req.parse_json::<ProxyLookup>().await {
        return Some(lookup.proxy);
    }
    req.query::<String>("proxy")
}

async fn random_proxies(depot: &Depot, filter: ProxyFilter, num: i64) -> PoolResult<Vec<ProxyRecord>> {
    let pipeline = pipeline_of(depot)?;
    Ok(pipeline.store().query_random(&filter, num.max(0)).await?)
}

#[handler]
async fn get_one(req: &mut Request, depot: &mut Depot) -> PoolResult<Json<Option<ProxyRecord>>> {
    let proxies = random_proxies(depot, filter_of(req), 1).await?;
    Ok(Json(proxies.into_iter().next()))
}

#[handler]
async fn get_n(req: &mut Request, depot: &mut Depot) -> PoolResult<Json<Vec<ProxyRecord>>> {
    let num = req.param::<i64>("n").unwrap_or(0);
    Ok(Json(random_proxies(depot, filter_of(req), num).await?))
}

#[handler]
async fn get_all(depot: &mut Depot) -> PoolResult<Json<Vec<ProxyRecord>>> {
    let pipeline = pipeline_of(depot)?;
    Ok(Json(pipeline.store().list_all().await?))
}

#[handler]
async fn find(req: &mut Request, depot: &mut Depot, res: &mut Response) -> PoolResult<()> {
    let Some(proxy) = lookup_of(req).await else {
        res.status_code(StatusCode::BAD_REQUEST);
        res.render("missing proxy");
        return Ok(());
    };
    let pipeline = pipeline_of(depot)?;
    let found = pipeline.store().find_by_address(proxy.trim()).await?;
    res.render(Json(found.filter(|p| !p.deleted)));
    Ok(())
}

#[handler]
async fn delete(req: &mut Request, depot: &mut Depot, res: &mut Response) -> PoolResult<()> {
    let Some(proxy) = lookup_of(req).await else {
        res.status_code(StatusCode::BAD_REQUEST);
        res.render("missing proxy");
        return Ok(());
    };
    let pipeline = pipeline_of(depot)?;
    let affected = pipeline.store().delete_by_address(proxy.trim()).await?;
    res.render(affected.to_string());
    Ok(())
}

#[handler]
async fn stats(depot: &mut Depot) -> PoolResult<Json<TableStats>> {
    if let Ok(cached) = depot.get::<TableStats>(STATS_KEY) {
        return Ok(Json(*cached));
    }
    Ok(Json(pipeline_of(depot)?.cached_stats()))
}

#[handler]
async fn db_stats(depot: &mut Depot) -> PoolResult<Json<PoolStats>> {
    Ok(Json(pipeline_of(depot)?.pool_stats()))
}

#[handler]
async fn refresh(depot: &mut Depot, res: &mut Response) -> PoolResult<()> {
    match pipeline_of(depot)?.try_refresh() {
        RefreshOutcome::Started => res.render("ok"),
        RefreshOutcome::Busy => {
            res.status_code(StatusCode::CONFLICT);
            res.render("busy");
        }
    }
    Ok(())
}

#[handler]
async fn busy(depot: &mut Depot) -> PoolResult<String> {
    Ok(pipeline_of(depot)?.is_busy().to_string())
}

#[handler]
async fn status(depot: &mut Depot) -> PoolResult<Json<PipelineStatus>> {
    Ok(Json(pipeline_of(depot)?.status()))
}

pub fn proxy_router() -> Router {
    Router::new()
        .push(Router::with_path("get").get(get_one))
        .push(Router::with_path("get/{n}").get(get_n))
        .push(Router::with_path("getall").get(get_all))
        .push(Router::with_path("find").post(find))
        .push(Router::with_path("delete").post(delete))
        .push(Router::with_path("stats").hoop(cache_stats).get(stats))
        .push(Router::with_path("db").get(db_stats))
        .push(Router::with_path("refresh").get(refresh))
        .push(Router::with_path("busy").get(busy))
        .push(Router::with_path("status").get(status))
}
