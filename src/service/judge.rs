//! 评判站点选择：对每个候选站点并发打若干请求，成功率足够高的站点里取最快的。
use std::time::{Duration, Instant};

use futures::future::join_all;
use reqwest::Client;
use tracing::{info, warn};

use crate::common::utils::USER_AGENT;
use crate::error::{PoolError, PoolResult};
use crate::model::AppConfig;
use crate::service::verifier::Echo;

/// 站点入选需要的最低成功率（严格大于）。
const MIN_SUCCESS_RATIO: f64 = 0.8;

/// 本轮检测使用的评判地址，以及评判站点看到的本机公网 IP。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judge {
    pub url: String,
    pub host_ip: String,
}

/// 单个站点的测速结果。
#[derive(Debug, Clone)]
struct SiteReport {
    site: String,
    successes: usize,
    elapsed: Duration,
    origin: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JudgeResolver {
    client: Client,
    sites: Vec<String>,
    suffix: String,
    probes: usize,
    attempts: u32,
    backoff: Duration,
    debug: bool,
}

impl JudgeResolver {
    pub fn new(config: &AppConfig) -> PoolResult<Self> {
        let client = Client::builder()
            .timeout(config.check.timeout())
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            sites: config.judge_sites(),
            suffix: config.judge.suffix.clone(),
            probes: config.judge.probes.max(1),
            attempts: config.judge.attempts.max(1),
            backoff: Duration::from_secs(config.judge.backoff),
            debug: config.debug.judges,
        })
    }

    /// 最多尝试 `attempts` 轮，每轮之间等待 `backoff`，全部失败返回 [`PoolError::NoJudge`]。
    pub async fn resolve(&self) -> PoolResult<Judge> {
        for attempt in 1..=self.attempts {
            if let Some(judge) = self.rank().await {
                info!("⚖️ 使用评判站点 {}，本机 IP {}", judge.url, judge.host_ip);
                return Ok(judge);
            }
            if attempt < self.attempts {
                warn!("无法连接任何评判站点，第 {} 次尝试失败，{:?} 后重试", attempt, self.backoff);
                tokio::time::sleep(self.backoff).await;
            }
        }
        Err(PoolError::NoJudge(self.attempts))
    }

    async fn rank(&self) -> Option<Judge> {
        let mut reports = Vec::with_capacity(self.sites.len());
        for site in &self.sites {
            reports.push(self.measure(site).await);
        }

        if self.debug {
            info!("success_tests\tresponse_time\tsite");
            for report in &reports {
                info!("{}\t{:?}\t{}", report.successes, report.elapsed, report.site);
            }
        }

        reports
            .into_iter()
            .filter(|r| r.successes as f64 / self.probes as f64 > MIN_SUCCESS_RATIO)
            .min_by_key(|r| r.elapsed)
            .and_then(|r| {
                Some(Judge {
                    url: format!("{}{}", r.site, self.suffix),
                    host_ip: r.origin?,
                })
            })
    }

    async fn measure(&self, site: &str) -> SiteReport {
        let url = format!("{}{}", site, self.suffix);
        let start = Instant::now();
        let origins = join_all((0..self.probes).map(|_| self.echo(&url))).await;
        let elapsed = start.elapsed();

        let successes = origins.iter().filter(|o| o.is_some()).count();
        let origin = origins.into_iter().flatten().next();
        SiteReport {
            site: site.to_string(),
            successes,
            elapsed,
            origin,
        }
    }

    /// 直连请求一次，返回非空的 `origin`。
    async fn echo(&self, url: &str) -> Option<String> {
        let echo: Echo = self.client.get(url).send().await.ok()?.json().await.ok()?;
        (!echo.origin.is_empty()).then_some(echo.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(sites: Vec<String>) -> AppConfig {
        let mut config = AppConfig::default();
        config.judge.sites = sites;
        config.judge.probes = 5;
        config.judge.attempts = 2;
        config.judge.backoff = 0;
        config.check.timeout = 2;
        config
    }

    async fn judge_site(origin: &str, delay: Duration) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/get"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"origin": origin, "headers": {}}))
                    .set_delay(delay),
            )
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_picks_fastest_healthy_site() {
        let slow = judge_site("5.5.5.5", Duration::from_millis(300)).await;
        let fast = judge_site("5.5.5.5", Duration::ZERO).await;
        let broken = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("nope"))
            .mount(&broken)
            .await;

        let resolver =
            JudgeResolver::new(&config(vec![slow.uri(), broken.uri(), format!("{}/", fast.uri())])).unwrap();
        let judge = resolver.resolve().await.unwrap();
        assert_eq!(judge.url, format!("{}/get?show_env", fast.uri()));
        assert_eq!(judge.host_ip, "5.5.5.5");
    }

    #[tokio::test]
    async fn test_no_healthy_site_is_an_error() {
        let broken = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&broken)
            .await;

        let resolver = JudgeResolver::new(&config(vec![broken.uri()])).unwrap();
        let result = resolver.resolve().await;
        assert!(matches!(result, Err(PoolError::NoJudge(2))));
        // 两轮，每轮 5 次
        assert_eq!(broken.received_requests().await.unwrap().len(), 10);
    }
}
