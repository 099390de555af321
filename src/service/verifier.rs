//! # verifier 模块
//!
//! 通过代理访问评判站点（judge），判断代理是否可用、是否匿名。
//!
//! - [`Prober`]：一次探测的抽象，默认实现是 [`HttpProber`]；
//! - [`Validator`]：预筛 + 探测 + 回写计数器，产出检测后的记录。
//!
//! 探测中的任何异常都以 [`ProbeError`] 返回，由调用方归类为 `timeout` 或 `fail`。

use std::any::Any;
use std::error::Error as StdError;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::common::utils::USER_AGENT;
use crate::model::ProxyRecord;
use crate::service::judge::Judge;
use crate::service::quality::{apply_outcome, retention_verdict};

/// 请求超时之外再给整个探测留的余量。
pub const PROBE_GRACE: Duration = Duration::from_secs(5);

/// 出现在错误文本里即视为超时。
const TIMEOUT_SIGNATURES: [&str; 4] = [
    "Client.Timeout exceeded",
    "timed out",
    "deadline has elapsed",
    "operation timed out",
];

/// 评判站点返回的 JSON，只关心 `origin`。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Echo {
    #[serde(default)]
    pub origin: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSuccess {
    /// 评判站点看到的来源 IP，可能是逗号分隔的多个。
    pub origin: String,
    pub elapsed: Duration,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("probe timed out: {0}")]
    Timeout(String),
    #[error("probe failed: {0}")]
    Failed(String),
}

impl ProbeError {
    /// 按错误链文本归类。
    pub fn classify(err: &(dyn StdError + 'static)) -> Self {
        let text = error_chain(err);
        if TIMEOUT_SIGNATURES.iter().any(|sig| text.contains(sig)) {
            ProbeError::Timeout(text)
        } else {
            ProbeError::Failed(text)
        }
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProbeError::Timeout(error_chain(&err))
        } else {
            ProbeError::classify(&err)
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "prober panicked".to_string())
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

/// 通过 `proxy` 请求一次 judge。
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, proxy: &str, judge: &Judge) -> Result<ProbeSuccess, ProbeError>;
}

/// 用 reqwest 把候选代理当作正向代理发起 GET。
///
/// 不校验证书，固定浏览器 UA；除了请求超时外，整个探测还受 `timeout + 5s` 的上限约束。
#[derive(Debug, Clone)]
pub struct HttpProber {
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn request(&self, proxy: &str, judge: &Judge) -> Result<ProbeSuccess, ProbeError> {
        let client = Client::builder()
            .proxy(reqwest::Proxy::all(proxy)?)
            .timeout(self.timeout)
            .danger_accept_invalid_certs(true)
            .user_agent(USER_AGENT)
            .build()?;

        let start = Instant::now();
        let response = client.get(&judge.url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(ProbeError::Failed(format!("status {}", response.status())));
        }
        let body = response.text().await?;
        let elapsed = start.elapsed();

        let echo: Echo = serde_json::from_str(&body)
            .map_err(|e| ProbeError::Failed(format!("invalid judge body: {e}")))?;
        if echo.origin.is_empty() {
            return Err(ProbeError::Failed("judge body has no origin".into()));
        }
        Ok(ProbeSuccess {
            origin: echo.origin,
            elapsed,
        })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, proxy: &str, judge: &Judge) -> Result<ProbeSuccess, ProbeError> {
        let limit = self.timeout + PROBE_GRACE;
        match tokio::time::timeout(limit, self.request(proxy, judge)).await {
            Ok(outcome) => outcome,
            Err(elapsed) => Err(ProbeError::classify(&elapsed)),
        }
    }
}

/// 单条记录的检测器，一次检测轮次共用同一个 judge。
#[derive(Clone)]
pub struct Validator {
    prober: Arc<dyn Prober>,
    judge: Judge,
}

impl Validator {
    pub fn new(prober: Arc<dyn Prober>, judge: Judge) -> Self {
        Self { prober, judge }
    }

    /// 检测一条记录并返回更新后的版本，不写库。
    pub async fn check(&self, mut record: ProxyRecord) -> ProxyRecord {
        if let Some(verdict) = retention_verdict(&record) {
            debug!("🗑️ {} 被淘汰：{}", record.address, verdict);
            record.deleted = true;
            return record;
        }

        record.check_count += 1;
        record.judge = self.judge.url.clone();
        // 探测器 panic 也记为 fail，记录照常回写
        let outcome = match AssertUnwindSafe(self.prober.probe(&record.address, &self.judge))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic);
                warn!("💥 探测 {} 时异常: {}", record.address, message);
                Err(ProbeError::Failed(message))
            }
        };
        match &outcome {
            Ok(success) => trace!("🟢 {} 可用，耗时 {:?}", record.address, success.elapsed),
            Err(e) => trace!("🔴 {} {}", record.address, e),
        }
        apply_outcome(&mut record, outcome, &self.judge.host_ip);
        record
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::model::ProxyStatus;

    /// 按固定结果回答并统计调用次数的探测器。
    pub(crate) struct ScriptedProber {
        pub outcome: Result<ProbeSuccess, ProbeError>,
        pub calls: AtomicUsize,
        pub seen: Mutex<Vec<String>>,
    }

    impl ScriptedProber {
        pub(crate) fn new(outcome: Result<ProbeSuccess, ProbeError>) -> Self {
            Self {
                outcome,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn good() -> Self {
            Self::new(Ok(ProbeSuccess {
                origin: "9.9.9.9".into(),
                elapsed: Duration::from_millis(120),
            }))
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, proxy: &str, _judge: &Judge) -> Result<ProbeSuccess, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(proxy.to_string());
            self.outcome.clone()
        }
    }

    /// 每次探测都 panic 的探测器。
    pub(crate) struct PanickingProber;

    #[async_trait]
    impl Prober for PanickingProber {
        async fn probe(&self, proxy: &str, _judge: &Judge) -> Result<ProbeSuccess, ProbeError> {
            panic!("broken prober for {proxy}");
        }
    }

    pub(crate) fn judge() -> Judge {
        Judge {
            url: "http://judge.local/get?show_env".into(),
            host_ip: "5.5.5.5".into(),
        }
    }

    #[tokio::test]
    async fn test_prefilter_deletes_without_probing() {
        let prober = Arc::new(ScriptedProber::good());
        let validator = Validator::new(prober.clone(), judge());

        let mut record = ProxyRecord::new("http://1.2.3.4:80");
        record.check_count = 11;
        record.fail_count = 9;
        let checked = validator.check(record).await;

        assert!(checked.deleted);
        assert_eq!(checked.check_count, 11);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_prober_counts_as_fail() {
        let validator = Validator::new(Arc::new(PanickingProber), judge());

        let checked = validator.check(ProxyRecord::new("http://1.2.3.4:80")).await;
        assert_eq!(checked.check_count, 1);
        assert_eq!(checked.fail_count, 1);
        assert_eq!(checked.losing_streak, 1);
        assert_eq!(checked.last_status, ProxyStatus::Fail);
        assert!(!checked.deleted);
    }

    #[tokio::test]
    async fn test_recheck_counters_are_monotonic() {
        let prober = Arc::new(ScriptedProber::good());
        let validator = Validator::new(prober.clone(), judge());

        let first = validator.check(ProxyRecord::new("http://1.2.3.4:80")).await;
        let second = validator.check(first.clone()).await;

        assert_eq!(first.check_count, 1);
        assert_eq!(second.check_count, 2);
        assert_eq!(second.success_count, 2);
        assert!(second.fail_count >= first.fail_count);
        assert!(second.timeout_count >= first.timeout_count);
        assert_eq!(second.losing_streak, 0);
        assert_eq!(second.last_status, ProxyStatus::Good);
        assert_eq!(second.judge, judge().url);
    }

    #[tokio::test]
    async fn test_failures_accumulate_until_deleted() {
        let prober = Arc::new(ScriptedProber::new(Err(ProbeError::Failed("refused".into()))));
        let validator = Validator::new(prober.clone(), judge());

        let mut record = ProxyRecord::new("http://1.2.3.4:80");
        for _ in 0..5 {
            record = validator.check(record).await;
            assert!(!record.deleted);
        }
        assert_eq!(record.losing_streak, 5);
        record = validator.check(record).await;
        assert!(record.deleted);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 5);
    }

    /// 一个只会回固定响应的 HTTP 代理。
    async fn fake_proxy(status: &'static str, body: &'static str, delay: Duration) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    tokio::time::sleep(delay).await;
                    let response = format!(
                        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_http_prober_good() {
        let proxy = fake_proxy("200 OK", r#"{"origin": "9.9.9.9"}"#, Duration::ZERO).await;
        let prober = HttpProber::new(Duration::from_secs(2));
        let success = prober.probe(&proxy, &judge()).await.unwrap();
        assert_eq!(success.origin, "9.9.9.9");
    }

    #[tokio::test]
    async fn test_http_prober_failures() {
        let prober = HttpProber::new(Duration::from_secs(2));

        let proxy = fake_proxy("503 Service Unavailable", "{}", Duration::ZERO).await;
        assert!(matches!(prober.probe(&proxy, &judge()).await, Err(ProbeError::Failed(_))));

        let proxy = fake_proxy("200 OK", "<html>blocked</html>", Duration::ZERO).await;
        assert!(matches!(prober.probe(&proxy, &judge()).await, Err(ProbeError::Failed(_))));

        let proxy = fake_proxy("200 OK", r#"{"origin": ""}"#, Duration::ZERO).await;
        assert!(matches!(prober.probe(&proxy, &judge()).await, Err(ProbeError::Failed(_))));
    }

    #[tokio::test]
    async fn test_http_prober_timeout() {
        let proxy = fake_proxy("200 OK", r#"{"origin": "9.9.9.9"}"#, Duration::from_secs(3)).await;
        let prober = HttpProber::new(Duration::from_millis(200));
        assert!(matches!(prober.probe(&proxy, &judge()).await, Err(ProbeError::Timeout(_))));
    }

    #[test]
    fn test_classify_timeout_text() {
        let err = std::io::Error::other("Get http://x: net/http: Client.Timeout exceeded while awaiting headers");
        assert!(matches!(ProbeError::classify(&err), ProbeError::Timeout(_)));
        let err = std::io::Error::other("connection refused");
        assert!(matches!(ProbeError::classify(&err), ProbeError::Failed(_)));
    }

    #[test]
    fn test_echo_without_origin() {
        let echo: Echo = serde_json::from_str(r#"{"headers": {}}"#).unwrap();
        assert!(echo.origin.is_empty());
    }
}
