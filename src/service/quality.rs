//! # quality 模块
//!
//! 代理信任度策略：决定一条记录是否还值得检测，以及一次检测结果如何改写计数器。
//!
//! - [`retention_verdict`]：不联网的预筛，连败或失败率过高直接软删除；
//! - [`apply_outcome`]：把一次探测结果写回记录（状态、计数、匿名性、延迟）；
//! - [`smooth_latency`]：响应时间的指数移动平均。

use std::fmt;
use std::time::Duration;

use crate::model::{ProxyRecord, ProxyStatus};
use crate::service::verifier::{ProbeError, ProbeSuccess};

/// 连续失败达到该次数即删除。
pub const MAX_LOSING_STREAK: i64 = 5;
/// 指数移动平均的新样本权重。
pub const LATENCY_ALPHA: f64 = 0.3;

/// 预筛删除的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    LosingStreak,
    /// 检测超过 5 次且失败率 ≥ 90%
    MostlyFailing,
    /// 检测超过 10 次且失败率 ≥ 80%
    OftenFailing,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Verdict::LosingStreak => "losing streak",
            Verdict::MostlyFailing => "fail ratio >= 0.9",
            Verdict::OftenFailing => "fail ratio >= 0.8",
        };
        f.write_str(text)
    }
}

/// 返回 `Some` 表示该记录应被删除且不再探测。
pub fn retention_verdict(record: &ProxyRecord) -> Option<Verdict> {
    if record.losing_streak >= MAX_LOSING_STREAK {
        return Some(Verdict::LosingStreak);
    }
    let ratio = record.fail_ratio();
    if record.check_count > 5 && ratio >= 0.90 {
        return Some(Verdict::MostlyFailing);
    }
    if record.check_count > 10 && ratio >= 0.80 {
        return Some(Verdict::OftenFailing);
    }
    None
}

/// 首个样本作为基准，之后按 [`LATENCY_ALPHA`] 混合。
pub fn smooth_latency(previous_ms: i64, sample: Duration) -> i64 {
    let sample_ms = sample.as_millis().min(i64::MAX as u128) as i64;
    if previous_ms <= 0 {
        return sample_ms.max(1);
    }
    let blended = LATENCY_ALPHA * sample_ms as f64 + (1.0 - LATENCY_ALPHA) * previous_ms as f64;
    (blended.round() as i64).max(1)
}

/// 把一次探测结果写回记录，`check_count` 由调用方在探测前自增。
pub fn apply_outcome(
    record: &mut ProxyRecord,
    outcome: Result<ProbeSuccess, ProbeError>,
    host_ip: &str,
) {
    match outcome {
        Ok(success) => {
            record.anonymous = !success.origin.contains(host_ip);
            record.last_status = ProxyStatus::Good;
            record.losing_streak = 0;
            record.success_count += 1;
            record.response_time = smooth_latency(record.response_time, success.elapsed);
        }
        Err(ProbeError::Timeout(_)) => {
            record.last_status = ProxyStatus::Timeout;
            record.timeout_count += 1;
            record.losing_streak += 1;
        }
        Err(ProbeError::Failed(_)) => {
            record.last_status = ProxyStatus::Fail;
            record.fail_count += 1;
            record.losing_streak += 1;
        }
    }
}
