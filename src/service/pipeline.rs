//! # pipeline 模块
//!
//! 采集 + 检测流程的上下文。API 和 CLI 只和 [`Pipeline`] 打交道：
//!
//! - 忙碌标记：同一时间只允许一轮，重入返回 [`PoolError::Busy`]；
//! - 进度计数：本轮已完成的检测数，`/stats` 里的 `recently_checked`；
//! - 上一轮耗时与统计缓存。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use crate::common::cache::{LastDuration, StatsCache};
use crate::db::{PoolStats, ProxyStorage};
use crate::error::{PoolError, PoolResult};
use crate::fetcher::scraper::Scraper;
use crate::fetcher::{Provider, all_providers, harvest};
use crate::model::{AppConfig, TableStats};
use crate::service::geo::GeoLocator;
use crate::service::judge::JudgeResolver;
use crate::service::scheduler::{CheckReport, Flusher, Scheduler};
use crate::service::storage::{store_candidates, try_dump};
use crate::service::verifier::{HttpProber, Prober, Validator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    HarvestAndValidate,
    ValidateOnly,
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassKind::HarvestAndValidate => f.write_str("harvest+validate"),
            PassKind::ValidateOnly => f.write_str("validate"),
        }
    }
}

/// 一轮结束后的汇总。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub kind: PassKind,
    pub harvested: usize,
    pub check: CheckReport,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Started,
    Busy,
}

/// `/status` 的返回体。
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub busy: bool,
    pub progress: u64,
    pub last_duration_ms: Option<u128>,
}

/// 持有期间忙碌标记为真，drop 时清除。
struct BusyGuard {
    flag: Arc<AtomicBool>,
}

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct Pipeline {
    store: Arc<dyn ProxyStorage>,
    config: AppConfig,
    providers: Vec<Arc<dyn Provider>>,
    prober: Arc<dyn Prober>,
    geo: OnceCell<Option<GeoLocator>>,
    busy: Arc<AtomicBool>,
    progress: Arc<AtomicU64>,
    last_duration: LastDuration,
    stats: Arc<StatsCache>,
}

impl Pipeline {
    pub fn new(store: Arc<dyn ProxyStorage>, config: AppConfig) -> Self {
        let prober = Arc::new(HttpProber::new(config.check.timeout()));
        Self {
            store,
            config,
            providers: all_providers(),
            prober,
            geo: OnceCell::new(),
            busy: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(AtomicU64::new(0)),
            last_duration: LastDuration::default(),
            stats: Arc::new(StatsCache::new()),
        }
    }

    pub fn with_providers(mut self, providers: Vec<Arc<dyn Provider>>) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = prober;
        self
    }

    /// 直接指定 GeoIP，`None` 表示不查国家也不下载数据库。
    pub fn with_geo(mut self, geo: Option<GeoLocator>) -> Self {
        self.geo = OnceCell::new_with(Some(geo));
        self
    }

    pub fn store(&self) -> &Arc<dyn ProxyStorage> {
        &self.store
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn last_duration(&self) -> Option<Duration> {
        self.last_duration.get()
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            busy: self.is_busy(),
            progress: self.progress(),
            last_duration_ms: self.last_duration().map(|d| d.as_millis()),
        }
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.store.pool_stats()
    }

    /// 连接池没有占满时重新统计，否则沿用缓存；`recently_checked` 总是当前进度。
    pub async fn refresh_stats(&self) -> TableStats {
        if !self.store.pool_stats().is_saturated() {
            match self.store.aggregate_stats().await {
                Ok(stats) => self.stats.set(stats),
                Err(e) => warn!("统计代理表失败: {}", e),
            }
        }
        self.cached_stats()
    }

    pub fn cached_stats(&self) -> TableStats {
        let mut stats = self.stats.get();
        stats.recently_checked = self.progress();
        stats
    }

    /// 后台启动一轮采集 + 检测，已有任务在跑时立即返回 [`RefreshOutcome::Busy`]。
    pub fn try_refresh(self: &Arc<Self>) -> RefreshOutcome {
        let Some(guard) = BusyGuard::acquire(&self.busy) else {
            return RefreshOutcome::Busy;
        };
        let pipeline = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = pipeline.harvest_and_validate().await {
                error!("刷新代理池失败: {}", e);
            }
        });
        RefreshOutcome::Started
    }

    pub async fn run_harvest_and_validate(&self) -> PoolResult<PassReport> {
        let _guard = BusyGuard::acquire(&self.busy).ok_or(PoolError::Busy)?;
        self.harvest_and_validate().await
    }

    pub async fn run_validate_only(&self) -> PoolResult<PassReport> {
        let _guard = BusyGuard::acquire(&self.busy).ok_or(PoolError::Busy)?;
        let begin = Instant::now();
        info!("🚀 开始检测代理");
        let check = self.validate().await?;
        Ok(self.finish(PassKind::ValidateOnly, 0, check, begin))
    }

    async fn harvest_and_validate(&self) -> PoolResult<PassReport> {
        let begin = Instant::now();
        info!("🚀 开始采集代理");
        let scraper = Scraper::new(Duration::from_secs(self.config.harvest.request_timeout))?;
        let candidates = harvest(
            self.providers.clone(),
            &scraper,
            self.config.harvest.deadline(),
            self.config.debug.providers,
        )
        .await;
        let harvested = candidates.len();

        if self.config.harvest.dump {
            try_dump(&candidates);
        }
        let geo = self.geo().await;
        store_candidates(self.store.as_ref(), candidates, geo).await?;

        let check = self.validate().await?;
        Ok(self.finish(PassKind::HarvestAndValidate, harvested, check, begin))
    }

    async fn validate(&self) -> PoolResult<CheckReport> {
        info!("========== [代理检测阶段] ==========");
        let judge = JudgeResolver::new(&self.config)?.resolve().await?;
        let records = self.store.find_active().await?;
        info!("共 {} 条活跃代理待检测", records.len());

        self.progress.store(0, Ordering::Relaxed);
        let validator = Validator::new(self.prober.clone(), judge);
        let flusher = Flusher::new(self.store.clone(), self.stats.clone());
        let mut scheduler = Scheduler::new(
            validator,
            flusher,
            self.config.check.workers,
            self.progress.clone(),
        );
        if self.config.check.progress {
            scheduler = scheduler.with_progress_bar(progress_bar(records.len() as u64));
        }
        Ok(scheduler.run(records).await)
    }

    async fn geo(&self) -> Option<&GeoLocator> {
        self.geo
            .get_or_init(|| GeoLocator::load(&self.config.geo, self.config.check.progress))
            .await
            .as_ref()
    }

    fn finish(&self, kind: PassKind, harvested: usize, check: CheckReport, begin: Instant) -> PassReport {
        let elapsed = begin.elapsed();
        self.last_duration.set(elapsed);
        info!(
            "✅ {} 完成：采集 {} 条，检测 {} 条，写库 {:?} + {}，耗时 {:?}",
            kind, harvested, check.checked, check.periodic_flushes, check.final_flush, elapsed
        );
        PassReport {
            kind,
            harvested,
            check,
            elapsed,
        }
    }
}

fn progress_bar(len: u64) -> ProgressBar {
    let bar = ProgressBar::new(len);
    match ProgressStyle::with_template(
        "Testing proxies {pos}/{len} [{bar:40}] {percent}% {per_sec}",
    ) {
        Ok(style) => bar.set_style(style),
        Err(e) => warn!("进度条模板无效: {}", e),
    }
    bar
}
