//! 检测调度：按 worker 预算分批派发检测任务，每满一批等待全部完成，
//! 每 3 批把已检测的记录异步写回存储，不阻塞后续派发。
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use indicatif::ProgressBar;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::common::cache::StatsCache;
use crate::db::ProxyStorage;
use crate::model::ProxyRecord;
use crate::service::verifier::Validator;

/// 每隔多少个批次写一次库。
pub const BARRIERS_PER_FLUSH: usize = 3;

/// 检测完成、等待写库的记录。
#[derive(Debug, Default)]
pub struct CheckedBatch {
    rows: Mutex<Vec<ProxyRecord>>,
}

impl CheckedBatch {
    pub fn push(&self, record: ProxyRecord) {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// 取走当前所有记录，留下空批次。
    pub fn swap(&self) -> Vec<ProxyRecord> {
        std::mem::take(&mut *self.rows.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// 写库端：逐条回写，单条失败只记日志，写完刷新统计缓存。
#[derive(Clone)]
pub struct Flusher {
    store: Arc<dyn ProxyStorage>,
    stats: Arc<StatsCache>,
}

impl Flusher {
    pub fn new(store: Arc<dyn ProxyStorage>, stats: Arc<StatsCache>) -> Self {
        Self { store, stats }
    }

    pub async fn write(&self, rows: Vec<ProxyRecord>) -> usize {
        let mut written = 0;
        for row in &rows {
            match self.store.update_checked(row).await {
                Ok(()) => written += 1,
                Err(e) => warn!("写回代理 {} 失败: {}", row.address, e),
            }
        }
        match self.store.aggregate_stats().await {
            Ok(stats) => self.stats.set(stats),
            Err(e) => warn!("刷新统计失败: {}", e),
        }
        debug!("💾 写回 {}/{} 条检测结果", written, rows.len());
        written
    }
}

/// 一轮检测的调度结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub checked: usize,
    /// 每次周期性写库的记录数，按发生顺序。
    pub periodic_flushes: Vec<usize>,
    /// 最后一次写库的记录数。
    pub final_flush: usize,
}

impl CheckReport {
    pub fn flushed(&self) -> usize {
        self.periodic_flushes.iter().sum::<usize>() + self.final_flush
    }
}

pub struct Scheduler {
    validator: Arc<Validator>,
    flusher: Flusher,
    workers: usize,
    progress: Arc<AtomicU64>,
    bar: Option<ProgressBar>,
}

impl Scheduler {
    pub fn new(validator: Validator, flusher: Flusher, workers: usize, progress: Arc<AtomicU64>) -> Self {
        Self {
            validator: Arc::new(validator),
            flusher,
            workers,
            progress,
            bar: None,
        }
    }

    pub fn with_progress_bar(mut self, bar: ProgressBar) -> Self {
        self.bar = Some(bar);
        self
    }

    /// 检测全部记录；返回前所有检测与写库都已完成。
    pub async fn run(&self, records: Vec<ProxyRecord>) -> CheckReport {
        let total = records.len();
        let limit = self.workers.min(total).max(1);
        let batch = Arc::new(CheckedBatch::default());
        let mut probes = JoinSet::new();
        let mut flushes = JoinSet::new();
        let mut report = CheckReport::default();
        let mut dispatched = 0;
        let mut barriers = 0;

        for record in records {
            let validator = self.validator.clone();
            let sink = batch.clone();
            let progress = self.progress.clone();
            let bar = self.bar.clone();
            probes.spawn(async move {
                sink.push(validator.check(record).await);
                progress.fetch_add(1, Ordering::Relaxed);
                if let Some(bar) = bar {
                    bar.inc(1);
                }
            });

            dispatched += 1;
            if dispatched == limit {
                report.checked += drain(&mut probes).await;
                dispatched = 0;
                barriers += 1;
                if barriers >= BARRIERS_PER_FLUSH {
                    barriers = 0;
                    let rows = batch.swap();
                    report.periodic_flushes.push(rows.len());
                    let flusher = self.flusher.clone();
                    flushes.spawn(async move { flusher.write(rows).await });
                }
            }
        }

        report.checked += drain(&mut probes).await;
        let rows = batch.swap();
        report.final_flush = rows.len();
        let flusher = self.flusher.clone();
        flushes.spawn(async move { flusher.write(rows).await });
        while let Some(joined) = flushes.join_next().await {
            if let Err(e) = joined {
                warn!("写库任务异常退出: {}", e);
            }
        }

        if let Some(bar) = &self.bar {
            bar.finish();
        }
        report
    }
}

/// 等待所有在途检测结束，返回完成数。
async fn drain(probes: &mut JoinSet<()>) -> usize {
    let mut done = 0;
    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok(()) => done += 1,
            Err(e) => warn!("检测任务异常退出: {}", e),
        }
    }
    done
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::tests::memory_storage;
    use crate::model::{Candidate, ProxyStatus};
    use crate::service::verifier::tests::{PanickingProber, ScriptedProber, judge};

    async fn seeded(n: usize) -> Arc<dyn ProxyStorage> {
        let store = memory_storage().await;
        let rows: Vec<_> = (1..=n)
            .map(|i| (Candidate::new(format!("http://10.0.0.{}:80", i), "test"), String::new()))
            .collect();
        store.upsert_candidates(&rows).await.unwrap();
        Arc::new(store)
    }

    fn scheduler(store: Arc<dyn ProxyStorage>, workers: usize) -> (Scheduler, Arc<AtomicU64>) {
        let validator = Validator::new(Arc::new(ScriptedProber::good()), judge());
        let progress = Arc::new(AtomicU64::new(0));
        let flusher = Flusher::new(store, Arc::new(StatsCache::new()));
        (Scheduler::new(validator, flusher, workers, progress.clone()), progress)
    }

    #[tokio::test]
    async fn test_flushes_every_third_barrier() {
        let store = seeded(7).await;
        let (scheduler, progress) = scheduler(store.clone(), 2);

        let report = scheduler.run(store.find_active().await.unwrap()).await;
        // 7 条、每批 2 条：3 个完整批次触发一次写库，剩下 1 条在最后写
        assert_eq!(report.periodic_flushes, vec![6]);
        assert_eq!(report.final_flush, 1);
        assert_eq!(report.flushed(), 7);
        assert_eq!(report.checked, 7);
        assert_eq!(progress.load(Ordering::SeqCst), 7);

        let rows = store.list_all().await.unwrap();
        assert!(rows.iter().all(|r| r.check_count == 1 && r.last_status == ProxyStatus::Good));
    }

    #[tokio::test]
    async fn test_single_worker_flushes_twice_before_the_end() {
        let store = seeded(7).await;
        let (scheduler, _) = scheduler(store.clone(), 1);

        let report = scheduler.run(store.find_active().await.unwrap()).await;
        assert_eq!(report.periodic_flushes, vec![3, 3]);
        assert_eq!(report.final_flush, 1);
    }

    #[tokio::test]
    async fn test_workers_above_record_count() {
        let store = seeded(4).await;
        let (scheduler, _) = scheduler(store.clone(), 100);

        let report = scheduler.run(store.find_active().await.unwrap()).await;
        assert!(report.periodic_flushes.is_empty());
        assert_eq!(report.final_flush, 4);
    }

    #[tokio::test]
    async fn test_empty_pass() {
        let store = seeded(0).await;
        let (scheduler, _) = scheduler(store, 10);
        let report = scheduler.run(Vec::new()).await;
        assert_eq!(report, CheckReport::default());
    }

    #[tokio::test]
    async fn test_panicking_prober_rows_are_stored_as_fail() {
        let store = seeded(3).await;
        let validator = Validator::new(Arc::new(PanickingProber), judge());
        let flusher = Flusher::new(store.clone(), Arc::new(StatsCache::new()));
        let scheduler = Scheduler::new(validator, flusher, 2, Arc::new(AtomicU64::new(0)));

        let report = scheduler.run(store.find_active().await.unwrap()).await;
        assert_eq!(report.checked, 3);
        assert_eq!(report.flushed(), 3);

        let rows = store.list_all().await.unwrap();
        assert!(rows.iter().all(|r| {
            r.check_count == 1 && r.fail_count == 1 && r.last_status == ProxyStatus::Fail
        }));
    }

    #[tokio::test]
    async fn test_deleted_rows_are_never_probed_again() {
        let store = seeded(3).await;
        let mut doomed = store.find_by_address("http://10.0.0.1:80").await.unwrap().unwrap();
        doomed.losing_streak = 5;
        store.update_checked(&doomed).await.unwrap();

        let prober = Arc::new(ScriptedProber::good());
        let validator = Validator::new(prober.clone(), judge());
        let flusher = Flusher::new(store.clone(), Arc::new(StatsCache::new()));
        let scheduler = Scheduler::new(validator, flusher, 10, Arc::new(AtomicU64::new(0)));

        // 第一轮：预筛删除，不探测
        scheduler.run(store.find_active().await.unwrap()).await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);
        // 第二轮：已删除的记录不再出现在活跃集合里
        scheduler.run(store.find_active().await.unwrap()).await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 4);

        let seen = prober.seen.lock().unwrap();
        assert!(!seen.contains(&"http://10.0.0.1:80".to_string()));
        assert!(store.find_by_address("http://10.0.0.1:80").await.unwrap().unwrap().deleted);
    }
}
