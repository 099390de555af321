use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::model::TableStats;

/// Last known aggregate stats of the proxy table.
///
/// Refreshed by whoever holds the store (after every flush, and from the
/// `/stats` hoop when the pool has spare connections); readers never hit the
/// database.
#[derive(Debug, Default)]
pub struct StatsCache {
    stats: RwLock<TableStats>,
}

impl StatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> TableStats {
        *self.stats.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, stats: TableStats) {
        *self.stats.write().unwrap_or_else(PoisonError::into_inner) = stats;
    }
}

/// Wall-clock length of the most recent pass.
#[derive(Debug, Default)]
pub struct LastDuration {
    value: RwLock<Option<Duration>>,
}

impl LastDuration {
    pub fn get(&self) -> Option<Duration> {
        *self.value.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, elapsed: Duration) {
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = Some(elapsed);
    }
}
