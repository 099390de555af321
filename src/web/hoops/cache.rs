use salvo::prelude::*;

use crate::web::pipeline_of;

/// Depot key of the stats prepared for `/stats`.
pub const STATS_KEY: &str = "stats";

/// 连接池空闲时重新统计，否则用上次缓存的结果。
#[handler]
pub async fn cache_stats(depot: &mut Depot) {
    if let Ok(pipeline) = pipeline_of(depot) {
        let stats = pipeline.refresh_stats().await;
        depot.insert(STATS_KEY, stats);
    }
}
