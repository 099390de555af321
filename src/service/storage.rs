//! 采集结果入库：补全国家，按地址唯一写入，可选地把原始结果落一份文件。
use std::io::Write;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::db::ProxyStorage;
use crate::error::PoolResult;
use crate::fetcher::extract::is_proxy_address;
use crate::model::Candidate;
use crate::service::geo::GeoLocator;

/// 每个事务写入的候选数量。
const UPSERT_CHUNK: usize = 500;

/// 给候选补上国家代码，不是 `http://IPv4:端口` 形式的直接丢弃。
pub fn locate(candidates: Vec<Candidate>, geo: Option<&GeoLocator>) -> Vec<(Candidate, String)> {
    candidates
        .into_iter()
        .filter(|candidate| is_proxy_address(&candidate.address))
        .map(|candidate| {
            let country = geo.and_then(|g| g.country_for(candidate.host())).unwrap_or_default();
            (candidate, country)
        })
        .collect()
}

/// 写入全部候选，返回写入行数（重复地址也计数）。
pub async fn store_candidates(
    store: &dyn ProxyStorage,
    candidates: Vec<Candidate>,
    geo: Option<&GeoLocator>,
) -> PoolResult<u64> {
    let rows = locate(candidates, geo);
    let mut written = 0;
    for chunk in rows.chunks(UPSERT_CHUNK) {
        written += store.upsert_candidates(chunk).await?;
    }
    info!("💾 入库 {} 条候选代理", written);
    Ok(written)
}

/// 把候选写到临时目录下的 `proxypool-dump.*.txt`，每行 `地址\t来源`。
pub fn dump_candidates(candidates: &[Candidate]) -> PoolResult<PathBuf> {
    let file = tempfile::Builder::new()
        .prefix("proxypool-dump.")
        .suffix(".txt")
        .tempfile()?;
    let (mut file, path) = file.keep().map_err(|e| e.error)?;
    for candidate in candidates {
        writeln!(file, "{}", candidate)?;
    }
    info!("📝 原始采集结果已写入 {}", path.display());
    Ok(path)
}

/// [`dump_candidates`] 的宽松版本，失败只记日志。
pub fn try_dump(candidates: &[Candidate]) {
    if let Err(e) = dump_candidates(candidates) {
        warn!("写出采集结果失败: {}", e);
    }
}
