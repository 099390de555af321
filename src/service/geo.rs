//! GeoIP 国家查询，数据库缺失时先下载一份。
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use maxminddb::{Reader, geoip2};
use reqwest::StatusCode;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::{PoolError, PoolResult};
use crate::model::app_config::GeoConfig;

#[derive(Clone)]
pub struct GeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoLocator {
    pub fn from_path<P: AsRef<Path>>(path: P) -> PoolResult<Self> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// 打开配置的数据库，不存在就先下载；任何失败都返回 `None`，国家字段留空。
    pub async fn load(config: &GeoConfig, show_progress: bool) -> Option<Self> {
        let path = Path::new(&config.mmdb_path);
        if !path.exists() {
            info!("🌍 {} 不存在，从 {} 下载", path.display(), config.download_url);
            if let Err(e) = download(&config.download_url, path, show_progress).await {
                warn!("下载 GeoIP 数据库失败: {}", e);
                // 半截文件下次会被当成已存在
                let _ = tokio::fs::remove_file(path).await;
                return None;
            }
        }
        match Self::from_path(path) {
            Ok(locator) => Some(locator),
            Err(e) => {
                warn!("打开 GeoIP 数据库 {} 失败: {}", path.display(), e);
                None
            }
        }
    }

    /// ISO 国家代码，查不到或地址不合法时返回 `None`。
    pub fn country_for(&self, ip: &str) -> Option<String> {
        let ip: IpAddr = ip.parse().ok()?;
        let country: Option<geoip2::Country> = self.reader.lookup(ip).ok()?.decode().ok()?;
        country?.country.iso_code.map(String::from)
    }
}

async fn download(url: &str, path: &Path, show_progress: bool) -> PoolResult<()> {
    let mut response = reqwest::get(url).await?;
    if response.status() != StatusCode::OK {
        return Err(PoolError::AnyhowError(anyhow::anyhow!(
            "bad status: {}",
            response.status()
        )));
    }

    let bar = if show_progress {
        ProgressBar::new(response.content_length().unwrap_or(0))
    } else {
        ProgressBar::hidden()
    };
    bar.set_style(
        ProgressStyle::with_template(
            "Downloading GeoLite2-Country.mmdb {percent}% {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        )
        .map_err(|e| PoolError::AnyhowError(e.into()))?,
    );

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = File::create(path).await?;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        bar.inc(chunk.len() as u64);
    }
    file.flush().await?;
    bar.finish();
    Ok(())
}
