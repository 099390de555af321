use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::fetcher::extract::{find_submatch, is_proxy_address};
use crate::fetcher::scraper::Scraper;
use crate::fetcher::{Provider, Sink, fan_out};

static ARCHIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)href\s*=\s*['"](/archive/\d{4}-\d{2}-\d{2})['"]"#)
        .expect("invalid checkerproxy regex")
});

/// `/api/archive/<date>` 返回的数组元素，只关心 `addr`。
#[derive(Debug, Deserialize)]
struct ArchiveEntry {
    addr: String,
}

/// checkerproxy.net：首页列出每日归档，每个归档有对应的 JSON 接口。
#[derive(Debug, Clone)]
pub struct Checkerproxy {
    base: String,
}

impl Checkerproxy {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }
}

impl Default for Checkerproxy {
    fn default() -> Self {
        Self::new("https://checkerproxy.net")
    }
}

#[async_trait]
impl Provider for Checkerproxy {
    fn name(&self) -> &'static str {
        "checkerproxy.net"
    }

    async fn fetch(&self, scraper: &Scraper, sink: &Sink) -> Result<()> {
        let body = scraper.get(&format!("{}/", self.base)).await?;
        let archives = find_submatch(&ARCHIVE_RE, &body)
            .into_iter()
            .map(|endpoint| format!("{}/api{}", self.base, endpoint))
            .collect();
        fan_out(archives, None, move |url| async move {
            match scraper.get_json::<Vec<ArchiveEntry>>(&url).await {
                Ok(entries) => sink.extend(
                    entries
                        .into_iter()
                        .map(|entry| format!("http://{}", entry.addr.trim()))
                        .filter(|address| is_proxy_address(address)),
                ),
                Err(e) => debug!("checkerproxy 归档解析失败 {}: {}", url, e),
            }
        })
        .await;
        Ok(())
    }
}
