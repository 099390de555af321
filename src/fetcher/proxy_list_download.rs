use anyhow::Result;
use async_trait::async_trait;

use crate::fetcher::extract::{PROXY_RE, extract_proxies};
use crate::fetcher::scraper::Scraper;
use crate::fetcher::{Provider, Sink};

#[derive(Debug, Clone)]
pub struct ProxyListDownload {
    url: String,
}

impl ProxyListDownload {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for ProxyListDownload {
    fn default() -> Self {
        Self::new("https://www.proxy-list.download/api/v1/get?type=http")
    }
}

#[async_trait]
impl Provider for ProxyListDownload {
    fn name(&self) -> &'static str {
        "proxy-list.download"
    }

    async fn fetch(&self, scraper: &Scraper, sink: &Sink) -> Result<()> {
        let body = scraper.get(&self.url).await?;
        sink.extend(extract_proxies(&PROXY_RE, &body));
        Ok(())
    }
}
