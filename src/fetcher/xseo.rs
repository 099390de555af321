use anyhow::Result;
use async_trait::async_trait;

use crate::fetcher::extract::{IP_PORT_RE, extract_proxies};
use crate::fetcher::scraper::Scraper;
use crate::fetcher::{Provider, Sink};

#[derive(Debug, Clone)]
pub struct Xseo {
    url: String,
}

impl Xseo {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for Xseo {
    fn default() -> Self {
        Self::new("http://xseo.in/freeproxy")
    }
}

#[async_trait]
impl Provider for Xseo {
    fn name(&self) -> &'static str {
        "xseo.in"
    }

    async fn fetch(&self, scraper: &Scraper, sink: &Sink) -> Result<()> {
        let html = scraper.get(&self.url).await?;
        sink.extend(extract_proxies(&IP_PORT_RE, &html));
        Ok(())
    }
}
