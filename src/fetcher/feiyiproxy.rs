use anyhow::Result;
use async_trait::async_trait;

use crate::fetcher::extract::{PROXY_RE, extract_proxies};
use crate::fetcher::scraper::Scraper;
use crate::fetcher::{Provider, Sink};

#[derive(Debug, Clone)]
pub struct Feiyiproxy {
    url: String,
}

impl Feiyiproxy {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for Feiyiproxy {
    fn default() -> Self {
        Self::new("http://www.feiyiproxy.com/?page_id=1457")
    }
}

#[async_trait]
impl Provider for Feiyiproxy {
    fn name(&self) -> &'static str {
        "feiyiproxy.com"
    }

    async fn fetch(&self, scraper: &Scraper, sink: &Sink) -> Result<()> {
        let html = scraper.get(&self.url).await?;
        sink.extend(extract_proxies(&PROXY_RE, &html));
        Ok(())
    }
}
