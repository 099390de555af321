use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::fetcher::extract::{PROXY_RE, find_submatch};
use crate::fetcher::scraper::Scraper;
use crate::fetcher::{Provider, Sink, fan_out, scrape_page};

static PAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)href\s*=\s*['"]([^'"]?free-[^'"]*)['"]"#).expect("invalid my-proxy regex")
});

#[derive(Debug, Clone)]
pub struct MyProxy {
    base: String,
}

impl MyProxy {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }
}

impl Default for MyProxy {
    fn default() -> Self {
        Self::new("https://www.my-proxy.com")
    }
}

#[async_trait]
impl Provider for MyProxy {
    fn name(&self) -> &'static str {
        "my-proxy.com"
    }

    async fn fetch(&self, scraper: &Scraper, sink: &Sink) -> Result<()> {
        let index = scraper
            .get(&format!("{}/free-proxy-list.html", self.base))
            .await?;
        let pages = find_submatch(&PAGE_RE, &index)
            .into_iter()
            .map(|href| format!("{}/{}", self.base, href.trim_start_matches('/')))
            .collect();
        fan_out(pages, None, move |url| async move {
            scrape_page(scraper, sink, &url, &PROXY_RE).await;
        })
        .await;
        Ok(())
    }
}
