use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::fetcher::extract::{PROXY_RE, find_submatch};
use crate::fetcher::scraper::Scraper;
use crate::fetcher::{Provider, Sink, fan_out, scrape_page};

static PAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"href\s*=\s*['"]([^'"]?proxy_list_high_anonymous_[^'"]*)['"]"#)
        .expect("invalid proxz regex")
});

#[derive(Debug, Clone)]
pub struct Proxz {
    base: String,
}

impl Proxz {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }
}

impl Default for Proxz {
    fn default() -> Self {
        Self::new("http://www.proxz.com")
    }
}

#[async_trait]
impl Provider for Proxz {
    fn name(&self) -> &'static str {
        "proxz.com"
    }

    async fn fetch(&self, scraper: &Scraper, sink: &Sink) -> Result<()> {
        let index = scraper
            .get(&format!("{}/proxy_list_high_anonymous_0.html", self.base))
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
