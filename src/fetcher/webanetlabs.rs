use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::fetcher::extract::{PROXY_RE, find_submatch};
use crate::fetcher::scraper::Scraper;
use crate::fetcher::{Provider, Sink, fan_out, scrape_page};

static LIST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)href\s*=\s*['"]([^'"]*proxylist_at_[^'"]*)['"]"#)
        .expect("invalid webanetlabs regex")
});

/// webanetlabs.net：`/publ/24` 列出按日期命名的 txt，如 `proxylist_at_02.11.2019.txt`。
#[derive(Debug, Clone)]
pub struct Webanetlabs {
    base: String,
}

impl Webanetlabs {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }
}

impl Default for Webanetlabs {
    fn default() -> Self {
        Self::new("https://webanetlabs.net")
    }
}

#[async_trait]
impl Provider for Webanetlabs {
    fn name(&self) -> &'static str {
        "webanetlabs.net"
    }

    async fn fetch(&self, scraper: &Scraper, sink: &Sink) -> Result<()> {
        let body = scraper.get(&format!("{}/publ/24", self.base)).await?;
        let pages = find_submatch(&LIST_RE, &body)
            .into_iter()
            .map(|href| format!("{}{}", self.base, href))
            .collect();
        fan_out(pages, None, move |url| async move {
            scrape_page(scraper, sink, &url, &PROXY_RE).await;
        })
        .await;
        Ok(())
    }
}
