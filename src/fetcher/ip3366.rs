use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::fetcher::extract::{PROXY_RE, extract_proxies, find_submatch};
use crate::fetcher::scraper::Scraper;
use crate::fetcher::{Provider, Sink, fan_out};

static PAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?ms)<a href="\?stype=1&page=(\d+)">"#).expect("invalid ip3366 regex")
});

/// ip3366.net 国内高匿列表。该站会拒绝带 `X-Forwarded-For` 的请求。
#[derive(Debug, Clone)]
pub struct Ip3366 {
    base: String,
}

impl Ip3366 {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    fn page_url(&self, page: u32) -> String {
        format!("{}/free/?stype=1&page={}", self.base, page)
    }
}

impl Default for Ip3366 {
    fn default() -> Self {
        Self::new("http://www.ip3366.net")
    }
}

#[async_trait]
impl Provider for Ip3366 {
    fn name(&self) -> &'static str {
        "ip3366.net"
    }

    async fn fetch(&self, scraper: &Scraper, sink: &Sink) -> Result<()> {
        let first = scraper.get_direct(&self.page_url(1)).await?;
        let Some(last) = find_submatch(&PAGE_RE, &first)
            .iter()
            .filter_map(|page| page.parse::<u32>().ok())
            .max()
        else {
            return Ok(());
        };
        sink.extend(extract_proxies(&PROXY_RE, &first));

        let pages = (2..=last).map(|page| self.page_url(page)).collect();
        fan_out(pages, None, move |url| async move {
            match scraper.get_direct(&url).await {
                Ok(html) => sink.extend(extract_proxies(&PROXY_RE, &html)),
                Err(e) => debug!("ip3366 请求失败 {}: {}", url, e),
            }
        })
        .await;
        Ok(())
    }
}
