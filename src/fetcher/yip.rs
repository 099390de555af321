use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::fetcher::extract::{PROXY_RE, extract_proxies, find_submatch};
use crate::fetcher::scraper::Scraper;
use crate::fetcher::{Provider, Sink, fan_out, scrape_page};

static PAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?ms)<li><a href="\?action=china&page=(\d+)">\d?</a></li>"#)
        .expect("invalid 7yip regex")
});

/// 7yip.cn 免费列表，第一页的分页栏给出最大页码。
#[derive(Debug, Clone)]
pub struct Yip {
    base: String,
}

impl Yip {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }
}

impl Default for Yip {
    fn default() -> Self {
        Self::new("https://www.7yip.cn")
    }
}

#[async_trait]
impl Provider for Yip {
    fn name(&self) -> &'static str {
        "7yip.cn"
    }

    async fn fetch(&self, scraper: &Scraper, sink: &Sink) -> Result<()> {
        let first = scraper.get(&format!("{}/free/?page=1", self.base)).await?;
        let Some(last) = find_submatch(&PAGE_RE, &first)
            .iter()
            .filter_map(|page| page.parse::<u32>().ok())
            .max()
        else {
            return Ok(());
        };
        sink.extend(extract_proxies(&PROXY_RE, &first));

        let pages = (2..=last)
            .map(|page| format!("{}/free/?page={}", self.base, page))
            .collect();
        fan_out(pages, None, move |url| async move {
            scrape_page(scraper, sink, &url, &PROXY_RE).await;
        })
        .await;
        Ok(())
    }
}
