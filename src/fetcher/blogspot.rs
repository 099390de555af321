use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::fetcher::extract::{PROXY_RE, find_submatch};
use crate::fetcher::scraper::Scraper;
use crate::fetcher::{Provider, Sink, fan_out, scrape_page};

static POST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r##"(?m)<a href\s*=\s*['"]([^'"]*\.\w+/\d{4}/\d{2}/[^'"#]*)['"]>"##)
        .expect("invalid blogspot regex")
});

/// 几个每天贴代理列表的 blogspot 博客：首页链到按 `/yyyy/mm/` 组织的文章。
#[derive(Debug, Clone)]
pub struct Blogspot {
    sites: Vec<String>,
}

impl Blogspot {
    pub fn new(sites: Vec<String>) -> Self {
        Self { sites }
    }
}

impl Default for Blogspot {
    fn default() -> Self {
        Self::new(
            [
                "sslproxies24.blogspot.com",
                "proxyserverlist-24.blogspot.com",
                "freeschoolproxy.blogspot.com",
                "googleproxies24.blogspot.com",
            ]
            .iter()
            .map(|domain| format!("http://{}", domain))
            .collect(),
        )
    }
}

#[async_trait]
impl Provider for Blogspot {
    fn name(&self) -> &'static str {
        "blogspot.com"
    }

    async fn fetch(&self, scraper: &Scraper, sink: &Sink) -> Result<()> {
        fan_out(self.sites.clone(), None, move |site| async move {
            let home = match scraper.get(&format!("{}/", site)).await {
                Ok(home) => home,
                Err(e) => {
                    debug!("blogspot 首页请求失败 {}: {}", site, e);
                    return;
                }
            };
            fan_out(find_submatch(&POST_RE, &home), None, move |post| async move {
                scrape_page(scraper, sink, &post, &PROXY_RE).await;
            })
            .await;
        })
        .await;
        Ok(())
    }
}
