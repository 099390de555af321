use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::fetcher::extract::{PROXY_RE, find_all_template};
use crate::fetcher::scraper::Scraper;
use crate::fetcher::{Provider, Sink, fan_out, scrape_page};

static LOAD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)href\s*=\s*['"](?P<type>[^'"]*)/(?P<id>\d{10})[^'"]*['"]"#)
        .expect("invalid freeproxylists regex")
});

/// freeproxylists.com：列表页里的链接指向 `load_<type>_<id>.html`，真正的 IP 在那里。
#[derive(Debug, Clone)]
pub struct Freeproxylists {
    base: String,
}

impl Freeproxylists {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }
}

impl Default for Freeproxylists {
    fn default() -> Self {
        Self::new("http://www.freeproxylists.com")
    }
}

#[async_trait]
impl Provider for Freeproxylists {
    fn name(&self) -> &'static str {
        "freeproxylists.com"
    }

    async fn fetch(&self, scraper: &Scraper, sink: &Sink) -> Result<()> {
        let template = format!("{}/load_${{type}}_${{id}}.html\n", self.base);
        for seed in ["anonymous.html", "elite.html"] {
            let body = match scraper.get(&format!("{}/{}", self.base, seed)).await {
                Ok(body) => body,
                Err(_) => continue,
            };
            let pages = find_all_template(&LOAD_RE, &body, &template);
            fan_out(pages, None, move |url| async move {
                scrape_page(scraper, sink, &url, &PROXY_RE).await;
            })
            .await;
        }
        Ok(())
    }
}
