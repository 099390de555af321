use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use ::scraper::{Html, Selector};
use tracing::debug;

use crate::fetcher::extract::{find_submatch, is_proxy_address};
use crate::fetcher::scraper::Scraper;
use crate::fetcher::{Provider, Sink, fan_out};

static PAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)href\s*=\s*['"][^'"]*/?page=(\d+)['"]"#).expect("invalid proxylist.me regex")
});
static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("table tr").expect("invalid selector"));
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("invalid selector"));

/// 页数上千，限制同时在途的请求。
const IN_FLIGHT: usize = 25;

/// 表格每行：第一列 IP（包在链接里），第二列端口。
fn parse_table(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&ROW)
        .filter_map(|row| {
            let mut cells = row
                .select(&CELL)
                .map(|cell| cell.text().collect::<String>().trim().to_string());
            let ip = cells.next()?;
            let port = cells.next()?;
            let address = format!("http://{}:{}", ip, port);
            is_proxy_address(&address).then_some(address)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ProxylistMe {
    base: String,
}

impl ProxylistMe {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }
}

impl Default for ProxylistMe {
    fn default() -> Self {
        Self::new("https://proxylist.me")
    }
}

#[async_trait]
impl Provider for ProxylistMe {
    fn name(&self) -> &'static str {
        "proxylist.me"
    }

    async fn fetch(&self, scraper: &Scraper, sink: &Sink) -> Result<()> {
        let first = scraper.get(&format!("{}/", self.base)).await?;
        let Some(last) = find_submatch(&PAGE_RE, &first)
            .iter()
            .filter_map(|page| page.parse::<u32>().ok())
            .max()
        else {
            return Ok(());
        };

        let pages = (1..=last)
            .map(|page| format!("{}/?page={}", self.base, page))
            .collect();
        fan_out(pages, Some(IN_FLIGHT), move |url| async move {
            match scraper.get(&url).await {
                Ok(html) => sink.extend(parse_table(&html)),
                Err(e) => debug!("proxylist.me 请求失败 {}: {}", url, e),
            }
        })
        .await;
        Ok(())
    }
}
