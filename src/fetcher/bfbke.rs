use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::fetcher::extract::is_proxy_address;
use crate::fetcher::scraper::Scraper;
use crate::fetcher::{Provider, Sink};

/// bfbke.com 的纯文本列表，每行一个 `ip:port`。
#[derive(Debug, Clone)]
pub struct Bfbke {
    url: String,
}

impl Bfbke {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for Bfbke {
    fn default() -> Self {
        Self::new("https://www.bfbke.com/proxy.txt")
    }
}

fn parse_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.trim().split(':');
            match (parts.next(), parts.next()) {
                (Some(ip), Some(port)) if !ip.is_empty() && !port.is_empty() => {
                    Some(format!("http://{}:{}", ip, port))
                }
                _ => None,
            }
        })
        .filter(|address| is_proxy_address(address))
        .collect()
}

#[async_trait]
impl Provider for Bfbke {
    fn name(&self) -> &'static str {
        "bfbke.com"
    }

    async fn fetch(&self, scraper: &Scraper, sink: &Sink) -> Result<()> {
        let text = scraper.get(&self.url).await?;
        let list = parse_lines(&text);
        info!("BFBKE 抓取了 {} 条代理", list.len());
        sink.extend(list);
        Ok(())
    }
}
