use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::fetcher::extract::{PROXY_RE, extract_proxies, find_submatch, is_proxy_address};
use crate::fetcher::scraper::Scraper;
use crate::fetcher::{Provider, Sink, fan_out};

static PAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)<a href="/free/inha/(\d+)/">"#).expect("invalid kuaidaili regex"));
static FPS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"const fpsList = (.*);"#).expect("invalid kuaidaili regex"));

/// 同时在途的分页请求上限，快代理对并发很敏感。
const IN_FLIGHT: usize = 25;

/// `fpsList` 数组里的一条。
#[derive(Debug, Deserialize)]
struct FpsEntry {
    ip: String,
    port: serde_json::Value,
}

impl FpsEntry {
    fn address(&self) -> Option<String> {
        let port = match &self.port {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let address = format!("http://{}:{}", self.ip.trim(), port.trim());
        is_proxy_address(&address).then_some(address)
    }
}

/// 从快代理一页 HTML 中取出代理。
///
/// 新版页面把数据放在脚本的 `const fpsList = [...];` 里，
/// 旧版是普通表格，解析不到 JSON 时退回通用正则。
fn parse_page(html: &str) -> Vec<String> {
    let embedded = FPS_RE
        .captures(html)
        .and_then(|cap| cap.get(1))
        .and_then(|json| serde_json::from_str::<Vec<FpsEntry>>(json.as_str()).ok());
    match embedded {
        Some(entries) => entries.iter().filter_map(FpsEntry::address).collect(),
        None => extract_proxies(&PROXY_RE, html),
    }
}

/// 「快代理」高匿免费列表 `/free/inha/<n>/`，首页分页链接给出最大页码。
#[derive(Debug, Clone)]
pub struct Kuaidaili {
    base: String,
}

impl Kuaidaili {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }
}

impl Default for Kuaidaili {
    fn default() -> Self {
        Self::new("https://www.kuaidaili.com")
    }
}

#[async_trait]
impl Provider for Kuaidaili {
    fn name(&self) -> &'static str {
        "kuaidaili.com"
    }

    async fn fetch(&self, scraper: &Scraper, sink: &Sink) -> Result<()> {
        let first = scraper.get(&format!("{}/free/inha/1/", self.base)).await?;
        sink.extend(parse_page(&first));

        let last = find_submatch(&PAGE_RE, &first)
            .iter()
            .filter_map(|page| page.parse::<u32>().ok())
            .max()
            .unwrap_or(1);
        info!("快代理共 {} 页", last);

        let pages = (2..=last)
            .map(|page| format!("{}/free/inha/{}/", self.base, page))
            .collect();
        fan_out(pages, Some(IN_FLIGHT), move |url| async move {
            match scraper.get(&url).await {
                Ok(html) => sink.extend(parse_page(&html)),
                Err(e) => debug!("快代理请求失败 {}: {}", url, e),
            }
        })
        .await;
        debug!("快代理累计 {} 条", sink.len());
        Ok(())
    }
}
