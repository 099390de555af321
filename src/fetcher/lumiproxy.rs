use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::fetcher::extract::is_proxy_address;
use crate::fetcher::scraper::Scraper;
use crate::fetcher::{Provider, Sink};

const PAGES: u32 = 5;

#[derive(Debug, Clone)]
pub struct LumiProxy {
    base: String,
}

impl LumiProxy {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }
}

impl Default for LumiProxy {
    fn default() -> Self {
        Self::new("https://api.lumiproxy.com")
    }
}

/// `data.list[]` 里的 `ip`/`port`，端口可能是数字也可能是字符串。
fn parse_list(data: &Value) -> anyhow::Result<Vec<String>> {
    let list = data
        .get("data")
        .and_then(|d| d.get("list"))
        .and_then(|l| l.as_array())
        .ok_or(anyhow!("json 转换失败"))?;

    let mut proxies = Vec::new();
    for o in list {
        let ip = o.get("ip").and_then(|d| d.as_str()).ok_or(anyhow!("ip 转换失败"))?;
        let port = match o.get("port") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(anyhow!("port 转换失败")),
        };
        let address = format!("http://{}:{}", ip, port);
        if is_proxy_address(&address) {
            proxies.push(address);
        }
    }
    Ok(proxies)
}

#[async_trait]
impl Provider for LumiProxy {
    fn name(&self) -> &'static str {
        "lumiproxy.com"
    }

    async fn fetch(&self, scraper: &Scraper, sink: &Sink) -> anyhow::Result<()> {
        for page in 1..=PAGES {
            info!("LumiProxy 正在请求第 {} 页数据", page);
            let url = format!(
                "{}/web_v1/free-proxy/list?page_size=60&page={}&protocol=1&anonymity=1&language=zh-hans",
                self.base, page
            );
            let data = scraper.get_json::<Value>(&url).await?;
            let proxies = parse_list(&data)?;
            if proxies.is_empty() {
                break;
            }
            sink.extend(proxies);
        }
        Ok(())
    }
}
