use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::fetcher::extract::{find_submatch, is_proxy_address};
use crate::fetcher::scraper::Scraper;
use crate::fetcher::{Provider, Sink, fan_out};

static BASE64_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Proxy\('([\w=]+)'\)").expect("invalid proxy-list regex"));

const PAGES: u32 = 10;

/// proxy-list.org：地址以 `Proxy('MS4yLjMuNDo4MA==')` 的 base64 形式嵌在页面脚本里。
#[derive(Debug, Clone)]
pub struct ProxyList {
    base: String,
}

impl ProxyList {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }
}

impl Default for ProxyList {
    fn default() -> Self {
        Self::new("http://proxy-list.org")
    }
}

fn decode(encoded: &str) -> Option<String> {
    let bytes = STANDARD.decode(encoded).ok()?;
    let address = format!("http://{}", String::from_utf8(bytes).ok()?.trim());
    is_proxy_address(&address).then_some(address)
}

#[async_trait]
impl Provider for ProxyList {
    fn name(&self) -> &'static str {
        "proxy-list.org"
    }

    async fn fetch(&self, scraper: &Scraper, sink: &Sink) -> Result<()> {
        let pages = (1..=PAGES)
            .map(|page| format!("{}/english/index.php?p={}", self.base, page))
            .collect();
        fan_out(pages, None, move |url| async move {
            match scraper.get(&url).await {
                Ok(html) => sink.extend(
                    find_submatch(&BASE64_RE, &html)
                        .iter()
                        .filter_map(|encoded| decode(encoded)),
                ),
                Err(e) => debug!("proxy-list.org 请求失败 {}: {}", url, e),
            }
        })
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_decode() {
        assert_eq!(decode("MS4yLjMuNDo4MA==").as_deref(), Some("http://1.2.3.4:80"));
        assert_eq!(decode("bm90LWEtcHJveHk="), None);
        assert_eq!(decode("***"), None);
    }

    #[tokio::test]
    async fn test_decodes_every_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/english/index.php"))
            .and(query_param("p", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<li class=\"proxy\"><script>Proxy('MS4yLjMuNDo4MA==')</script></li>",
            ))
            .mount(&server)
            .await;

        let scraper = Scraper::new(Duration::from_secs(2)).unwrap();
        let provider = ProxyList::new(server.uri());
        let sink = Sink::new(provider.name());
        provider.fetch(&scraper, &sink).await.unwrap();

        let found = sink.take();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].address, "http://1.2.3.4:80");
    }
}
