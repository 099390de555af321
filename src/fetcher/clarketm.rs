use anyhow::Result;
use async_trait::async_trait;

use crate::fetcher::extract::{PROXY_RE, extract_proxies};
use crate::fetcher::scraper::Scraper;
use crate::fetcher::{Provider, Sink};

/// GitHub 上 clarketm/proxy-list 的原始列表，每行 `ip:port 国家-匿名度-...`。
#[derive(Debug, Clone)]
pub struct Clarketm {
    url: String,
}

impl Clarketm {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for Clarketm {
    fn default() -> Self {
        Self::new("https://raw.githubusercontent.com/clarketm/proxy-list/master/proxy-list-raw.txt")
    }
}

#[async_trait]
impl Provider for Clarketm {
    fn name(&self) -> &'static str {
        "github.com/clarketm"
    }

    async fn fetch(&self, scraper: &Scraper, sink: &Sink) -> Result<()> {
        let body = scraper.get(&self.url).await?;
        sink.extend(extract_proxies(&PROXY_RE, &body));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_raw_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "Proxy list | Updated at Sat, 02 Nov 19\n\n1.2.3.4:8080 US-H-S +\n5.6.7.8:80 RU-N -\n",
            ))
            .mount(&server)
            .await;

        let scraper = Scraper::new(Duration::from_secs(2)).unwrap();
        let provider = Clarketm::new(server.uri());
        let sink = Sink::new(provider.name());
        provider.fetch(&scraper, &sink).await.unwrap();

        let found: Vec<_> = sink.take().into_iter().map(|c| c.address).collect();
        assert_eq!(found, vec!["http://1.2.3.4:8080", "http://5.6.7.8:80"]);
    }
}
