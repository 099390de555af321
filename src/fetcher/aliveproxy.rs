use anyhow::Result;
use async_trait::async_trait;

use crate::fetcher::extract::IP_PORT_RE;
use crate::fetcher::scraper::Scraper;
use crate::fetcher::{Provider, Sink, fan_out, scrape_page};

const LISTS: [&str; 15] = [
    "high-anonymity-proxy-list",
    "anonymous-proxy-list",
    "fastest-resolver",
    "us-proxy-list",
    "gb-proxy-list",
    "fr-proxy-list",
    "de-proxy-list",
    "jp-proxy-list",
    "ca-proxy-list",
    "ru-proxy-list",
    "proxy-list-port-80",
    "proxy-list-port-81",
    "proxy-list-port-3128",
    "proxy-list-port-8000",
    "proxy-list-port-8080",
];

#[derive(Debug, Clone)]
pub struct Aliveproxy {
    base: String,
}

impl Aliveproxy {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }
}

impl Default for Aliveproxy {
    fn default() -> Self {
        Self::new("http://www.aliveproxy.com")
    }
}

#[async_trait]
impl Provider for Aliveproxy {
    fn name(&self) -> &'static str {
        "aliveproxy.com"
    }

    async fn fetch(&self, scraper: &Scraper, sink: &Sink) -> Result<()> {
        let pages = LISTS
            .iter()
            .map(|list| format!("{}/{}/", self.base, list))
            .collect();
        fan_out(pages, None, move |url| async move {
            scrape_page(scraper, sink, &url, &IP_PORT_RE).await;
        })
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_only_strict_ip_port_pairs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/us-proxy-list/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<td>1.2.3.4:3128<br></td><td>updated 10.10.2019 12:00</td><td>5.6.7.8 : 80</td>",
            ))
            .mount(&server)
            .await;

        let scraper = Scraper::new(Duration::from_secs(2)).unwrap();
        let provider = Aliveproxy::new(server.uri());
        let sink = Sink::new(provider.name());
        provider.fetch(&scraper, &sink).await.unwrap();

        let found = sink.take();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].address, "http://1.2.3.4:3128");
    }
}
