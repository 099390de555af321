use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use reqwest::header::HeaderValue;
use serde::de::DeserializeOwned;

use crate::common::utils::{USER_AGENT, random_ipv4};
use crate::error::PoolResult;

/// 所有采集源共用的 HTTP 客户端。
///
/// 固定浏览器 UA，每个请求附带随机的 `X-Forwarded-For`，gzip 自动解压。
#[derive(Debug, Clone)]
pub struct Scraper {
    client: Client,
}

impl Scraper {
    pub fn new(timeout: Duration) -> PoolResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()?;
        Ok(Self { client })
    }

    pub async fn get(&self, url: &str) -> Result<String> {
        let forwarded = HeaderValue::from_str(&random_ipv4().to_string())?;
        let body = self
            .client
            .get(url)
            .header("X-Forwarded-For", forwarded)
            .send()
            .await?
            .text()
            .await?;
        Ok(body)
    }

    /// 不带 `X-Forwarded-For`，部分站点看到它会直接拒绝。
    pub async fn get_direct(&self, url: &str) -> Result<String> {
        Ok(self.client.get(url).send().await?.text().await?)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get(url).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_get_sends_browser_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .and(header_exists("x-forwarded-for"))
            .respond_with(ResponseTemplate::new(200).set_body_string("1.2.3.4:80"))
            .mount(&server)
            .await;

        let scraper = Scraper::new(Duration::from_secs(5)).unwrap();
        let body = scraper.get(&format!("{}/list", server.uri())).await.unwrap();
        assert_eq!(body, "1.2.3.4:80");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests[0].headers.get("user-agent").unwrap(), USER_AGENT);
    }

    #[tokio::test]
    async fn test_get_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let scraper = Scraper::new(Duration::from_millis(200)).unwrap();
        assert!(scraper.get(&server.uri()).await.is_err());
    }
}
