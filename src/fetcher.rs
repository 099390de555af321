//! 代理采集：所有采集源并发运行，各自带截止时间，结果在汇合点合并。
pub mod aliveproxy;
pub mod bfbke;
pub mod blogspot;
pub mod checkerproxy;
pub mod clarketm;
pub mod extract;
pub mod feiyiproxy;
pub mod freeproxylists;
pub mod ip3366;
pub mod kuai;
pub mod lumiproxy;
pub mod my_proxy;
pub mod proxy_list;
pub mod proxy_list_download;
pub mod proxylist_me;
pub mod proxz;
pub mod scraper;
pub mod webanetlabs;
pub mod xseo;
pub mod yip;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::fetcher::extract::extract_proxies;
use crate::fetcher::scraper::Scraper;
use crate::model::Candidate;

/// 一个固定的采集源。
///
/// 实现者把找到的地址写进 `sink`，出错可以直接返回：已经写入的结果不会丢。
#[async_trait]
pub trait Provider: Send + Sync {
    /// 写入候选代理的来源标签，例如 `"proxz.com"`。
    fn name(&self) -> &'static str;

    async fn fetch(&self, scraper: &Scraper, sink: &Sink) -> Result<()>;
}

/// 单个采集源的结果累加器，截止时间到了也能取出部分结果。
#[derive(Debug, Clone)]
pub struct Sink {
    source: &'static str,
    found: Arc<Mutex<Vec<Candidate>>>,
}

impl Sink {
    pub fn new(source: &'static str) -> Self {
        Self {
            source,
            found: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, address: impl Into<String>) {
        self.extend([address.into()]);
    }

    pub fn extend<I: IntoIterator<Item = String>>(&self, addresses: I) {
        let mut found = self.found.lock().unwrap_or_else(PoisonError::into_inner);
        found.extend(
            addresses
                .into_iter()
                .map(|address| Candidate::new(address, self.source)),
        );
    }

    pub fn len(&self) -> usize {
        self.found.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn take(&self) -> Vec<Candidate> {
        std::mem::take(&mut *self.found.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// 下载 `url` 并把 `re` 匹配到的代理写入 `sink`，返回本页数量；失败只记日志。
pub async fn scrape_page(scraper: &Scraper, sink: &Sink, url: &str, re: &Regex) -> usize {
    match scraper.get(url).await {
        Ok(body) => {
            let proxies = extract_proxies(re, &body);
            let count = proxies.len();
            sink.extend(proxies);
            count
        }
        Err(e) => {
            debug!("{} 请求失败 {}: {}", sink.source, url, e);
            0
        }
    }
}

/// 并发处理一组页面，`limit` 为 `None` 时不限制在途数量。
pub async fn fan_out<F, Fut>(urls: Vec<String>, limit: Option<usize>, f: F)
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = ()>,
{
    futures::stream::iter(urls).for_each_concurrent(limit, f).await;
}

/// 内置的全部采集源。
pub fn all_providers() -> Vec<Arc<dyn Provider>> {
    vec![
        Arc::new(freeproxylists::Freeproxylists::default()),
        Arc::new(webanetlabs::Webanetlabs::default()),
        Arc::new(checkerproxy::Checkerproxy::default()),
        Arc::new(proxy_list::ProxyList::default()),
        Arc::new(aliveproxy::Aliveproxy::default()),
        Arc::new(kuai::Kuaidaili::default()),
        Arc::new(feiyiproxy::Feiyiproxy::default()),
        Arc::new(yip::Yip::default()),
        Arc::new(ip3366::Ip3366::default()),
        Arc::new(proxylist_me::ProxylistMe::default()),
        Arc::new(proxy_list_download::ProxyListDownload::default()),
        Arc::new(blogspot::Blogspot::default()),
        Arc::new(proxz::Proxz::default()),
        Arc::new(my_proxy::MyProxy::default()),
        Arc::new(xseo::Xseo::default()),
        Arc::new(clarketm::Clarketm::default()),
        Arc::new(bfbke::Bfbke::default()),
        Arc::new(lumiproxy::LumiProxy::default()),
    ]
}

/// 并发运行所有采集源并合并结果，不去重。
///
/// 每个采集源独立计时，超时后其在途请求随 future 一起被丢弃，
/// 已写入的候选保留。某个源出错或 panic 不影响其它源。
pub async fn harvest(
    providers: Vec<Arc<dyn Provider>>,
    scraper: &Scraper,
    deadline: Option<Duration>,
    debug_providers: bool,
) -> Vec<Candidate> {
    info!("========== [代理采集阶段] ==========");
    let mut set = JoinSet::new();
    for provider in providers {
        let scraper = scraper.clone();
        set.spawn(async move {
            let name = provider.name();
            let sink = Sink::new(name);
            let start = Instant::now();
            let work = provider.fetch(&scraper, &sink);
            let result = match deadline {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(result) => result,
                    Err(_) => {
                        debug!("⏰ {} 超过截止时间 {:?}，保留已采集的 {} 条", name, limit, sink.len());
                        Ok(())
                    }
                },
                None => work.await,
            };
            if let Err(e) = result {
                warn!("{} 采集失败: {}", name, e);
            }
            let found = sink.take();
            if debug_providers {
                info!("{:?}\t{}\t{}", start.elapsed(), name, found.len());
            } else {
                debug!("{} 采集了 {} 条代理，耗时 {:?}", name, found.len(), start.elapsed());
            }
            found
        });
    }

    let mut candidates = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(found) => candidates.extend(found),
            Err(e) => warn!("采集任务异常退出: {}", e),
        }
    }
    info!("抓取到总共 {} 条代理", candidates.len());
    candidates
}
