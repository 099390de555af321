//! 命令行：`server` 启动采集/检测/API，其余子命令是访问运行中服务的客户端。
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use url::Url;

use crate::model::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "proxypool", version)]
#[command(about = "Harvest, check and serve public HTTP proxies")]
pub struct Cli {
    /// Config file, `Config.toml` in the working directory by default
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download then check proxies and start the REST API
    Server(ServerArgs),
    /// Return one or more proxies that passed checks
    Get {
        #[command(flatten)]
        target: Target,
        /// Number of proxies to return
        #[arg(short, long, default_value_t = 1)]
        num: u32,
        /// Only anonymous proxies
        #[arg(long)]
        anon: bool,
        /// Country filter, e.g. `US`
        #[arg(short, long)]
        country: Option<String>,
        /// Every stored proxy, ignoring filters and status
        #[arg(long)]
        all: bool,
    },
    /// Look up one proxy
    Find {
        #[command(flatten)]
        target: Target,
        proxy: String,
    },
    /// Delete one proxy
    Delete {
        #[command(flatten)]
        target: Target,
        proxy: String,
    },
    /// Show server stats
    Stats {
        #[command(flatten)]
        target: Target,
        /// Refresh every N seconds, 0 prints once
        #[arg(short, long, default_value_t = 0)]
        watch: u64,
    },
    /// Re-download and check proxies unless the server is busy
    Refresh {
        #[command(flatten)]
        target: Target,
    },
}

#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Url of a running server
    #[arg(short, long, env = "PROXYPOOL_URL", default_value = "http://127.0.0.1:4444")]
    pub url: String,
}

#[derive(Args, Debug, Default, Clone)]
pub struct ServerArgs {
    /// Address to listen on
    #[arg(short, long)]
    pub addr: Option<String>,
    /// Database url or SQLite file path
    #[arg(long)]
    pub db: Option<String>,
    /// MaxMind country database, downloaded when missing
    #[arg(long)]
    pub mmdb: Option<String>,
    /// Concurrent proxy checks
    #[arg(short, long)]
    pub workers: Option<usize>,
    /// Proxy check timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,
    /// Per-source harvest deadline in seconds, 0 disables it
    #[arg(short, long)]
    pub deadline: Option<u64>,
    /// Harvest (then check) proxies after start
    #[arg(long)]
    pub download: bool,
    /// Check stored proxies after start
    #[arg(long)]
    pub check: bool,
    /// Ping the database and exit
    #[arg(long)]
    pub ping: bool,
    /// Show a progress bar while checking
    #[arg(short, long)]
    pub progress: bool,
}

impl ServerArgs {
    /// 命令行参数优先于配置文件和环境变量。
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(addr) = &self.addr {
            config.server.addr = addr.clone();
        }
        if let Some(db) = &self.db {
            config.db.url = db.clone();
        }
        if let Some(mmdb) = &self.mmdb {
            config.geo.mmdb_path = mmdb.clone();
        }
        if let Some(workers) = self.workers {
            config.check.workers = workers;
        }
        if let Some(timeout) = self.timeout {
            config.check.timeout = timeout;
        }
        if let Some(deadline) = self.deadline {
            config.harvest.deadline = deadline;
        }
        if self.progress {
            config.check.progress = true;
        }
    }
}

fn endpoint(base: &str, path: &str) -> Result<Url> {
    let base = Url::parse(base).with_context(|| format!("invalid server url `{base}`"))?;
    Ok(base.join(path)?)
}

/// `/getall`、`/get` 或 `/get/{n}`，带上过滤参数。
pub fn get_url(base: &str, num: u32, anon: bool, country: Option<&str>, all: bool) -> Result<Url> {
    if all {
        return endpoint(base, "/getall");
    }
    let mut url = if num == 1 {
        endpoint(base, "/get")?
    } else {
        endpoint(base, &format!("/get/{num}"))?
    };
    {
        let mut query = url.query_pairs_mut();
        if anon {
            query.append_key_only("anon");
        }
        if let Some(country) = country.filter(|c| !c.is_empty()) {
            query.append_pair("country", country);
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }
    Ok(url)
}

fn pretty(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| body.to_string())
}

async fn fetch(request: reqwest::RequestBuilder, url: &Url) -> Result<String> {
    let response = request
        .send()
        .await
        .with_context(|| format!("request failed for {url}, is the server running?"))?;
    Ok(response.text().await?)
}

/// 执行客户端子命令，结果直接打印到标准输出。
pub async fn run_client(command: Command) -> Result<()> {
    let client = reqwest::Client::new();
    match command {
        Command::Server(_) => anyhow::bail!("`server` is not a client command"),
        Command::Get {
            target,
            num,
            anon,
            country,
            all,
        } => {
            let url = get_url(&target.url, num, anon, country.as_deref(), all)?;
            println!("{}", pretty(&fetch(client.get(url.clone()), &url).await?));
        }
        Command::Find { target, proxy } => {
            let url = endpoint(&target.url, "/find")?;
            let body = fetch(client.post(url.clone()).form(&[("proxy", proxy)]), &url).await?;
            println!("{}", pretty(&body));
        }
        Command::Delete { target, proxy } => {
            let url = endpoint(&target.url, "/delete")?;
            println!("{}", fetch(client.post(url.clone()).form(&[("proxy", proxy)]), &url).await?);
        }
        Command::Stats { target, watch } => {
            let url = endpoint(&target.url, "/stats")?;
            if watch == 0 {
                println!("{}", pretty(&fetch(client.get(url.clone()), &url).await?));
                return Ok(());
            }
            loop {
                print!("\x1b[5;1H");
                println!("updating every {watch} seconds\n");
                println!("{}", pretty(&fetch(client.get(url.clone()), &url).await?));
                tokio::time::sleep(Duration::from_secs(watch)).await;
            }
        }
        Command::Refresh { target } => {
            let url = endpoint(&target.url, "/refresh")?;
            println!("{}", fetch(client.get(url.clone()), &url).await?);
        }
    }
    Ok(())
}
