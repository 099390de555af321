mod cli;
mod common;
mod db;
mod error;
mod fetcher;
mod model;
mod service;
mod web;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use crate::cli::{Cli, Command, ServerArgs};
use crate::common::log::init_logging;
use crate::db::{ProxyStorage, StorageBackend};
use crate::model::AppConfig;
use crate::service::Pipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => run_server(args, cli.config.as_deref()).await,
        command => cli::run_client(command).await,
    }
}

async fn run_server(args: ServerArgs, config_file: Option<&Path>) -> anyhow::Result<()> {
    let mut config = AppConfig::load(config_file)?;
    args.apply(&mut config);
    // 必须在任何日志输出之前
    init_logging(&config.log)?;

    let store = StorageBackend::connect(&config.db).await?;
    if args.ping {
        store.ping().await?;
        info!("🏓 数据库 {} 连接正常", config.db.url);
        return Ok(());
    }
    info!("📦 数据库已连接: {}", config.db.url);

    let addr = config.server.addr.clone();
    let store: Arc<dyn ProxyStorage> = Arc::new(store);
    let pipeline = Arc::new(Pipeline::new(store, config));

    if args.download {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.run_harvest_and_validate().await {
                error!("采集检测失败: {}", e);
            }
        });
    } else if args.check {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.run_validate_only().await {
                error!("检测失败: {}", e);
            }
        });
    }

    web::serve(pipeline, &addr).await?;
    Ok(())
}
