use std::fs::{create_dir_all, File};
use std::path::Path;
use tracing::{Level, Metadata};
use tracing_subscriber::filter::{filter_fn, EnvFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};
use crate::common::utils::parse_level;
use crate::model::app_config::LoggingConfig;

/// Target used by the HTTP access log hoop.
pub const ACCESS_TARGET: &str = "access";

pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let log_dir = Path::new(&config.directory);
    create_dir_all(log_dir)?;

    let allowed_levels: Vec<Level> = config
        .console_levels
        .iter()
        .filter_map(|lvl_str| parse_level(lvl_str))
        .collect();

    // 文件日志（默认接收 debug 及以上，RUST_LOG 可覆盖）
    let file = File::create(log_dir.join("proxypool.log"))?;
    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("debug,sqlx=warn,hyper=info,reqwest=info"));
    let file_layer = fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_filter(file_filter);

    // HTTP 访问日志单独成文件
    let access = File::create(log_dir.join("access.log"))?;
    let access_layer = fmt::layer()
        .with_writer(access)
        .with_ansi(false)
        .with_target(false)
        .with_filter(filter_fn(|metadata: &Metadata| {
            metadata.target() == ACCESS_TARGET
        }));

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_filter(filter_fn(move |metadata: &Metadata| {
            metadata.target() != ACCESS_TARGET && allowed_levels.contains(metadata.level())
        }));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(access_layer)
        .with(stdout_layer)
        .try_init()?;

    Ok(())
}
