pub mod app_config;
pub mod proxy;

pub use app_config::AppConfig;
pub use proxy::{Candidate, ProxyFilter, ProxyRecord, ProxyStatus, TableStats};
