use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Prefix of environment overrides, e.g. `PROXYPOOL__CHECK__WORKERS=200`.
pub const ENV_PREFIX: &str = "PROXYPOOL";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub db: DbConfig,
    pub harvest: HarvestConfig,
    pub check: CheckConfig,
    pub judge: JudgeConfig,
    pub geo: GeoConfig,
    pub debug: DebugConfig,
    pub log: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DbConfig {
    /// `sqlite://path/to/file.db` or `postgres://...`; a bare path is treated as SQLite.
    pub url: String,
    pub table_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Per-source deadline in seconds, `0` disables it.
    pub deadline: u64,
    /// Timeout of a single page fetch in seconds.
    pub request_timeout: u64,
    /// Write every harvested candidate to a file in the temp dir.
    pub dump: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CheckConfig {
    pub workers: usize,
    /// Request timeout of a single proxy probe in seconds.
    pub timeout: u64,
    pub progress: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub sites: Vec<String>,
    /// Appended to `sites`, handy from the environment.
    pub extra_sites: Vec<String>,
    pub suffix: String,
    /// Concurrent requests fired at each site while ranking them.
    pub probes: usize,
    pub attempts: u32,
    /// Seconds between resolution attempts.
    pub backoff: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeoConfig {
    pub mmdb_path: String,
    pub download_url: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DebugConfig {
    pub providers: bool,
    pub judges: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub console_levels: Vec<String>,
    pub directory: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:4444".to_string(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://proxypool.db".to_string(),
            table_name: "proxies".to_string(),
        }
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            deadline: 60,
            request_timeout: 20,
            dump: false,
        }
    }
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            workers: 100,
            timeout: 30,
            progress: false,
        }
    }
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            sites: vec![
                "http://httpbin.org".to_string(),
                "http://httpbin.net".to_string(),
                "http://eu.httpbin.org".to_string(),
            ],
            extra_sites: Vec::new(),
            suffix: "/get?show_env".to_string(),
            probes: 10,
            attempts: 3,
            backoff: 5,
        }
    }
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            mmdb_path: "GeoLite2-Country.mmdb".to_string(),
            download_url: "https://httpbin.net/GeoLite2-Country.mmdb".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console_levels: vec!["ERROR".into(), "WARN".into(), "INFO".into()],
            directory: "logs".to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the optional config file, then `PROXYPOOL__*` variables.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let file = file.unwrap_or_else(|| Path::new("Config"));
        let config = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::from(file).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("judge.sites")
                    .with_list_parse_key("judge.extra_sites")
                    .with_list_parse_key("log.console_levels")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Every judge candidate, configured sites first.
    pub fn judge_sites(&self) -> Vec<String> {
        self.judge
            .sites
            .iter()
            .chain(self.judge.extra_sites.iter())
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl HarvestConfig {
    pub fn deadline(&self) -> Option<Duration> {
        (self.deadline > 0).then(|| Duration::from_secs(self.deadline))
    }
}

impl CheckConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_defaults_without_file() {
        let config = AppConfig::load(Some(Path::new("does-not-exist.toml"))).unwrap();
        assert_eq!(config.check.workers, 100);
        assert_eq!(config.harvest.deadline(), Some(Duration::from_secs(60)));
        assert_eq!(config.judge_sites().len(), 3);
        assert!(config.judge.extra_sites.is_empty());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[judge]\nsites = [\"http://only.judge\"]\n[log]\ndirectory = \"var\"").unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.judge_sites(), vec!["http://only.judge".to_string()]);
        assert_eq!(config.judge.suffix, "/get?show_env");
        assert_eq!(config.log.directory, "var");
        assert_eq!(config.log.console_levels.len(), 3);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[check]\nworkers = 7\n[harvest]\ndeadline = 0\n[judge]\nextra_sites = [\"http://judge.local/\"]"
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.check.workers, 7);
        assert_eq!(config.check.timeout, 30);
        assert_eq!(config.harvest.deadline(), None);
        assert_eq!(config.judge_sites().last().unwrap(), "http://judge.local");
    }
}
