use std::net::Ipv4Addr;

use rand::Rng;
use tracing::Level;

/// Browser user agent sent by scrapers and probes.
pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_1) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/78.0.3904.108 Safari/537.36";

/// Strips scheme and port: `http://1.2.3.4:8080` -> `1.2.3.4`.
pub fn host_of(address: &str) -> &str {
    let rest = address
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(address);
    rest.split(':').next().unwrap_or(rest)
}

/// A random routable-looking IPv4 address for `X-Forwarded-For`.
pub fn random_ipv4() -> Ipv4Addr {
    let mut rng = rand::rng();
    Ipv4Addr::new(
        rng.random_range(1..=223),
        rng.random(),
        rng.random(),
        rng.random_range(1..=254),
    )
}

/// 表名基本校验
pub fn validate_table_name(name: &str) -> bool {
    // 限定表名为英文字母、下划线、数字，且不能以数字开头
    name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic())
            .unwrap_or(false)
}

// 把字符串转换成 Level，忽略大小写，不识别时返回 None
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" | "WARNING" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}
