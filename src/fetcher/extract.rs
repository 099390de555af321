//! 正则模板提取：从任意 HTML/文本中抠出 `ip:port`，或按模板拼出二级页面地址。
use std::net::Ipv4Addr;

use once_cell::sync::Lazy;
use regex::Regex;

const IPV4: &str = r"(?:(?:25[0-5]|2[0-4]\d|[01]?\d\d?)\.){3}(?:25[0-5]|2[0-4]\d|[01]?\d\d?)";

/// 宽松匹配：IP 之后（可跨行、跨标签）最近的 2~5 位数字作为端口；
/// 若先遇到下一个 IP，则端口为空。
pub static PROXY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?ms)(?P<ip>{IPV4})(?:.*?(?:(?:{IPV4})|(?P<port>\d{{2,5}})))"
    ))
    .expect("invalid proxy regex")
});

/// 严格匹配紧挨着的 `ip:port`。
pub static IP_PORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?P<ip>(([0-9]|[1-9][0-9]|1[0-9]{2}|2[0-4][0-9]|25[0-5])\.){3}([0-9]|[1-9][0-9]|1[0-9]{2}|2[0-4][0-9]|25[0-5])):(?P<port>[0-9]{2,5})",
    )
    .expect("invalid ip:port regex")
});

pub const PROXY_TEMPLATE: &str = "http://${ip}:${port}\n";

/// 每个匹配的第一个捕获组。
pub fn find_submatch(re: &Regex, text: &str) -> Vec<String> {
    re.captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// 把每个匹配的捕获组代入 `template`，再按换行切开，丢弃空行。
pub fn find_all_template(re: &Regex, text: &str, template: &str) -> Vec<String> {
    let mut expanded = String::new();
    for caps in re.captures_iter(text) {
        caps.expand(template, &mut expanded);
    }
    expanded
        .split('\n')
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// `http://ip:port` 形式的代理地址，端口缺失或越界的匹配会被跳过。
pub fn extract_proxies(re: &Regex, text: &str) -> Vec<String> {
    find_all_template(re, text, PROXY_TEMPLATE)
        .into_iter()
        .filter(|address| is_proxy_address(address))
        .collect()
}

pub fn is_proxy_address(address: &str) -> bool {
    let Some(rest) = address.strip_prefix("http://") else {
        return false;
    };
    match rest.rsplit_once(':') {
        Some((ip, port)) => {
            ip.parse::<Ipv4Addr>().is_ok() && port.parse::<u16>().is_ok_and(|p| p > 0)
        }
        None => false,
    }
}
