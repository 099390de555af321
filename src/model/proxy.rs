use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of the most recent check of a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyStatus {
    #[default]
    Unset,
    Good,
    Fail,
    Timeout,
}

impl ProxyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyStatus::Unset => "",
            ProxyStatus::Good => "good",
            ProxyStatus::Fail => "fail",
            ProxyStatus::Timeout => "timeout",
        }
    }
}

impl TryFrom<String> for ProxyStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "" | "unset" => Ok(ProxyStatus::Unset),
            "good" => Ok(ProxyStatus::Good),
            "fail" => Ok(ProxyStatus::Fail),
            "timeout" => Ok(ProxyStatus::Timeout),
            other => Err(format!("unknown proxy status `{other}`")),
        }
    }
}

impl fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proxy address scraped from one source, before it reaches the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    /// `http://ip:port`
    pub address: String,
    /// Label of the source that produced it, e.g. `"proxz.com"`.
    pub source: String,
}

impl Candidate {
    pub fn new(address: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            source: source.into(),
        }
    }

    /// The bare host part of the address, without scheme or port.
    pub fn host(&self) -> &str {
        crate::common::utils::host_of(&self.address)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.address, self.source)
    }
}

/// A proxy row as persisted in the store.
///
/// `address` is the unique key. Counters only grow, except `losing_streak`
/// which drops back to zero on every good check. Once `deleted` is set the
/// row is excluded from checks and queries.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ProxyRecord {
    #[serde(skip_serializing)]
    pub id: i64,
    #[serde(rename = "proxy")]
    pub address: String,
    pub source: String,
    pub country: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub check_count: i64,
    pub fail_count: i64,
    pub timeout_count: i64,
    pub success_count: i64,
    #[serde(skip_serializing)]
    pub losing_streak: i64,
    #[sqlx(try_from = "String")]
    pub last_status: ProxyStatus,
    pub anonymous: bool,
    #[serde(skip_serializing)]
    pub judge: String,
    /// Smoothed latency of good checks, in milliseconds.
    #[serde(rename = "avg_response_ms")]
    pub response_time: i64,
    #[serde(skip_serializing)]
    pub deleted: bool,
}

impl ProxyRecord {
    /// A fresh, never checked record for `address`.
    pub fn new(address: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            address: address.into(),
            source: String::new(),
            country: String::new(),
            created_at: now,
            updated_at: now,
            check_count: 0,
            fail_count: 0,
            timeout_count: 0,
            success_count: 0,
            losing_streak: 0,
            last_status: ProxyStatus::Unset,
            anonymous: false,
            judge: String::new(),
            response_time: 0,
            deleted: false,
        }
    }

    /// Share of checks that ended in `fail`.
    pub fn fail_ratio(&self) -> f64 {
        if self.check_count == 0 {
            0.0
        } else {
            self.fail_count as f64 / self.check_count as f64
        }
    }
}

/// Filter accepted by random good-proxy queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyFilter {
    /// ISO country code, upper-cased before querying.
    pub country: Option<String>,
    /// Only anonymous proxies when set.
    pub anonymous: bool,
}

impl ProxyFilter {
    pub fn country_code(&self) -> Option<String> {
        self.country
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_uppercase)
    }
}

/// Aggregate counts over the proxy table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TableStats {
    pub anon: i64,
    pub good: i64,
    pub timeout: i64,
    pub total: i64,
    #[sqlx(skip)]
    pub recently_checked: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_column_text() {
        for status in [
            ProxyStatus::Unset,
            ProxyStatus::Good,
            ProxyStatus::Fail,
            ProxyStatus::Timeout,
        ] {
            let parsed = ProxyStatus::try_from(status.as_str().to_string()).unwrap();
            assert_eq!(parsed, status);
        }
        assert!(ProxyStatus::try_from("dead".to_string()).is_err());
    }

    #[test]
    fn test_fail_ratio() {
        let mut record = ProxyRecord::new("http://1.2.3.4:80");
        assert_eq!(record.fail_ratio(), 0.0);
        record.check_count = 11;
        record.fail_count = 9;
        assert!(record.fail_ratio() > 0.81 && record.fail_ratio() < 0.82);
    }

    #[test]
    fn test_filter_country_code() {
        let filter = ProxyFilter {
            country: Some(" us ".into()),
            anonymous: false,
        };
        assert_eq!(filter.country_code().as_deref(), Some("US"));
        assert_eq!(ProxyFilter::default().country_code(), None);
    }

    #[test]
    fn test_record_json_hides_internal_fields() {
        let record = ProxyRecord::new("http://1.2.3.4:8080");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["proxy"], "http://1.2.3.4:8080");
        assert!(json.get("deleted").is_none());
        assert!(json.get("losing_streak").is_none());
    }
}
