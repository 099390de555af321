//! 存储模块：支持多种数据库后端的代理数据读写接口。
//!
//! 支持的后端包括：SQLite、PostgreSQL（按编译特性启用）
//! 提供统一的异步 trait [`ProxyStorage`]，便于通过 [`StorageBackend`] 多态调度。
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

#[cfg(feature = "postgres")]
use crate::db::postgres::PgStorage;
#[cfg(feature = "sqlite")]
use crate::db::sqlite::SqliteStorage;
use crate::error::PoolResult;
use crate::model::app_config::DbConfig;
use crate::model::{Candidate, ProxyFilter, ProxyRecord, TableStats};

/// 定义代理存储操作的通用异步接口。
///
/// 无论具体底层是 SQLite 还是 PostgreSQL，
/// 都需实现此 trait，以实现代理数据的统一读写操作。
#[async_trait]
pub trait ProxyStorage: Send + Sync {
    /// All rows with `deleted = false`, the input of a check pass.
    async fn find_active(&self) -> Result<Vec<ProxyRecord>>;

    /// Inserts each candidate, or only touches `updated_at` when the address
    /// is already known. Returns the number of rows written.
    async fn upsert_candidates(&self, rows: &[(Candidate, String)]) -> Result<u64>;

    /// Writes counters, status, judge, latency and the deleted flag by id.
    async fn update_checked(&self, proxy: &ProxyRecord) -> Result<()>;

    async fn find_by_address(&self, address: &str) -> Result<Option<ProxyRecord>>;

    /// Hard delete, returns the affected row count.
    async fn delete_by_address(&self, address: &str) -> Result<u64>;

    /// Random live `good` proxies matching `filter`.
    async fn query_random(&self, filter: &ProxyFilter, limit: i64) -> Result<Vec<ProxyRecord>>;

    async fn list_all(&self) -> Result<Vec<ProxyRecord>>;

    async fn aggregate_stats(&self) -> Result<TableStats>;

    fn pool_stats(&self) -> PoolStats;

    async fn ping(&self) -> Result<()>;
}

/// Connection pool occupancy, served on `/db`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_connections: u32,
    pub open: u32,
    pub idle: u32,
}

impl PoolStats {
    pub fn in_use(&self) -> u32 {
        self.open.saturating_sub(self.idle)
    }

    /// Every allowed connection is busy, so a stats query would queue behind writes.
    ///
    /// A single-connection pool never counts as saturated: sqlx reports it as
    /// `open: 1, idle: 0` between queries too, and the query just waits its turn.
    pub fn is_saturated(&self) -> bool {
        self.max_connections > 1 && self.in_use() >= self.max_connections
    }
}

/// 数据库后端枚举，按启用特性动态支持多种数据库驱动。
///
/// 运行时根据连接串的 scheme 选择后端：`postgres://` 走 PostgreSQL，
/// 其余（`sqlite://` 或裸文件路径）走 SQLite。
#[derive(Debug)]
pub enum StorageBackend {
    /// SQLite 存储实现（轻量、文件型，单写连接）
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteStorage),

    /// PostgreSQL 存储实现（小连接池）
    #[cfg(feature = "postgres")]
    Postgres(PgStorage),
}

impl StorageBackend {
    /// 根据配置项创建对应的数据库后端实例。
    pub async fn connect(config: &DbConfig) -> PoolResult<Self> {
        let url = config.url.trim();
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            #[cfg(feature = "postgres")]
            return Ok(Self::Postgres(PgStorage::connect(url, &config.table_name).await?));
            #[cfg(not(feature = "postgres"))]
            return Err(crate::error::PoolError::UnsupportedDb(url.to_string()));
        }

        #[cfg(feature = "sqlite")]
        {
            let url = if url.starts_with("sqlite:") {
                url.to_string()
            } else {
                format!("sqlite://{}", url)
            };
            Ok(Self::Sqlite(SqliteStorage::connect(&url, &config.table_name).await?))
        }
        #[cfg(not(feature = "sqlite"))]
        Err(crate::error::PoolError::UnsupportedDb(url.to_string()))
    }
}

#[async_trait]
impl ProxyStorage for StorageBackend {
    async fn find_active(&self) -> Result<Vec<ProxyRecord>> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.find_active().await,
            #[cfg(feature = "postgres")]
            Self::Postgres(s) => s.find_active().await,
        }
    }

    async fn upsert_candidates(&self, rows: &[(Candidate, String)]) -> Result<u64> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.upsert_candidates(rows).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(s) => s.upsert_candidates(rows).await,
        }
    }

    async fn update_checked(&self, proxy: &ProxyRecord) -> Result<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.update_checked(proxy).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(s) => s.update_checked(proxy).await,
        }
    }

    async fn find_by_address(&self, address: &str) -> Result<Option<ProxyRecord>> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.find_by_address(address).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(s) => s.find_by_address(address).await,
        }
    }

    async fn delete_by_address(&self, address: &str) -> Result<u64> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.delete_by_address(address).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(s) => s.delete_by_address(address).await,
        }
    }

    async fn query_random(&self, filter: &ProxyFilter, limit: i64) -> Result<Vec<ProxyRecord>> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.query_random(filter, limit).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(s) => s.query_random(filter, limit).await,
        }
    }

    async fn list_all(&self) -> Result<Vec<ProxyRecord>> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.list_all().await,
            #[cfg(feature = "postgres")]
            Self::Postgres(s) => s.list_all().await,
        }
    }

    async fn aggregate_stats(&self) -> Result<TableStats> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.aggregate_stats().await,
            #[cfg(feature = "postgres")]
            Self::Postgres(s) => s.aggregate_stats().await,
        }
    }

    fn pool_stats(&self) -> PoolStats {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.pool_stats(),
            #[cfg(feature = "postgres")]
            Self::Postgres(s) => s.pool_stats(),
        }
    }

    async fn ping(&self) -> Result<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.ping().await,
            #[cfg(feature = "postgres")]
            Self::Postgres(s) => s.ping().await,
        }
    }
}
