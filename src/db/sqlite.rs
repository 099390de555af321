//! SQLite 存储模块
//!
//! 本模块实现了基于 SQLite 数据库的代理存储功能：候选代理的批量
//! upsert、检测结果回写、活跃代理读取、随机查询以及统计聚合。
//!
//! SQLite 只允许单写者，因此连接池固定为 1 个连接并开启 WAL，
//! 所有写入天然串行化。

use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::info;

use crate::common::utils::validate_table_name;
use crate::db::manager::{PoolStats, ProxyStorage};
use crate::error::{PoolError, PoolResult};
use crate::model::{Candidate, ProxyFilter, ProxyRecord, TableStats};

const COLUMNS: &str = "id, address, source, country, created_at, updated_at, check_count, fail_count, \
                       timeout_count, success_count, losing_streak, last_status, anonymous, judge, \
                       response_time, deleted";

#[derive(Debug)]
pub struct SqliteStorage {
    pool: Pool<Sqlite>,
    table: String,
}

impl SqliteStorage {
    pub async fn connect(url: &str, table: &str) -> PoolResult<Self> {
        if !validate_table_name(table) {
            return Err(PoolError::InvalidTableName(table.to_string()));
        }

        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let storage = Self {
            pool,
            table: table.to_string(),
        };
        storage.create_table().await?;
        info!("✅ SQLite 数据库连接成功: {}", url);
        Ok(storage)
    }

    async fn create_table(&self) -> PoolResult<()> {
        let table = &self.table;
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL UNIQUE,
                source TEXT NOT NULL DEFAULT '',
                country TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                check_count INTEGER NOT NULL DEFAULT 0,
                fail_count INTEGER NOT NULL DEFAULT 0,
                timeout_count INTEGER NOT NULL DEFAULT 0,
                success_count INTEGER NOT NULL DEFAULT 0,
                losing_streak INTEGER NOT NULL DEFAULT 0,
                last_status TEXT NOT NULL DEFAULT '',
                anonymous BOOLEAN NOT NULL DEFAULT 0,
                judge TEXT NOT NULL DEFAULT '',
                response_time INTEGER NOT NULL DEFAULT 0,
                deleted BOOLEAN NOT NULL DEFAULT 0
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_compound ON {table} (deleted, last_status, anonymous, country)"
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ProxyStorage for SqliteStorage {
    async fn find_active(&self) -> Result<Vec<ProxyRecord>> {
        let rows = sqlx::query_as::<_, ProxyRecord>(&format!(
            "SELECT {COLUMNS} FROM {} WHERE deleted = 0",
            self.table
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn upsert_candidates(&self, rows: &[(Candidate, String)]) -> Result<u64> {
        let sql = format!(
            r#"
            INSERT INTO {} (address, source, country, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(address) DO UPDATE SET updated_at = excluded.updated_at
            "#,
            self.table
        );

        let mut written = 0;
        let mut tx = self.pool.begin().await?;
        for (candidate, country) in rows {
            let now = Utc::now();
            written += sqlx::query(&sql)
                .bind(&candidate.address)
                .bind(&candidate.source)
                .bind(country)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn update_checked(&self, proxy: &ProxyRecord) -> Result<()> {
        sqlx::query(&format!(
            r#"
            UPDATE {} SET
                updated_at = ?, check_count = ?, fail_count = ?, timeout_count = ?,
                success_count = ?, losing_streak = ?, last_status = ?, anonymous = ?,
                judge = ?, response_time = ?, deleted = ?
            WHERE id = ?
            "#,
            self.table
        ))
        .bind(Utc::now())
        .bind(proxy.check_count)
        .bind(proxy.fail_count)
        .bind(proxy.timeout_count)
        .bind(proxy.success_count)
        .bind(proxy.losing_streak)
        .bind(proxy.last_status.as_str())
        .bind(proxy.anonymous)
        .bind(&proxy.judge)
        .bind(proxy.response_time)
        .bind(proxy.deleted)
        .bind(proxy.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_address(&self, address: &str) -> Result<Option<ProxyRecord>> {
        let proxy = sqlx::query_as::<_, ProxyRecord>(&format!(
            "SELECT {COLUMNS} FROM {} WHERE address = ?",
            self.table
        ))
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(proxy)
    }

    async fn delete_by_address(&self, address: &str) -> Result<u64> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE address = ?", self.table))
            .bind(address)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn query_random(&self, filter: &ProxyFilter, limit: i64) -> Result<Vec<ProxyRecord>> {
        let proxies = sqlx::query_as::<_, ProxyRecord>(&format!(
            r#"
            SELECT {COLUMNS} FROM {} WHERE id IN (
                SELECT id FROM {} WHERE deleted = 0 AND last_status = 'good'
                    AND (? IS NULL OR country = ?)
                    AND (anonymous = 1 OR ? = 0)
                ORDER BY RANDOM() LIMIT ?
            )
            "#,
            self.table, self.table
        ))
        .bind(filter.country_code())
        .bind(filter.country_code())
        .bind(filter.anonymous)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(proxies)
    }

    async fn list_all(&self) -> Result<Vec<ProxyRecord>> {
        let proxies = sqlx::query_as::<_, ProxyRecord>(&format!(
            "SELECT {COLUMNS} FROM {} ORDER BY id",
            self.table
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(proxies)
    }

    async fn aggregate_stats(&self) -> Result<TableStats> {
        let t = &self.table;
        let stats = sqlx::query_as::<_, TableStats>(&format!(
            r#"
            SELECT
                (SELECT COUNT(*) FROM {t} WHERE deleted = 0 AND last_status = 'good' AND anonymous = 1) AS anon,
                (SELECT COUNT(*) FROM {t} WHERE deleted = 0 AND last_status = 'good') AS good,
                (SELECT COUNT(*) FROM {t} WHERE deleted = 0 AND last_status = 'timeout') AS timeout,
                (SELECT COUNT(*) FROM {t}) AS total
            "#
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }

    fn pool_stats(&self) -> PoolStats {
        PoolStats {
            max_connections: self.pool.options().get_max_connections(),
            open: self.pool.size(),
            idle: self.pool.num_idle() as u32,
        }
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::ProxyStatus;

    /// A fresh in-memory store; the single pooled connection keeps it alive.
    pub(crate) async fn memory_storage() -> SqliteStorage {
        SqliteStorage::connect("sqlite::memory:", "proxies").await.unwrap()
    }

    fn candidate(address: &str, source: &str) -> (Candidate, String) {
        (Candidate::new(address, source), String::new())
    }

    #[tokio::test]
    async fn test_rejects_invalid_table_name() {
        let result = SqliteStorage::connect("sqlite::memory:", "1; drop").await;
        assert!(matches!(result, Err(PoolError::InvalidTableName(_))));
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_row_per_address() {
        let storage = memory_storage().await;
        storage
            .upsert_candidates(&[
                candidate("http://1.1.1.1:80", "a.com"),
                candidate("http://1.1.1.1:80", "b.com"),
                candidate("http://2.2.2.2:8080", "b.com"),
            ])
            .await
            .unwrap();
        storage
            .upsert_candidates(&[candidate("http://2.2.2.2:8080", "c.com")])
            .await
            .unwrap();

        let all = storage.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
        let first = storage.find_by_address("http://1.1.1.1:80").await.unwrap().unwrap();
        assert_eq!(first.source, "a.com");
        assert_eq!(first.last_status, ProxyStatus::Unset);
    }

    #[tokio::test]
    async fn test_update_checked_and_find_active() {
        let storage = memory_storage().await;
        storage
            .upsert_candidates(&[
                candidate("http://1.1.1.1:80", "a.com"),
                candidate("http://2.2.2.2:80", "a.com"),
            ])
            .await
            .unwrap();

        let mut gone = storage.find_by_address("http://2.2.2.2:80").await.unwrap().unwrap();
        gone.deleted = true;
        gone.check_count = 6;
        gone.fail_count = 6;
        gone.last_status = ProxyStatus::Fail;
        storage.update_checked(&gone).await.unwrap();

        let active = storage.find_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].address, "http://1.1.1.1:80");

        let stored = storage.find_by_address("http://2.2.2.2:80").await.unwrap().unwrap();
        assert!(stored.deleted);
        assert_eq!(stored.fail_count, 6);
        assert_eq!(stored.last_status, ProxyStatus::Fail);
    }

    #[tokio::test]
    async fn test_query_random_and_stats() {
        let storage = memory_storage().await;
        storage
            .upsert_candidates(&[
                (Candidate::new("http://1.1.1.1:80", "a"), "US".to_string()),
                (Candidate::new("http://2.2.2.2:80", "a"), "DE".to_string()),
                (Candidate::new("http://3.3.3.3:80", "a"), "US".to_string()),
            ])
            .await
            .unwrap();

        for (address, anonymous, status) in [
            ("http://1.1.1.1:80", true, ProxyStatus::Good),
            ("http://2.2.2.2:80", false, ProxyStatus::Good),
            ("http://3.3.3.3:80", false, ProxyStatus::Timeout),
        ] {
            let mut record = storage.find_by_address(address).await.unwrap().unwrap();
            record.anonymous = anonymous;
            record.last_status = status;
            storage.update_checked(&record).await.unwrap();
        }

        let good = storage.query_random(&ProxyFilter::default(), 10).await.unwrap();
        assert_eq!(good.len(), 2);

        let anon_us = ProxyFilter {
            country: Some("us".into()),
            anonymous: true,
        };
        let found = storage.query_random(&anon_us, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].address, "http://1.1.1.1:80");

        let limited = storage.query_random(&ProxyFilter::default(), 1).await.unwrap();
        assert_eq!(limited.len(), 1);

        let stats = storage.aggregate_stats().await.unwrap();
        assert_eq!((stats.anon, stats.good, stats.timeout, stats.total), (1, 2, 1, 3));
    }

    #[tokio::test]
    async fn test_delete_by_address() {
        let storage = memory_storage().await;
        storage
            .upsert_candidates(&[candidate("http://1.1.1.1:80", "a")])
            .await
            .unwrap();
        assert_eq!(storage.delete_by_address("http://1.1.1.1:80").await.unwrap(), 1);
        assert_eq!(storage.delete_by_address("http://1.1.1.1:80").await.unwrap(), 0);
    }
}
