//! PostgreSQL 存储模块：基于 [`ProxyStorage`] trait 实现代理数据的持久化功能。
//!
//! 支持表结构初始化、候选代理批量 upsert、检测结果回写、按地址查找删除、
//! 随机查询与统计聚合。使用 `sqlx` 异步驱动，需启用 `postgres` 编译特性。
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;

use crate::common::utils::validate_table_name;
use crate::db::manager::{PoolStats, ProxyStorage};
use crate::error::{PoolError, PoolResult};
use crate::model::{Candidate, ProxyFilter, ProxyRecord, TableStats};

const COLUMNS: &str = "id, address, source, country, created_at, updated_at, check_count, fail_count, \
                       timeout_count, success_count, losing_streak, last_status, anonymous, judge, \
                       response_time, deleted";

const MAX_CONNECTIONS: u32 = 10;

/// PostgreSQL 数据库存储实现，持有一个连接池 [`PgPool`]。
#[derive(Debug)]
pub struct PgStorage {
    pool: PgPool,
    table: String,
}

impl PgStorage {
    /// 创建一个 PostgreSQL 存储实例并自动初始化数据表结构。
    ///
    /// 表名不合法、连接失败或建表失败时返回错误。
    pub async fn connect(url: &str, table: &str) -> PoolResult<Self> {
        if !validate_table_name(table) {
            return Err(PoolError::InvalidTableName(table.to_string()));
        }

        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(url)
            .await?;

        let storage = Self {
            pool,
            table: table.to_string(),
        };
        storage.create_table().await?;
        info!("✅ PostgresSQL 数据库连接成功");
        Ok(storage)
    }

    /// 创建代理表（如果不存在），`address` 唯一，并建立组合索引。
    async fn create_table(&self) -> PoolResult<()> {
        let table = &self.table;
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                address TEXT NOT NULL UNIQUE,
                source TEXT NOT NULL DEFAULT '',
                country TEXT NOT NULL DEFAULT '',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                check_count BIGINT NOT NULL DEFAULT 0,
                fail_count BIGINT NOT NULL DEFAULT 0,
                timeout_count BIGINT NOT NULL DEFAULT 0,
                success_count BIGINT NOT NULL DEFAULT 0,
                losing_streak BIGINT NOT NULL DEFAULT 0,
                last_status TEXT NOT NULL DEFAULT '',
                anonymous BOOLEAN NOT NULL DEFAULT FALSE,
                judge TEXT NOT NULL DEFAULT '',
                response_time BIGINT NOT NULL DEFAULT 0,
                deleted BOOLEAN NOT NULL DEFAULT FALSE
            );
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
impl ProxyStorage for PgStorage {
    async fn find_active(&self) -> Result<Vec<ProxyRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM {} WHERE deleted = FALSE", self.table);
        let rows = sqlx::query_as::<_, ProxyRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn upsert_candidates(&self, rows: &[(Candidate, String)]) -> Result<u64> {
        let sql = format!(
            r#"
            INSERT INTO {} (address, source, country, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT(address) DO UPDATE SET updated_at = EXCLUDED.updated_at
            "#,
            self.table
        );

        let mut written = 0;
        let mut tx = self.pool.begin().await?;
        for (candidate, country) in rows {
            written += sqlx::query(&sql)
                .bind(&candidate.address)
                .bind(&candidate.source)
                .bind(country)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn update_checked(&self, proxy: &ProxyRecord) -> Result<()> {
        let sql = format!(
            r#"
            UPDATE {} SET
                updated_at = $1, check_count = $2, fail_count = $3, timeout_count = $4,
                success_count = $5, losing_streak = $6, last_status = $7, anonymous = $8,
                judge = $9, response_time = $10, deleted = $11
            WHERE id = $12
            "#,
            self.table
        );
        sqlx::query(&sql)
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
        let sql = format!("SELECT {COLUMNS} FROM {} WHERE address = $1", self.table);
        let result = sqlx::query_as::<_, ProxyRecord>(&sql)
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
        Ok(result)
    }

    async fn delete_by_address(&self, address: &str) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE address = $1", self.table);
        let result = sqlx::query(&sql).bind(address).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn query_random(&self, filter: &ProxyFilter, limit: i64) -> Result<Vec<ProxyRecord>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM {} WHERE deleted = FALSE AND last_status = 'good'
                AND ($1::text IS NULL OR country = $1)
                AND (anonymous OR NOT $2)
            ORDER BY RANDOM() LIMIT $3
            "#,
            self.table
        );
        let proxies = sqlx::query_as::<_, ProxyRecord>(&sql)
            .bind(filter.country_code())
            .bind(filter.anonymous)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(proxies)
    }

    async fn list_all(&self) -> Result<Vec<ProxyRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM {} ORDER BY id", self.table);
        let proxies = sqlx::query_as::<_, ProxyRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(proxies)
    }

    async fn aggregate_stats(&self) -> Result<TableStats> {
        let t = &self.table;
        let sql = format!(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE NOT deleted AND last_status = 'good' AND anonymous) AS anon,
                COUNT(*) FILTER (WHERE NOT deleted AND last_status = 'good') AS good,
                COUNT(*) FILTER (WHERE NOT deleted AND last_status = 'timeout') AS timeout,
                COUNT(*) AS total
            FROM {t}
            "#
        );
        let stats = sqlx::query_as::<_, TableStats>(&sql)
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
