//! Postgres job repository

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::RwLock;
use workcell_core::domain::JobRecord;

use super::JobStore;
use crate::db;
use crate::error::{Result, StoreError};

/// Job store backed by a postgres pool
///
/// The pool is created lazily by `connect`. When a query fails because the
/// server went away, the pool is dropped and every call reports
/// `StoreError::Disconnected` until the next successful `connect`.
pub struct SqlJobStore {
    database_url: String,
    tables: Vec<String>,
    pool: RwLock<Option<PgPool>>,
}

impl SqlJobStore {
    /// Creates a disconnected store
    ///
    /// # Arguments
    /// * `database_url` - postgres connection string
    /// * `tables` - job tables to create on connect
    pub fn new(database_url: impl Into<String>, tables: Vec<String>) -> Self {
        Self {
            database_url: database_url.into(),
            tables,
            pool: RwLock::new(None),
        }
    }

    fn pool(&self) -> Result<PgPool> {
        let guard = self.pool.read().unwrap_or_else(|e| e.into_inner());
        guard.clone().ok_or(StoreError::Disconnected)
    }

    fn set_pool(&self, pool: Option<PgPool>) {
        let mut guard = self.pool.write().unwrap_or_else(|e| e.into_inner());
        *guard = pool;
    }

    /// Maps a query error, forgetting the pool when the server is gone
    fn handle_error(&self, err: sqlx::Error) -> StoreError {
        if is_connection_error(&err) {
            tracing::warn!("SQL connection lost: {}", err);
            self.set_pool(None);
            StoreError::Disconnected
        } else {
            StoreError::Database(err)
        }
    }
}

#[async_trait]
impl JobStore for SqlJobStore {
    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let pool = db::create_pool(&self.database_url)
            .await
            .map_err(|e| StoreError::ConnectFailed(e.to_string()))?;

        for table in &self.tables {
            db::ensure_job_table(&pool, table).await?;
        }

        self.set_pool(Some(pool));
        tracing::info!("Connected to job database");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.pool
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    async fn get_next(&self, table: &str) -> Result<Option<JobRecord>> {
        db::validate_table_name(table)?;
        let pool = self.pool()?;

        let sql = format!(
            r#"
            SELECT id, item_type, part_type, remaining, in_production
            FROM {table}
            ORDER BY id ASC
            LIMIT 1
            "#
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .fetch_optional(&pool)
            .await
            .map_err(|e| self.handle_error(e))?;

        Ok(row.map(|r| r.into()))
    }

    async fn insert(&self, table: &str, record: &JobRecord) -> Result<JobRecord> {
        db::validate_table_name(table)?;
        let pool = self.pool()?;

        let sql = format!(
            r#"
            INSERT INTO {table} (item_type, part_type, remaining, in_production, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#
        );
        let (id,): (i64,) = sqlx::query_as(&sql)
            .bind(&record.item_type)
            .bind(&record.part_type)
            .bind(to_column(record.remaining))
            .bind(record.in_production)
            .bind(chrono::Utc::now())
            .fetch_one(&pool)
            .await
            .map_err(|e| self.handle_error(e))?;

        Ok(JobRecord {
            id: id.to_string(),
            ..record.clone()
        })
    }

    async fn update(&self, table: &str, record: &JobRecord) -> Result<bool> {
        db::validate_table_name(table)?;
        let id = parse_id(&record.id)?;
        let pool = self.pool()?;

        let sql = format!(
            r#"
            UPDATE {table}
            SET remaining = $1, in_production = $2
            WHERE id = $3
            "#
        );
        let result = sqlx::query(&sql)
            .bind(to_column(record.remaining))
            .bind(record.in_production)
            .bind(id)
            .execute(&pool)
            .await
            .map_err(|e| self.handle_error(e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, table: &str, id: &str) -> Result<bool> {
        db::validate_table_name(table)?;
        let id = parse_id(id)?;
        let pool = self.pool()?;

        let sql = format!("DELETE FROM {table} WHERE id = $1");
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&pool)
            .await
            .map_err(|e| self.handle_error(e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn close(&self) {
        let pool = {
            let mut guard = self.pool.write().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        if let Some(pool) = pool {
            tracing::info!("Closing SQL connection");
            pool.close().await;
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    )
}

fn parse_id(id: &str) -> Result<i64> {
    id.parse::<i64>()
        .map_err(|_| StoreError::InvalidId(id.to_string()))
}

fn to_column(remaining: u32) -> i32 {
    i32::try_from(remaining).unwrap_or(i32::MAX)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    item_type: String,
    part_type: String,
    remaining: i32,
    in_production: bool,
}

impl From<JobRow> for JobRecord {
    fn from(row: JobRow) -> Self {
        JobRecord {
            id: row.id.to_string(),
            item_type: row.item_type,
            part_type: row.part_type,
            remaining: u32::try_from(row.remaining).unwrap_or(0),
            in_production: row.in_production,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_conversion_clamps_negative_remaining() {
        let row = JobRow {
            id: 7,
            item_type: "BELL".to_string(),
            part_type: "A".to_string(),
            remaining: -1,
            in_production: true,
        };

        let record: JobRecord = row.into();
        assert_eq!(record.id, "7");
        assert_eq!(record.remaining, 0);
        assert!(record.in_production);
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42").unwrap(), 42);
        assert!(matches!(parse_id(""), Err(StoreError::InvalidId(_))));
    }

    #[tokio::test]
    async fn test_operations_fail_softly_before_connect() {
        let store = SqlJobStore::new("postgres://localhost/none", vec!["sc2".to_string()]);
        assert!(!store.is_connected());

        let err = store.get_next("sc2").await.unwrap_err();
        assert!(err.is_disconnected());

        let err = store.get_next("bad name").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTableName(_)));
    }

    #[tokio::test]
    async fn test_poisoned_pool_lock_still_reports_pool() {
        let store = SqlJobStore::new("postgres://localhost/none", vec!["sc2".to_string()]);
        let pool = PgPool::connect_lazy("postgres://localhost/none").unwrap();
        store.set_pool(Some(pool));

        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = store.pool.write().unwrap();
            panic!("writer died holding the lock");
        }));
        assert!(store.pool.is_poisoned());

        assert!(store.is_connected());
        assert!(store.pool().is_ok());
    }
}
