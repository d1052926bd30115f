//! Connection pool and schema setup

use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

use crate::error::{Result, StoreError};

/// Longest identifier postgres accepts without truncation
const MAX_IDENTIFIER_LEN: usize = 63;

pub async fn create_pool(database_url: &str) -> std::result::Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Creates the job table if it does not exist yet
///
/// Every job table shares the same layout; `id` is the insertion order.
pub async fn ensure_job_table(pool: &PgPool, table: &str) -> Result<()> {
    validate_table_name(table)?;

    let sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id BIGSERIAL PRIMARY KEY,
            item_type VARCHAR(20) NOT NULL,
            part_type VARCHAR(20) NOT NULL,
            remaining INTEGER NOT NULL CHECK (remaining >= 0),
            in_production BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#
    );
    sqlx::query(&sql).execute(pool).await?;

    tracing::info!("Job table '{}' ready", table);
    Ok(())
}

/// Table names are interpolated into SQL, so only plain identifiers pass
pub fn validate_table_name(table: &str) -> Result<()> {
    let mut chars = table.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest && table.len() <= MAX_IDENTIFIER_LEN {
        Ok(())
    } else {
        Err(StoreError::InvalidTableName(table.to_string()))
    }
}
