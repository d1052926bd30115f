//! Error types for the job store

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur when talking to the job store
#[derive(Debug, Error)]
pub enum StoreError {
    /// No live connection; the caller should retry after `connect`
    #[error("Server disconnected")]
    Disconnected,

    /// Connecting to the database failed
    #[error("Could not connect to database: {0}")]
    ConnectFailed(String),

    /// Table name is not a plain SQL identifier
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    /// Record id is not one the store could have assigned
    #[error("Invalid record id: {0}")]
    InvalidId(String),

    /// Query failed for a reason other than connectivity
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Check if this error means the connection is gone
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected | Self::ConnectFailed(_))
    }
}
