//! Repository layer
//!
//! Data access for queued job records. The dispatcher only ever needs the
//! row with the smallest insertion id, plus single-row update, delete and
//! insert.
//!
//! All repositories are trait-based to enable testing and mocking.

mod memory;
mod sql;

pub use memory::InMemoryJobStore;
pub use sql::SqlJobStore;

use async_trait::async_trait;
use workcell_core::domain::JobRecord;

use crate::error::Result;

/// Repository trait for job records
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Opens the connection if it is not already open
    ///
    /// Safe to call repeatedly; the supervisor calls it on a fixed interval
    /// while `is_connected` is false.
    async fn connect(&self) -> Result<()>;

    /// Whether the last known state of the connection is up
    fn is_connected(&self) -> bool;

    /// Returns the row with the smallest insertion id, if any
    async fn get_next(&self, table: &str) -> Result<Option<JobRecord>>;

    /// Stores a new record and returns it with its assigned id
    async fn insert(&self, table: &str, record: &JobRecord) -> Result<JobRecord>;

    /// Overwrites `remaining` and `in_production` of an existing row
    ///
    /// Returns `false` when no row has the record's id.
    async fn update(&self, table: &str, record: &JobRecord) -> Result<bool>;

    /// Deletes a row by id
    ///
    /// Returns `false` when no row has that id.
    async fn delete(&self, table: &str, id: &str) -> Result<bool>;

    /// Closes the connection
    async fn close(&self);
}
