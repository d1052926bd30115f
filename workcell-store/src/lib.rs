//! Workcell Store
//!
//! Persistence for the queue of job records the robot cell works through.
//!
//! - `repository::JobStore`: the interface the dispatcher depends on
//! - `repository::SqlJobStore`: postgres implementation
//! - `repository::InMemoryJobStore`: process-local implementation

pub mod db;
pub mod error;
pub mod repository;

pub use error::{Result, StoreError};
pub use repository::{InMemoryJobStore, JobStore, SqlJobStore};
