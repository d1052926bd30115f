//! Core domain types
//!
//! This module contains the structures shared by the store and the
//! supervisor nodes: queued job records, error records and node naming.

pub mod error;
pub mod job;
pub mod node;

pub use error::ErrorRecord;
pub use job::JobRecord;
