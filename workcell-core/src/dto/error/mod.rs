//! Error DTOs
//!
//! Payload published on `<node>_error` topics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::ErrorRecord;

/// An error record tagged with the node that raised it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub node_name: String,
    pub error_msg: String,
    pub error_code: i32,
    pub reported_at: DateTime<Utc>,
}

impl ErrorReport {
    pub fn new(node_name: impl Into<String>, record: ErrorRecord) -> Self {
        Self {
            node_name: node_name.into(),
            error_msg: record.message,
            error_code: record.code,
            reported_at: Utc::now(),
        }
    }

    /// The record this report was built from
    pub fn record(&self) -> ErrorRecord {
        ErrorRecord::new(self.error_code, self.error_msg.clone())
    }
}
