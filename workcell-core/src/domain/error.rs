//! Error records forwarded to the bus

use serde::{Deserialize, Serialize};

/// A failure reported by a node
///
/// Created where the failure happens and published once on the node's error
/// topic. Records are never retried or deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub code: i32,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The robot rejected the job select command
    pub fn invalid_job() -> Self {
        Self::new(codes::INVALID_JOB, "The robot job was invalid")
    }

    /// The robot reported a failed job
    pub fn job_failed() -> Self {
        Self::new(codes::JOB_FAILED, "The robot job has failed")
    }

    /// The laser marker refused to start
    pub fn marking_start_failed() -> Self {
        Self::new(codes::MARKING_START, "Could not start marking")
    }

    /// A marker command could not be delivered
    pub fn marker_connection() -> Self {
        Self::new(codes::MARKER_CONNECTION, "Could not connect to marker")
    }

    /// The laser marker is still busy with a previous command
    pub fn marker_busy() -> Self {
        Self::new(codes::MARKER_BUSY, "Marker is busy")
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Well-known error codes
pub mod codes {
    pub const INVALID_JOB: i32 = 21;
    pub const JOB_FAILED: i32 = 22;
    pub const MARKING_START: i32 = 61;
    pub const MARKER_CONNECTION: i32 = 62;
    pub const MARKER_BUSY: i32 = 63;
}
