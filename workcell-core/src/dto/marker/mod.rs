//! Marker DTOs
//!
//! Messages between the robot cell node and the marker node.

use serde::{Deserialize, Serialize};

/// Request to switch the laser on (`true`) or off (`false`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerControl {
    pub enable: bool,
}

/// Result of one marking cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerStatus {
    pub marking_successful: bool,

    /// Time between `laser_started` and `laser_stopped`, in seconds
    pub marking_duration: f64,
}
