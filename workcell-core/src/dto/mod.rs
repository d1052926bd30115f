//! Data Transfer Objects for bus communication
//!
//! This module contains the payloads nodes exchange over the message bus.
//! Each payload type knows the topic it travels on.

pub mod control;
pub mod error;
pub mod marker;

pub use control::RobotControl;
pub use error::ErrorReport;
pub use marker::{MarkerControl, MarkerStatus};

/// Topic carrying operator commands for the robot cell
pub const ROBOT_CONTROL_TOPIC: &str = "robot2_control";

/// Topic carrying laser on/off requests for the marker node
pub const MARKER_CONTROL_TOPIC: &str = "marker_control";

/// Topic carrying marking results published by the marker node
pub const MARKER_STATUS_TOPIC: &str = "marker_status";
