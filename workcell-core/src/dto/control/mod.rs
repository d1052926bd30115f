//! Robot control DTOs
//!
//! Operator commands sent to the robot cell node.

use serde::{Deserialize, Serialize};

/// Command flags for the robot cell
///
/// When several flags are set, `home` wins over `start_marking`, which wins
/// over `pause`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotControl {
    pub home: bool,
    pub start_marking: bool,
    pub pause: bool,
}

impl RobotControl {
    pub fn home() -> Self {
        Self {
            home: true,
            ..Self::default()
        }
    }

    pub fn start_marking() -> Self {
        Self {
            start_marking: true,
            ..Self::default()
        }
    }

    pub fn pause() -> Self {
        Self {
            pause: true,
            ..Self::default()
        }
    }
}
