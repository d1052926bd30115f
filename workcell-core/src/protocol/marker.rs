//! Laser marker protocol

use std::fmt;

use super::ProtocolError;

/// Frames the marker node sends to the laser marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerCommand {
    StartLaser,
    StopLaser,
}

impl fmt::Display for MarkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerCommand::StartLaser => write!(f, "start_laser"),
            MarkerCommand::StopLaser => write!(f, "stop_laser"),
        }
    }
}

/// Frames the laser marker sends back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerReply {
    Started,
    Stopped,
    /// `laser_error:<code>`
    Error(i32),
    Busy,
    Unknown(String),
}

impl MarkerReply {
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let frame = frame.trim();
        if let Some(code) = frame.strip_prefix("laser_error") {
            let code = code
                .trim_start_matches(':')
                .trim()
                .parse::<i32>()
                .map_err(|_| ProtocolError::InvalidErrorCode(frame.to_string()))?;
            return Ok(Self::Error(code));
        }

        Ok(match frame {
            "laser_started" => Self::Started,
            "laser_stopped" => Self::Stopped,
            "laser_busy" => Self::Busy,
            other => Self::Unknown(other.to_string()),
        })
    }
}
