//! Robot controller protocol

use std::fmt;

/// Frames the robot controller sends to the cell node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceMessage {
    JobRequest,
    JobInvalid,
    JobStarted,
    JobSuccess,
    JobFailed,
    StartMarking,
    StopMarking,
    /// Joint telemetry `J|<v1>|<v2>|...`, logged only
    Joints(Vec<String>),
    Unknown(String),
}

impl DeviceMessage {
    pub fn parse(frame: &str) -> Self {
        let frame = frame.trim();
        if let Some(values) = frame.strip_prefix("J|") {
            return Self::Joints(values.split('|').map(str::to_string).collect());
        }

        match frame {
            "JOB_REQUEST" => Self::JobRequest,
            "JOB_INVALID" => Self::JobInvalid,
            "JOB_STARTED" => Self::JobStarted,
            "JOB_SUCCESS" => Self::JobSuccess,
            "JOB_FAILED" => Self::JobFailed,
            "START_MARKING" => Self::StartMarking,
            "STOP_MARKING" => Self::StopMarking,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Frames the cell node sends to the robot controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    Home,
    Pause,
    StartMarking,
    StopMarking,
    MarkingSuccess,
    MarkingError,
    /// Pre-formatted `JS:<TYPE>_<PART>:<remaining>` string
    JobSelect(String),
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCommand::Home => write!(f, "HOME"),
            DeviceCommand::Pause => write!(f, "PAUSE"),
            DeviceCommand::StartMarking => write!(f, "START_MARKING"),
            DeviceCommand::StopMarking => write!(f, "STOP_MARKING"),
            DeviceCommand::MarkingSuccess => write!(f, "MARKING_SUCCESS"),
            DeviceCommand::MarkingError => write!(f, "MARKING_ERROR"),
            DeviceCommand::JobSelect(select) => write!(f, "{select}"),
        }
    }
}
