//! Wire protocols
//!
//! Newline-delimited ASCII tokens, one message per frame:
//! - `device`: robot controller <-> robot cell node
//! - `marker`: laser marker <-> marker node

pub mod device;
pub mod marker;

pub use device::{DeviceCommand, DeviceMessage};
pub use marker::{MarkerCommand, MarkerReply};

use thiserror::Error;

/// Frame terminator
pub const FRAME_DELIMITER: char = '\n';

/// Errors raised while decoding a frame
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid error code in '{0}'")]
    InvalidErrorCode(String),
}
