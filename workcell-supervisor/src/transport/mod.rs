//! Socket transport
//!
//! Newline-framed TCP connections to the robot controller and the laser
//! marker, with bounded connect retries and a background receive loop.

pub mod connection;
pub mod error;
pub mod retry;

pub use connection::{
    ConnectionEvent, ConnectionManager, ConnectionMode, ConnectionState, ConnectionStats, Role,
};
pub use error::{ConnectionError, TransportError};
pub use retry::{MAX_RETRIES, RetryPolicy};
