//! Workcell supervisor
//!
//! Supervisory nodes for a robot cell and its laser marker.
//!
//! Architecture:
//! - `task`: background work with serialized result delivery
//! - `transport`: newline-framed TCP connections with bounded retries
//! - `liveness`: edge-triggered dependency tracking over the node registry
//! - `dispatch`: the job state machine between operator, robot and store
//! - `bus`: in-process topics and node registry
//! - `node`: the control loops that wire everything together

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod liveness;
pub mod node;
pub mod task;
pub mod transport;

pub use config::Config;
