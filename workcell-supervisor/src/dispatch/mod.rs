//! Job dispatch
//!
//! Drives the robot controller through job selection, execution and
//! marking, keeping the job store in step.

pub mod controller;
pub mod link;

pub use controller::{DispatchState, DispatchStats, JobDispatcher};
pub use link::DeviceLink;
