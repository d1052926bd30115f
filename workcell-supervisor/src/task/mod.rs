//! Background task layer
//!
//! Runs a unit of work off the caller's task, once or in a loop, and hands
//! each result back through a callback. Knows nothing about sockets or jobs.

pub mod runner;

pub use runner::{ResultLock, TaskError, TaskOutcome, TaskRunner};
