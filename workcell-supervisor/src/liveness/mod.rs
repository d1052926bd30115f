//! Dependency liveness
//!
//! Polls the node registry and turns changes in which dependencies are
//! present into edge-triggered callbacks.

pub mod listener;
pub mod registry;
pub mod tracker;

pub use listener::{DependencyListener, deliver};
pub use registry::{NodeRegistry, RegistryError};
pub use tracker::{DependencyEvent, LivenessTracker};
