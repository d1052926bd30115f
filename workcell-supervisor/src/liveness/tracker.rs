//! Liveness tracker
//!
//! Keeps the set of missing dependencies from the previous tick. A tick
//! builds a complete new set from the registry and reports only what
//! changed: one event per dependency that flipped, then an aggregate event
//! when the "all online" state flips. A registry failure produces no
//! snapshot and no events.

use std::collections::BTreeSet;
use tracing::{info, warn};
use workcell_core::domain::node::node_id;

use super::registry::NodeRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyEvent {
    Changed { name: String, online: bool },
    AllOnline,
    Offline { missing: Vec<String> },
}

pub struct LivenessTracker {
    dependencies: Vec<String>,
    previous_missing: BTreeSet<String>,
    previous_all_online: bool,
}

impl LivenessTracker {
    /// Creates a tracker whose first snapshot is `registered`
    ///
    /// # Arguments
    /// * `dependencies` - short node names, looked up as `<name>_node`
    /// * `registered` - registry contents at construction time
    pub fn new(dependencies: Vec<String>, registered: &[String]) -> Self {
        let mut tracker = Self {
            dependencies,
            previous_missing: BTreeSet::new(),
            previous_all_online: true,
        };
        tracker.previous_missing = tracker.missing(registered);
        tracker.previous_all_online = tracker.previous_missing.is_empty();

        if !tracker.previous_all_online {
            info!(
                "Waiting for dependencies: {}",
                tracker.missing_dependencies().join(", ")
            );
        }
        tracker
    }

    /// Creates a tracker from the current registry contents
    ///
    /// An unavailable registry counts every dependency as missing.
    pub fn from_registry(dependencies: Vec<String>, registry: &dyn NodeRegistry) -> Self {
        let registered = registry.node_names().unwrap_or_else(|e| {
            warn!("Initial dependency snapshot failed: {}", e);
            Vec::new()
        });
        Self::new(dependencies, &registered)
    }

    /// Dependencies missing as of the last snapshot
    pub fn missing_dependencies(&self) -> Vec<String> {
        self.previous_missing.iter().cloned().collect()
    }

    pub fn all_online(&self) -> bool {
        self.previous_all_online
    }

    fn missing(&self, registered: &[String]) -> BTreeSet<String> {
        self.dependencies
            .iter()
            .filter(|dep| {
                let id = node_id(dep);
                !registered.iter().any(|name| *name == id)
            })
            .cloned()
            .collect()
    }

    /// Compares `registered` against the previous snapshot
    pub fn observe(&mut self, registered: &[String]) -> Vec<DependencyEvent> {
        let current = self.missing(registered);
        let mut events = Vec::new();

        if current != self.previous_missing {
            for name in self.previous_missing.difference(&current) {
                events.push(DependencyEvent::Changed {
                    name: name.clone(),
                    online: true,
                });
            }
            for name in current.difference(&self.previous_missing) {
                events.push(DependencyEvent::Changed {
                    name: name.clone(),
                    online: false,
                });
            }
        }

        let all_online = current.is_empty();
        if all_online && !self.previous_all_online {
            events.push(DependencyEvent::AllOnline);
        } else if !all_online && self.previous_all_online {
            events.push(DependencyEvent::Offline {
                missing: current.iter().cloned().collect(),
            });
        }

        self.previous_missing = current;
        self.previous_all_online = all_online;
        events
    }

    /// One tick against the registry
    pub fn poll(&mut self, registry: &dyn NodeRegistry) -> Vec<DependencyEvent> {
        match registry.node_names() {
            Ok(names) => self.observe(&names),
            Err(e) => {
                warn!("Skipping dependency check: {}", e);
                Vec::new()
            }
        }
    }
}
