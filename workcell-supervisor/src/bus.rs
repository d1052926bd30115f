//! Message bus
//!
//! Topic based publish/subscribe between nodes plus the registry of which
//! nodes are alive. [`LocalBus`] keeps everything in process, one
//! `tokio::sync::broadcast` channel per topic.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;
use workcell_core::dto::{ErrorReport, MarkerControl, MarkerStatus, RobotControl};

use crate::liveness::{NodeRegistry, RegistryError};

/// Payloads carried on the bus
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    RobotControl(RobotControl),
    MarkerControl(MarkerControl),
    MarkerStatus(MarkerStatus),
    Error(ErrorReport),
}

pub trait MessageBus: Send + Sync {
    /// Delivers to current subscribers of `topic`; no-op without any
    fn publish(&self, topic: &str, message: BusMessage);

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage>;

    fn register_node(&self, node_id: &str);

    fn unregister_node(&self, node_id: &str);
}

/// In-process bus shared by every node of one supervisor
pub struct LocalBus {
    capacity: usize,
    topics: Mutex<HashMap<String, broadcast::Sender<BusMessage>>>,
    nodes: Mutex<BTreeSet<String>>,
}

impl LocalBus {
    /// Creates a bus that buffers `capacity` messages per topic
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: Mutex::new(HashMap::new()),
            nodes: Mutex::new(BTreeSet::new()),
        }
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<BusMessage>>> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn nodes(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        self.topics()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl MessageBus for LocalBus {
    fn publish(&self, topic: &str, message: BusMessage) {
        let delivered = self.sender(topic).send(message).unwrap_or(0);
        debug!("Published on '{}' to {} subscriber(s)", topic, delivered);
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        self.sender(topic).subscribe()
    }

    fn register_node(&self, node_id: &str) {
        self.nodes().insert(node_id.to_string());
    }

    fn unregister_node(&self, node_id: &str) {
        self.nodes().remove(node_id);
    }
}

impl NodeRegistry for LocalBus {
    fn node_names(&self) -> Result<Vec<String>, RegistryError> {
        Ok(self.nodes().iter().cloned().collect())
    }
}
