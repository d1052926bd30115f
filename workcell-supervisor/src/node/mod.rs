//! Supervisory nodes
//!
//! A node owns one peer connection, registers itself on the bus and runs a
//! single control loop that drains connection events, bus subscriptions
//! and its timers.

pub mod marker;
pub mod robot;

pub use marker::{MarkerBridge, MarkerNode};
pub use robot::RobotNode;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;
use workcell_core::domain::node::error_topic;
use workcell_core::dto::ErrorReport;

use crate::bus::{BusMessage, MessageBus};

/// Funnels the error topics of `dependencies` into one channel
///
/// The returned handles should be aborted when the node stops.
pub(crate) fn forward_errors(
    bus: &dyn MessageBus,
    dependencies: &[String],
) -> (mpsc::UnboundedReceiver<ErrorReport>, Vec<JoinHandle<()>>) {
    let (tx, rx) = mpsc::unbounded_channel();

    let handles = dependencies
        .iter()
        .map(|dep| {
            let topic = error_topic(dep);
            let mut subscription = bus.subscribe(&topic);
            let tx = tx.clone();
            tokio::spawn(async move {
                loop {
                    match subscription.recv().await {
                        Ok(BusMessage::Error(report)) => {
                            if tx.send(report).is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(missed)) => {
                            warn!("Missed {} message(s) on '{}'", missed, topic)
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            })
        })
        .collect();

    (rx, handles)
}
