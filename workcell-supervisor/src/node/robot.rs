//! Robot cell node
//!
//! Connects to the robot controller, feeds its frames and the operator's
//! commands into the [`JobDispatcher`], and watches its dependencies and
//! the job store on fixed intervals.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};
use workcell_core::domain::node::node_id;
use workcell_core::dto::{MARKER_STATUS_TOPIC, ROBOT_CONTROL_TOPIC};
use workcell_store::JobStore;

use super::forward_errors;
use crate::bus::{BusMessage, MessageBus};
use crate::config::Config;
use crate::dispatch::JobDispatcher;
use crate::liveness::{DependencyListener, LivenessTracker, NodeRegistry, deliver};
use crate::transport::{ConnectionEvent, ConnectionManager, Role};

pub struct RobotNode {
    config: Config,
    bus: Arc<dyn MessageBus>,
    registry: Arc<dyn NodeRegistry>,
    store: Arc<dyn JobStore>,
    connection: Arc<ConnectionManager>,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    dispatcher: JobDispatcher,
    tracker: LivenessTracker,
}

impl RobotNode {
    /// Creates the node and takes the initial dependency snapshot
    pub fn new(
        config: Config,
        bus: Arc<dyn MessageBus>,
        registry: Arc<dyn NodeRegistry>,
        store: Arc<dyn JobStore>,
    ) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let connection = Arc::new(ConnectionManager::non_blocking(
            config.node_name.clone(),
            config.device_addr.clone(),
            Role::Client,
            config.retry_policy(),
            tx,
        ));

        let dispatcher = JobDispatcher::new(
            config.node_name.clone(),
            config.marker_name.clone(),
            config.job_table.clone(),
            Arc::clone(&store),
            Arc::clone(&bus),
            connection.clone(),
        );
        let tracker = LivenessTracker::from_registry(config.dependencies.clone(), registry.as_ref());

        Self {
            config,
            bus,
            registry,
            store,
            connection,
            events,
            dispatcher,
            tracker,
        }
    }

    /// Runs the control loop until `shutdown` flips
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let id = node_id(&self.config.node_name);

        let mut control = self.bus.subscribe(ROBOT_CONTROL_TOPIC);
        let mut status = self.bus.subscribe(MARKER_STATUS_TOPIC);
        let (mut errors, forwarders) = forward_errors(self.bus.as_ref(), &self.config.dependencies);
        self.bus.register_node(&id);
        info!("Node '{}' started", id);

        self.refresh_store().await;
        if let Err(e) = self.connection.connect().await {
            warn!("Could not start connecting to the robot: {}", e);
        }

        let mut liveness = time::interval(self.config.dependency_check_interval);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut store_refresh = time::interval(self.config.store_refresh_interval);
        store_refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                Some(event) = self.events.recv() => self.handle_connection_event(event).await,
                message = control.recv() => match message {
                    Ok(BusMessage::RobotControl(command)) => self.dispatcher.on_control(command).await,
                    Ok(other) => debug!("Ignoring {:?} on '{}'", other, ROBOT_CONTROL_TOPIC),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Missed {} control message(s)", missed)
                    }
                    Err(RecvError::Closed) => {
                        warn!("Control topic closed");
                        break;
                    }
                },
                message = status.recv() => match message {
                    Ok(BusMessage::MarkerStatus(report)) => {
                        self.dispatcher.on_marker_status(report).await
                    }
                    Ok(other) => debug!("Ignoring {:?} on '{}'", other, MARKER_STATUS_TOPIC),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Missed {} marker status message(s)", missed)
                    }
                    Err(RecvError::Closed) => {
                        warn!("Marker status topic closed");
                        break;
                    }
                },
                Some(report) = errors.recv() => self.dispatcher.on_error(report).await,
                _ = liveness.tick() => {
                    let events = self.tracker.poll(self.registry.as_ref());
                    deliver(events, &mut self.dispatcher).await;
                }
                _ = store_refresh.tick() => self.refresh_store().await,
                _ = shutdown.changed() => break,
            }
        }

        for forwarder in forwarders {
            forwarder.abort();
        }
        self.shutdown(&id).await;
        Ok(())
    }

    async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected { .. } => {
                if let Err(e) = self.connection.start_receive().await {
                    warn!("Could not start receiving from the robot: {}", e);
                }
            }
            ConnectionEvent::Received(outcome) if outcome.success => {
                self.dispatcher.on_device_frame(&outcome.message).await;
            }
            ConnectionEvent::Received(outcome) => {
                warn!("Robot connection lost ({}), reconnecting", outcome.message);
                if let Err(e) = self.connection.connect().await {
                    warn!("Could not reconnect to the robot: {}", e);
                }
            }
        }
    }

    async fn refresh_store(&self) {
        if self.store.is_connected() {
            return;
        }
        match self.store.connect().await {
            Ok(()) => info!("Job store connected"),
            Err(e) => warn!("Job store unavailable: {}", e),
        }
    }

    async fn shutdown(&mut self, id: &str) {
        info!("Stopping node '{}'", id);
        self.dispatcher.shutdown().await;
        self.connection.close().await;
        self.store.close().await;
        self.bus.unregister_node(id);
    }
}
