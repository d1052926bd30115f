//! Marker node
//!
//! Bridges the bus and the laser marker: control requests become
//! `start_laser` / `stop_laser`, laser replies become marking status or
//! error reports.

use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use workcell_core::domain::ErrorRecord;
use workcell_core::domain::error::codes;
use workcell_core::domain::node::{error_topic, node_id};
use workcell_core::dto::{
    ErrorReport, MARKER_CONTROL_TOPIC, MARKER_STATUS_TOPIC, MarkerControl, MarkerStatus,
};
use workcell_core::protocol::{MarkerCommand, MarkerReply};

use crate::bus::{BusMessage, MessageBus};
use crate::config::Config;
use crate::dispatch::DeviceLink;
use crate::transport::{ConnectionEvent, ConnectionManager, Role};

/// Marker protocol handling, independent of the socket
pub struct MarkerBridge {
    node_name: String,
    bus: Arc<dyn MessageBus>,
    link: Arc<dyn DeviceLink>,
    started_at: Option<Instant>,
}

impl MarkerBridge {
    pub fn new(
        node_name: impl Into<String>,
        bus: Arc<dyn MessageBus>,
        link: Arc<dyn DeviceLink>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            bus,
            link,
            started_at: None,
        }
    }

    pub async fn on_control(&mut self, control: MarkerControl) {
        let command = if control.enable {
            info!("Starting marking");
            MarkerCommand::StartLaser
        } else {
            info!("Stopping marking");
            MarkerCommand::StopLaser
        };

        if !self.link.send(&command.to_string()).await {
            self.publish_error(ErrorRecord::marker_connection());
        }
    }

    pub fn on_frame(&mut self, frame: &str) {
        debug!("Marker sent '{}'", frame);

        match MarkerReply::parse(frame) {
            Ok(MarkerReply::Started) => {
                self.started_at = Some(Instant::now());
            }
            Ok(MarkerReply::Stopped) => {
                let duration = self
                    .started_at
                    .take()
                    .map(|t| t.elapsed().as_secs_f64())
                    .unwrap_or_default();
                info!("Marking duration: {:.3} s", duration);
                self.bus.publish(
                    MARKER_STATUS_TOPIC,
                    BusMessage::MarkerStatus(MarkerStatus {
                        marking_successful: true,
                        marking_duration: duration,
                    }),
                );
            }
            Ok(MarkerReply::Error(code)) => {
                self.started_at = None;
                let record = if code == codes::MARKING_START {
                    ErrorRecord::marking_start_failed()
                } else {
                    ErrorRecord::new(code, "laser_error")
                };
                self.publish_error(record);
            }
            Ok(MarkerReply::Busy) => {
                warn!("Marker is busy");
                self.publish_error(ErrorRecord::marker_busy());
            }
            Ok(MarkerReply::Unknown(other)) => {
                warn!("Unknown message from marker: '{}'", other);
            }
            Err(e) => warn!("Malformed marker reply: {}", e),
        }
    }

    fn publish_error(&self, record: ErrorRecord) {
        warn!("{}", record);
        self.bus.publish(
            &error_topic(&self.node_name),
            BusMessage::Error(ErrorReport::new(self.node_name.clone(), record)),
        );
    }
}

pub struct MarkerNode {
    name: String,
    bus: Arc<dyn MessageBus>,
    connection: Arc<ConnectionManager>,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    bridge: MarkerBridge,
}

impl MarkerNode {
    pub fn new(config: &Config, bus: Arc<dyn MessageBus>) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let connection = Arc::new(ConnectionManager::non_blocking(
            config.marker_name.clone(),
            config.marker_addr.clone(),
            Role::Client,
            config.retry_policy(),
            tx,
        ));
        let bridge = MarkerBridge::new(
            config.marker_name.clone(),
            Arc::clone(&bus),
            connection.clone(),
        );

        Self {
            name: config.marker_name.clone(),
            bus,
            connection,
            events,
            bridge,
        }
    }

    /// Runs the control loop until `shutdown` flips
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let id = node_id(&self.name);

        let mut control = self.bus.subscribe(MARKER_CONTROL_TOPIC);
        self.bus.register_node(&id);
        info!("Node '{}' started", id);

        if let Err(e) = self.connection.connect().await {
            warn!("Could not start connecting to the marker: {}", e);
        }

        loop {
            tokio::select! {
                Some(event) = self.events.recv() => self.handle_connection_event(event).await,
                message = control.recv() => match message {
                    Ok(BusMessage::MarkerControl(request)) => self.bridge.on_control(request).await,
                    Ok(other) => debug!("Ignoring {:?} on '{}'", other, MARKER_CONTROL_TOPIC),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Missed {} marker control message(s)", missed)
                    }
                    Err(RecvError::Closed) => {
                        warn!("Marker control topic closed");
                        break;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        info!("Stopping node '{}'", id);
        self.connection.close().await;
        self.bus.unregister_node(&id);
        Ok(())
    }

    async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected { .. } => {
                if let Err(e) = self.connection.start_receive().await {
                    warn!("Could not start receiving from the marker: {}", e);
                }
            }
            ConnectionEvent::Received(outcome) if outcome.success => {
                self.bridge.on_frame(&outcome.message);
            }
            ConnectionEvent::Received(outcome) => {
                warn!("Marker connection lost ({}), reconnecting", outcome.message);
                if let Err(e) = self.connection.connect().await {
                    warn!("Could not reconnect to the marker: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::dispatch::link::testing::RecordingLink;
    use crate::liveness::NodeRegistry;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    fn bridge(link: Arc<RecordingLink>) -> (Arc<LocalBus>, MarkerBridge) {
        let bus = Arc::new(LocalBus::default());
        let bridge = MarkerBridge::new("marker", bus.clone(), link);
        (bus, bridge)
    }

    #[tokio::test]
    async fn test_control_maps_to_laser_commands() {
        let link = Arc::new(RecordingLink::default());
        let (_bus, mut bridge) = bridge(link.clone());

        bridge.on_control(MarkerControl { enable: true }).await;
        bridge.on_control(MarkerControl { enable: false }).await;
        assert_eq!(link.take(), vec!["start_laser", "stop_laser"]);
    }

    #[tokio::test]
    async fn test_unsent_control_reports_connection_error() {
        let (bus, mut bridge) = bridge(Arc::new(RecordingLink::offline()));
        let mut errors = bus.subscribe("marker_error");

        bridge.on_control(MarkerControl { enable: true }).await;
        assert!(matches!(
            errors.try_recv().unwrap(),
            BusMessage::Error(report) if report.error_code == codes::MARKER_CONNECTION
        ));
    }

    #[tokio::test]
    async fn test_stop_publishes_duration() {
        let (bus, mut bridge) = bridge(Arc::new(RecordingLink::default()));
        let mut status = bus.subscribe(MARKER_STATUS_TOPIC);

        bridge.on_frame("laser_started");
        tokio::time::sleep(Duration::from_millis(20)).await;
        bridge.on_frame("laser_stopped");

        match status.try_recv().unwrap() {
            BusMessage::MarkerStatus(report) => {
                assert!(report.marking_successful);
                assert!(report.marking_duration >= 0.02);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_laser_errors_are_published() {
        let (bus, mut bridge) = bridge(Arc::new(RecordingLink::default()));
        let mut errors = bus.subscribe("marker_error");

        bridge.on_frame("laser_error:61");
        bridge.on_frame("laser_error:70");
        bridge.on_frame("laser_busy");
        bridge.on_frame("laser_error:oops");

        let seen: Vec<i32> = std::iter::from_fn(|| errors.try_recv().ok())
            .filter_map(|message| match message {
                BusMessage::Error(report) => Some(report.error_code),
                _ => None,
            })
            .collect();
        assert_eq!(seen, vec![61, 70, 63]);
    }

    #[tokio::test]
    async fn test_marker_node_over_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = Config::default();
        config.marker_addr = listener.local_addr().unwrap().to_string();
        config.retry_delay = Duration::ZERO;

        let bus = Arc::new(LocalBus::default());
        let mut status = bus.subscribe(MARKER_STATUS_TOPIC);
        let node = MarkerNode::new(&config, bus.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(node.run(shutdown_rx));

        let (stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        for _ in 0..200 {
            if bus.node_names().unwrap().contains(&"marker_node".to_string()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        bus.publish(
            MARKER_CONTROL_TOPIC,
            BusMessage::MarkerControl(MarkerControl { enable: true }),
        );
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "start_laser\n");

        writer.write_all(b"laser_started\nlaser_stopped\n").await.unwrap();
        let report = tokio::time::timeout(Duration::from_secs(5), status.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            report,
            BusMessage::MarkerStatus(MarkerStatus {
                marking_successful: true,
                ..
            })
        ));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
        assert!(bus.node_names().unwrap().is_empty());
    }
}
