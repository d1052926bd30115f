//! Job dispatch controller
//!
//! State machine between the operator (bus control topic), the robot
//! controller (device frames) and the marker node (bus marker topics).
//!
//! ```text
//!   Idle --JOB_REQUEST / start-marking--> AwaitingJobStart
//!   AwaitingJobStart --JOB_STARTED--> Running
//!   AwaitingJobStart --JOB_INVALID--> Idle
//!   Running --JOB_SUCCESS / JOB_FAILED--> Idle
//!   Running --START_MARKING--> Marking --STOP_MARKING--> Running
//! ```
//!
//! Expected states are advisory: an event in the wrong state is logged and
//! counted, then handled anyway. Store failures never stop the controller.

use std::sync::Arc;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use workcell_core::domain::node::error_topic;
use workcell_core::domain::{ErrorRecord, JobRecord};
use workcell_core::dto::{
    ErrorReport, MARKER_CONTROL_TOPIC, MarkerControl, MarkerStatus, RobotControl,
};
use workcell_core::protocol::{DeviceCommand, DeviceMessage};
use workcell_store::JobStore;

use super::link::DeviceLink;
use crate::bus::{BusMessage, MessageBus};
use crate::liveness::DependencyListener;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    AwaitingJobStart,
    Running,
    Marking,
}

/// Counters for conditions that are handled but worth watching
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Times the cached job was missing and had to be re-fetched
    pub resyncs: u64,
    /// Events received in a state that does not expect them
    pub out_of_order: u64,
    pub jobs_sent: u64,
    pub errors_published: u64,
}

pub struct JobDispatcher {
    node_name: String,
    marker_node: String,
    table: String,
    store: Arc<dyn JobStore>,
    bus: Arc<dyn MessageBus>,
    link: Arc<dyn DeviceLink>,
    state: DispatchState,
    current_item: Option<JobRecord>,
    stats: DispatchStats,
}

impl JobDispatcher {
    /// Creates an idle dispatcher
    ///
    /// # Arguments
    /// * `node_name` - name errors are published under
    /// * `marker_node` - name of the marker node whose errors abort marking
    /// * `table` - job table to take work from
    pub fn new(
        node_name: impl Into<String>,
        marker_node: impl Into<String>,
        table: impl Into<String>,
        store: Arc<dyn JobStore>,
        bus: Arc<dyn MessageBus>,
        link: Arc<dyn DeviceLink>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            marker_node: marker_node.into(),
            table: table.into(),
            store,
            bus,
            link,
            state: DispatchState::Idle,
            current_item: None,
            stats: DispatchStats::default(),
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn current_item(&self) -> Option<&JobRecord> {
        self.current_item.as_ref()
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    // =========================================================================
    // Inputs
    // =========================================================================

    /// Operator command; `home` wins over `start_marking`, which wins over `pause`
    pub async fn on_control(&mut self, control: RobotControl) {
        if control.home {
            info!("Homing robot");
            self.send(DeviceCommand::Home).await;
        } else if control.start_marking {
            info!("Starting marking");
            self.send(DeviceCommand::StartMarking).await;
            if self.send_job().await {
                self.state = DispatchState::AwaitingJobStart;
            }
        } else if control.pause {
            info!("Pausing robot");
            self.send(DeviceCommand::Pause).await;
        }
    }

    /// One frame from the robot controller
    pub async fn on_device_frame(&mut self, frame: &str) {
        match DeviceMessage::parse(frame) {
            DeviceMessage::JobRequest => {
                info!("Robot requested a job");
                if self.send_job().await {
                    self.state = DispatchState::AwaitingJobStart;
                }
            }
            DeviceMessage::JobInvalid => {
                self.expect_state("JOB_INVALID", &[DispatchState::AwaitingJobStart]);
                self.set_in_production(false).await;
                self.publish_error(ErrorRecord::invalid_job());
                self.state = DispatchState::Idle;
            }
            DeviceMessage::JobStarted => {
                self.expect_state("JOB_STARTED", &[DispatchState::AwaitingJobStart]);
                info!("Robot started the job");
                self.set_in_production(true).await;
                self.state = DispatchState::Running;
            }
            DeviceMessage::JobSuccess => {
                self.expect_state("JOB_SUCCESS", &[DispatchState::Running]);
                info!("Robot finished the job");
                self.set_in_production(false).await;
                if self.decrement_remaining().await == Some(0) {
                    self.remove_done_item().await;
                }
                self.state = DispatchState::Idle;
            }
            DeviceMessage::JobFailed => {
                self.expect_state("JOB_FAILED", &[DispatchState::Running]);
                self.set_in_production(false).await;
                self.publish_error(ErrorRecord::job_failed());
                self.state = DispatchState::Idle;
            }
            DeviceMessage::StartMarking => {
                self.expect_state("START_MARKING", &[DispatchState::Running]);
                info!("Robot requested marker start");
                self.publish_marker(true);
                self.state = DispatchState::Marking;
            }
            DeviceMessage::StopMarking => {
                self.expect_state("STOP_MARKING", &[DispatchState::Marking]);
                info!("Robot requested marker stop");
                self.publish_marker(false);
                self.state = DispatchState::Running;
            }
            DeviceMessage::Joints(values) => {
                debug!("Joint states: {}", values.join(", "));
            }
            DeviceMessage::Unknown(other) => {
                warn!("Unknown message from robot: '{}'", other);
            }
        }
    }

    /// Marking result from the marker node
    ///
    /// The marker reports after the laser stops, so the robot has usually
    /// already sent `STOP_MARKING`; both `Marking` and `Running` are expected.
    pub async fn on_marker_status(&mut self, status: MarkerStatus) {
        if !status.marking_successful {
            warn!("Marker reported an unsuccessful marking");
            return;
        }

        info!("Marking finished in {:.2} s", status.marking_duration);
        self.expect_state(
            "marker status",
            &[DispatchState::Marking, DispatchState::Running],
        );
        self.send(DeviceCommand::MarkingSuccess).await;
        self.state = DispatchState::Running;
    }

    /// Marks the cached job as not in production before the node exits
    pub async fn shutdown(&mut self) {
        if !self.store.is_connected() {
            return;
        }
        let Some(item) = self.current_item.as_mut() else {
            return;
        };
        if item.in_production {
            item.in_production = false;
            let item = item.clone();
            self.write(&item).await;
        }
    }

    // =========================================================================
    // Store operations
    // =========================================================================

    /// Fetches the next job and sends its select command
    ///
    /// Always re-queries the store; the previous cache is dropped. Returns
    /// whether a job was sent.
    async fn send_job(&mut self) -> bool {
        self.current_item = None;

        let item = match self.store.get_next(&self.table).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                warn!("No jobs queued in '{}'", self.table);
                return false;
            }
            Err(e) if e.is_disconnected() => {
                warn!("Job store offline, no job sent until it reconnects");
                return false;
            }
            Err(e) => {
                error!("Could not fetch the next job: {}", e);
                return false;
            }
        };

        let select = item.job_select();
        info!("Sending job {} ({})", item.id, select);
        self.current_item = Some(item);

        let sent = self.send(DeviceCommand::JobSelect(select)).await;
        if sent {
            self.stats.jobs_sent += 1;
        }
        sent
    }

    /// Makes sure a job is cached, re-fetching it when it is not
    async fn ensure_current_item(&mut self) -> bool {
        if self.current_item.is_some() {
            return true;
        }

        self.stats.resyncs += 1;
        warn!("No cached job, re-fetching from '{}'", self.table);
        match self.store.get_next(&self.table).await {
            Ok(Some(item)) => {
                self.current_item = Some(item);
                true
            }
            Ok(None) => {
                warn!("No job to re-sync with");
                false
            }
            Err(e) => {
                warn!("Could not re-sync the current job: {}", e);
                false
            }
        }
    }

    async fn set_in_production(&mut self, in_production: bool) {
        if !self.ensure_current_item().await {
            return;
        }
        let Some(item) = self.current_item.as_mut() else {
            return;
        };
        item.in_production = in_production;
        let item = item.clone();
        self.write(&item).await;
    }

    /// Decrements the cached job, never below zero
    ///
    /// Returns the remaining count, or `None` when no job is available.
    async fn decrement_remaining(&mut self) -> Option<u32> {
        if !self.ensure_current_item().await {
            return None;
        }
        let item = self.current_item.as_mut()?;
        if !item.decrement() {
            warn!("Job {} has no runs left to count down", item.id);
            return Some(0);
        }
        let item = item.clone();
        self.write(&item).await;
        Some(item.remaining)
    }

    async fn remove_done_item(&mut self) {
        let Some(item) = self.current_item.as_ref() else {
            return;
        };
        if !item.is_consumed() {
            warn!("Not removing job {}: {} run(s) left", item.id, item.remaining);
            return;
        }

        let id = item.id.clone();
        match self.store.delete(&self.table, &id).await {
            Ok(true) => {
                info!("Job {} done, removed from '{}'", id, self.table);
                self.current_item = None;
            }
            Ok(false) => {
                warn!("Job {} was already removed", id);
                self.current_item = None;
            }
            Err(e) => warn!("Could not remove job {}: {}", id, e),
        }
    }

    async fn write(&self, item: &JobRecord) {
        match self.store.update(&self.table, item).await {
            Ok(true) => debug!("Job {} updated", item.id),
            Ok(false) => warn!("Job {} no longer exists", item.id),
            Err(e) => warn!("Could not update job {}: {}", item.id, e),
        }
    }

    // =========================================================================
    // Outputs
    // =========================================================================

    async fn send(&self, command: DeviceCommand) -> bool {
        let sent = self.link.send(&command.to_string()).await;
        if !sent {
            warn!("Could not send {} to the robot", command);
        }
        sent
    }

    fn publish_marker(&self, enable: bool) {
        self.bus.publish(
            MARKER_CONTROL_TOPIC,
            BusMessage::MarkerControl(MarkerControl { enable }),
        );
    }

    fn publish_error(&mut self, record: ErrorRecord) {
        error!("{}", record);
        self.stats.errors_published += 1;
        self.bus.publish(
            &error_topic(&self.node_name),
            BusMessage::Error(ErrorReport::new(self.node_name.clone(), record)),
        );
    }

    fn expect_state(&mut self, event: &str, expected: &[DispatchState]) {
        if !expected.contains(&self.state) {
            warn!("{} received while {:?}", event, self.state);
            self.stats.out_of_order += 1;
        }
    }
}

#[async_trait]
impl DependencyListener for JobDispatcher {
    async fn on_dependency_change(&mut self, name: &str, online: bool) {
        if online {
            info!("Dependency '{}' is online", name);
        } else {
            warn!("Dependency '{}' went offline", name);
        }
    }

    async fn on_all_dependencies_online(&mut self) {
        info!("All dependencies online");
    }

    async fn on_dependencies_offline(&mut self, missing: &[String]) {
        warn!("Waiting for dependencies: {}", missing.join(", "));
    }

    async fn on_error(&mut self, report: ErrorReport) {
        error!("Error from '{}': {}", report.node_name, report.record());

        if report.node_name == self.marker_node && self.state == DispatchState::Marking {
            self.send(DeviceCommand::MarkingError).await;
            self.state = DispatchState::Running;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::dispatch::link::testing::RecordingLink;
    use workcell_core::domain::error::codes;
    use workcell_store::InMemoryJobStore;

    const TABLE: &str = "sc2";

    struct Fixture {
        store: Arc<InMemoryJobStore>,
        bus: Arc<LocalBus>,
        link: Arc<RecordingLink>,
        dispatcher: JobDispatcher,
    }

    async fn fixture(jobs: &[(&str, &str, u32)]) -> Fixture {
        let store = Arc::new(InMemoryJobStore::new());
        for (item, part, remaining) in jobs {
            store
                .insert(TABLE, &JobRecord::new(*item, *part, *remaining))
                .await
                .unwrap();
        }
        let bus = Arc::new(LocalBus::default());
        let link = Arc::new(RecordingLink::default());
        let dispatcher = JobDispatcher::new(
            "robot2",
            "marker",
            TABLE,
            store.clone(),
            bus.clone(),
            link.clone(),
        );
        Fixture {
            store,
            bus,
            link,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn test_start_marking_sends_job_and_success_decrements() {
        let mut f = fixture(&[("BELL", "A", 2)]).await;

        f.dispatcher.on_control(RobotControl::start_marking()).await;
        assert_eq!(f.link.take(), vec!["START_MARKING", "JS:BELL_A:2"]);
        assert_eq!(f.dispatcher.state(), DispatchState::AwaitingJobStart);

        f.dispatcher.on_device_frame("JOB_STARTED").await;
        assert_eq!(f.dispatcher.state(), DispatchState::Running);
        assert!(f.store.records(TABLE)[0].in_production);

        f.dispatcher.on_device_frame("JOB_SUCCESS").await;
        assert_eq!(f.dispatcher.state(), DispatchState::Idle);
        let records = f.store.records(TABLE);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].remaining, 1);
        assert!(!records[0].in_production);
        assert_eq!(f.dispatcher.stats().out_of_order, 0);
    }

    #[tokio::test]
    async fn test_record_deleted_when_last_run_succeeds() {
        let mut f = fixture(&[("BELL", "A", 2)]).await;

        for expected in ["JS:BELL_A:2", "JS:BELL_A:1"] {
            f.dispatcher.on_device_frame("JOB_REQUEST").await;
            assert_eq!(f.link.take(), vec![expected]);
            f.dispatcher.on_device_frame("JOB_STARTED").await;
            f.dispatcher.on_device_frame("JOB_SUCCESS").await;
        }

        assert!(f.store.records(TABLE).is_empty());
        assert!(f.dispatcher.current_item().is_none());
        assert_eq!(f.dispatcher.stats().resyncs, 0);
    }

    #[tokio::test]
    async fn test_invalid_job_publishes_error_without_delete() {
        let mut f = fixture(&[("BELL", "A", 2)]).await;
        let mut errors = f.bus.subscribe("robot2_error");

        f.dispatcher.on_device_frame("JOB_REQUEST").await;
        f.dispatcher.on_device_frame("JOB_INVALID").await;

        assert_eq!(f.dispatcher.state(), DispatchState::Idle);
        let records = f.store.records(TABLE);
        assert_eq!(records.len(), 1);
        assert!(!records[0].in_production);

        match errors.try_recv().unwrap() {
            BusMessage::Error(report) => {
                assert_eq!(report.node_name, "robot2");
                assert_eq!(report.error_code, codes::INVALID_JOB);
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_job_publishes_error() {
        let mut f = fixture(&[("BELL", "A", 2)]).await;
        let mut errors = f.bus.subscribe("robot2_error");

        f.dispatcher.on_device_frame("JOB_REQUEST").await;
        f.dispatcher.on_device_frame("JOB_STARTED").await;
        f.dispatcher.on_device_frame("JOB_FAILED").await;

        assert_eq!(f.dispatcher.state(), DispatchState::Idle);
        assert!(!f.store.records(TABLE)[0].in_production);
        assert_eq!(f.store.records(TABLE)[0].remaining, 2);
        assert!(matches!(
            errors.try_recv().unwrap(),
            BusMessage::Error(report) if report.error_code == codes::JOB_FAILED
        ));
    }

    #[tokio::test]
    async fn test_empty_queue_sends_nothing() {
        let mut f = fixture(&[]).await;

        f.dispatcher.on_device_frame("JOB_REQUEST").await;
        assert!(f.link.take().is_empty());
        assert_eq!(f.dispatcher.state(), DispatchState::Idle);
    }

    #[tokio::test]
    async fn test_success_without_cache_resyncs_to_next_row() {
        let mut f = fixture(&[("BELL", "A", 1), ("BELL", "B", 3)]).await;

        f.dispatcher.on_device_frame("JOB_REQUEST").await;
        f.dispatcher.on_device_frame("JOB_STARTED").await;
        f.dispatcher.on_device_frame("JOB_SUCCESS").await;
        assert_eq!(f.store.records(TABLE).len(), 1);

        // A duplicate success has no cached job; the next row absorbs it
        f.dispatcher.on_device_frame("JOB_SUCCESS").await;
        let stats = f.dispatcher.stats();
        assert_eq!(stats.resyncs, 1);
        assert_eq!(stats.out_of_order, 1);

        let records = f.store.records(TABLE);
        assert_eq!(records[0].part_type, "B");
        assert_eq!(records[0].remaining, 2);
    }

    #[tokio::test]
    async fn test_remaining_never_goes_below_zero() {
        let mut f = fixture(&[("BELL", "A", 0)]).await;

        f.dispatcher.on_device_frame("JOB_SUCCESS").await;

        assert_eq!(f.dispatcher.stats().resyncs, 1);
        // The consumed row is cleaned up instead of going negative
        assert!(f.store.records(TABLE).is_empty());
    }

    #[tokio::test]
    async fn test_success_on_empty_store_is_harmless() {
        let mut f = fixture(&[]).await;

        f.dispatcher.on_device_frame("JOB_SUCCESS").await;
        assert_eq!(f.dispatcher.state(), DispatchState::Idle);
        assert!(f.dispatcher.stats().resyncs >= 1);
    }

    #[tokio::test]
    async fn test_marking_round_trip() {
        let mut f = fixture(&[("BELL", "A", 2)]).await;
        let mut marker = f.bus.subscribe(MARKER_CONTROL_TOPIC);

        f.dispatcher.on_device_frame("JOB_REQUEST").await;
        f.dispatcher.on_device_frame("JOB_STARTED").await;
        f.link.take();

        f.dispatcher.on_device_frame("START_MARKING").await;
        assert_eq!(f.dispatcher.state(), DispatchState::Marking);
        assert_eq!(
            marker.try_recv().unwrap(),
            BusMessage::MarkerControl(MarkerControl { enable: true })
        );

        f.dispatcher.on_device_frame("STOP_MARKING").await;
        assert_eq!(f.dispatcher.state(), DispatchState::Running);
        assert_eq!(
            marker.try_recv().unwrap(),
            BusMessage::MarkerControl(MarkerControl { enable: false })
        );

        f.dispatcher
            .on_marker_status(MarkerStatus {
                marking_successful: true,
                marking_duration: 1.5,
            })
            .await;
        assert_eq!(f.link.take(), vec!["MARKING_SUCCESS"]);
        assert_eq!(f.dispatcher.state(), DispatchState::Running);
        assert_eq!(f.dispatcher.stats().out_of_order, 0);
    }

    #[tokio::test]
    async fn test_marker_error_aborts_marking() {
        let mut f = fixture(&[("BELL", "A", 2)]).await;
        f.dispatcher.on_device_frame("JOB_REQUEST").await;
        f.dispatcher.on_device_frame("JOB_STARTED").await;
        f.dispatcher.on_device_frame("START_MARKING").await;
        f.link.take();

        f.dispatcher
            .on_error(ErrorReport::new("marker", ErrorRecord::marker_busy()))
            .await;
        assert_eq!(f.link.take(), vec!["MARKING_ERROR"]);
        assert_eq!(f.dispatcher.state(), DispatchState::Running);

        // Outside marking the error is only logged
        f.dispatcher
            .on_error(ErrorReport::new("marker", ErrorRecord::marker_busy()))
            .await;
        assert!(f.link.take().is_empty());
    }

    #[tokio::test]
    async fn test_control_precedence() {
        let mut f = fixture(&[("BELL", "A", 2)]).await;

        f.dispatcher
            .on_control(RobotControl {
                home: true,
                start_marking: true,
                pause: true,
            })
            .await;
        assert_eq!(f.link.take(), vec!["HOME"]);

        f.dispatcher.on_control(RobotControl::pause()).await;
        assert_eq!(f.link.take(), vec!["PAUSE"]);
        assert_eq!(f.dispatcher.state(), DispatchState::Idle);
    }

    #[tokio::test]
    async fn test_store_outage_is_soft() {
        let mut f = fixture(&[("BELL", "A", 2)]).await;
        f.store.set_connected(false);

        f.dispatcher.on_device_frame("JOB_REQUEST").await;
        assert!(f.link.take().is_empty());
        assert_eq!(f.dispatcher.state(), DispatchState::Idle);

        f.store.set_connected(true);
        f.dispatcher.on_device_frame("JOB_REQUEST").await;
        assert_eq!(f.link.take(), vec!["JS:BELL_A:2"]);
    }

    #[tokio::test]
    async fn test_telemetry_and_unknown_frames_change_nothing() {
        let mut f = fixture(&[("BELL", "A", 2)]).await;

        f.dispatcher.on_device_frame("J|0.1|0.2|0.3").await;
        f.dispatcher.on_device_frame("BOGUS").await;
        assert!(f.link.take().is_empty());
        assert_eq!(f.dispatcher.state(), DispatchState::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_clears_in_production() {
        let mut f = fixture(&[("BELL", "A", 2)]).await;
        f.dispatcher.on_device_frame("JOB_REQUEST").await;
        f.dispatcher.on_device_frame("JOB_STARTED").await;
        assert!(f.store.records(TABLE)[0].in_production);

        f.dispatcher.shutdown().await;
        assert!(!f.store.records(TABLE)[0].in_production);
    }

    #[tokio::test]
    async fn test_offline_link_keeps_state() {
        let store = Arc::new(InMemoryJobStore::new());
        store
            .insert(TABLE, &JobRecord::new("BELL", "A", 2))
            .await
            .unwrap();
        let mut dispatcher = JobDispatcher::new(
            "robot2",
            "marker",
            TABLE,
            store,
            Arc::new(LocalBus::default()),
            Arc::new(RecordingLink::offline()),
        );

        dispatcher.on_device_frame("JOB_REQUEST").await;
        assert_eq!(dispatcher.state(), DispatchState::Idle);
        assert_eq!(dispatcher.stats().jobs_sent, 0);
    }
}
