//! Connection manager
//!
//! One TCP endpoint, either a client that connects out or a server that
//! accepts a single peer. Frames are newline terminated text.
//!
//! In blocking mode every call completes inline. In non-blocking mode the
//! connect/accept retries and the receive loop run on [`TaskRunner`]s and
//! report back through a [`ConnectionEvent`] channel that the owning node
//! drains in its control loop.

use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::{debug, error, info, warn};
use workcell_core::protocol::FRAME_DELIMITER;

use super::error::{ConnectionError, TransportError};
use super::retry::RetryPolicy;
use crate::dispatch::DeviceLink;
use crate::task::{ResultLock, TaskOutcome, TaskRunner};

/// Message delivered for a frame that signals the peer went away
pub const EMPTY_MESSAGE: &str = "Empty message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    Blocking,
    NonBlocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Receiving,
}

/// Reported by background connection work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Connect or accept succeeded; fired once per successful batch
    Connected { message: String },

    /// A received frame, or `success == false` when the link dropped
    Received(TaskOutcome),
}

/// Counters exposed for monitoring and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub connect_attempts: u32,
    pub failed_sends: u64,
}

struct Shared {
    label: String,
    addr: String,
    policy: RetryPolicy,
    state: Mutex<ConnectionState>,
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    reader: AsyncMutex<Option<BufReader<OwnedReadHalf>>>,
    listener: AsyncMutex<Option<Arc<TcpListener>>>,
    initial_connect: AtomicBool,
    connect_attempts: AtomicU32,
    failed_sends: AtomicU64,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state() = state;
    }

    async fn install(&self, stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("[{}] Could not set TCP_NODELAY: {}", self.label, e);
        }
        let (read_half, write_half) = stream.into_split();
        *self.reader.lock().await = Some(BufReader::new(read_half));
        *self.writer.lock().await = Some(write_half);
        self.set_state(ConnectionState::Connected);
    }

    /// Drops the peer socket so the next connect starts from scratch
    async fn reset(&self) {
        self.writer.lock().await.take();
        self.reader.lock().await.take();
        self.set_state(ConnectionState::Disconnected);
        self.initial_connect.store(true, Ordering::Release);
    }

    async fn connect_batch(&self) -> TaskOutcome {
        self.set_state(ConnectionState::Connecting);

        let timeout = self.policy.connect_timeout;
        let result = self
            .policy
            .run(&self.connect_attempts, move || async move {
                match tokio::time::timeout(timeout, TcpStream::connect(self.addr.as_str())).await {
                    Ok(Ok(stream)) => Ok(stream),
                    Ok(Err(e)) => Err(TransportError::from_io(&e)),
                    Err(_) => Err(TransportError::TimedOut),
                }
            })
            .await;

        match result {
            Ok(stream) => {
                self.install(stream).await;
                TaskOutcome::ok("Socket connected")
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                TaskOutcome::failed(e.to_string())
            }
        }
    }

    async fn listener(&self) -> Result<Arc<TcpListener>, TransportError> {
        let mut slot = self.listener.lock().await;
        if let Some(listener) = slot.as_ref() {
            return Ok(Arc::clone(listener));
        }
        let listener = Arc::new(TcpListener::bind(self.addr.as_str()).await?);
        *slot = Some(Arc::clone(&listener));
        Ok(listener)
    }

    async fn accept_batch(&self) -> TaskOutcome {
        self.set_state(ConnectionState::Connecting);

        let result = self
            .policy
            .run(&self.connect_attempts, move || async move {
                let listener = self.listener().await?;
                let (stream, peer) = listener.accept().await?;
                Ok::<_, TransportError>((stream, peer))
            })
            .await;

        match result {
            Ok((stream, peer)) => {
                debug!("[{}] Accepted peer {}", self.label, peer);
                self.install(stream).await;
                TaskOutcome::ok("Socket bound and listening...")
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                TaskOutcome::failed(e.to_string())
            }
        }
    }

    fn is_linked(&self) -> bool {
        matches!(
            *self.state(),
            ConnectionState::Connected | ConnectionState::Receiving
        )
    }
}

/// Reads one non-blank frame
///
/// Returns `Ok(None)` on end of stream.
async fn read_frame(
    reader: &mut BufReader<OwnedReadHalf>,
) -> Result<Option<String>, TransportError> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = reader.read_until(FRAME_DELIMITER as u8, &mut buf).await?;
        if read == 0 {
            return Ok(None);
        }
        let frame = String::from_utf8_lossy(&buf);
        let frame = frame.trim_end_matches(['\r', '\n']);
        if !frame.trim().is_empty() {
            return Ok(Some(frame.to_string()));
        }
    }
}

/// Manages one framed TCP endpoint
pub struct ConnectionManager {
    shared: Arc<Shared>,
    role: Role,
    mode: ConnectionMode,
    events: Option<mpsc::UnboundedSender<ConnectionEvent>>,
    result_lock: ResultLock,
    connect_task: Mutex<Option<TaskRunner>>,
    receive_task: Mutex<Option<TaskRunner>>,
}

impl ConnectionManager {
    /// Creates a manager whose calls complete inline
    pub fn blocking(
        label: impl Into<String>,
        addr: impl Into<String>,
        role: Role,
        policy: RetryPolicy,
    ) -> Self {
        Self::new(label.into(), addr.into(), role, ConnectionMode::Blocking, policy, None)
    }

    /// Creates a manager that reports through `events`
    pub fn non_blocking(
        label: impl Into<String>,
        addr: impl Into<String>,
        role: Role,
        policy: RetryPolicy,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        Self::new(
            label.into(),
            addr.into(),
            role,
            ConnectionMode::NonBlocking,
            policy,
            Some(events),
        )
    }

    fn new(
        label: String,
        addr: String,
        role: Role,
        mode: ConnectionMode,
        policy: RetryPolicy,
        events: Option<mpsc::UnboundedSender<ConnectionEvent>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                label,
                addr,
                policy,
                state: Mutex::new(ConnectionState::Disconnected),
                writer: AsyncMutex::new(None),
                reader: AsyncMutex::new(None),
                listener: AsyncMutex::new(None),
                initial_connect: AtomicBool::new(true),
                connect_attempts: AtomicU32::new(0),
                failed_sends: AtomicU64::new(0),
            }),
            role,
            mode,
            events,
            result_lock: Arc::new(AsyncMutex::new(())),
            connect_task: Mutex::new(None),
            receive_task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state()
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            connect_attempts: self.shared.connect_attempts.load(Ordering::Relaxed),
            failed_sends: self.shared.failed_sends.load(Ordering::Relaxed),
        }
    }

    /// Address the server is bound to, once bound
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let listener = self.shared.listener.lock().await;
        listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Connects to the peer (client role)
    ///
    /// Blocking mode returns the outcome of one batch of attempts. Non-blocking
    /// mode starts a background loop that retries batches until one succeeds,
    /// then emits [`ConnectionEvent::Connected`], and returns `None`.
    pub async fn connect(&self) -> Result<Option<TaskOutcome>, ConnectionError> {
        if self.role == Role::Server {
            warn!("[{}] connect() called on a server socket", self.shared.label);
            return Err(ConnectionError::ServerCannotConnect);
        }
        self.open(Shared::connect_batch_owned).await
    }

    /// Binds, listens and accepts one peer (server role)
    ///
    /// Mirrors [`ConnectionManager::connect`].
    pub async fn bind_and_accept(&self) -> Result<Option<TaskOutcome>, ConnectionError> {
        if self.role == Role::Client {
            warn!("[{}] bind_and_accept() called on a client socket", self.shared.label);
            return Err(ConnectionError::ClientCannotBind);
        }
        self.open(Shared::accept_batch_owned).await
    }

    async fn open<F, Fut>(&self, batch: F) -> Result<Option<TaskOutcome>, ConnectionError>
    where
        F: Fn(Arc<Shared>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = TaskOutcome> + Send + 'static,
    {
        let label = self.shared.label.clone();

        if self.shared.is_linked() {
            debug!("[{}] Already connected", label);
            return Ok(match self.mode {
                ConnectionMode::Blocking => Some(TaskOutcome::ok("Socket already connected")),
                ConnectionMode::NonBlocking => None,
            });
        }

        if self.shared.initial_connect.swap(false, Ordering::AcqRel) {
            info!("[{}] Connecting to {}", label, self.shared.addr);
        }

        let Some(events) = self.events.clone() else {
            let outcome = batch(Arc::clone(&self.shared)).await;
            if outcome.success {
                info!("[{}] {}", label, outcome.message);
            } else {
                warn!("[{}] {}", label, outcome.message);
            }
            return Ok(Some(outcome));
        };

        let mut slot = lock_slot(&self.connect_task);
        if slot.as_ref().is_some_and(TaskRunner::is_running) {
            debug!("[{}] Connect loop already running", label);
            return Ok(None);
        }

        let shared = Arc::clone(&self.shared);
        let pause = self.shared.policy.batch_pause();
        let work = move |_lock: ResultLock| {
            let pending = batch(Arc::clone(&shared));
            async move {
                let outcome = pending.await;
                if !outcome.success && !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
                outcome
            }
        };
        let on_result = move |outcome: TaskOutcome| {
            if outcome.success {
                info!("[{}] {}", label, outcome.message);
                let _ = events.send(ConnectionEvent::Connected {
                    message: outcome.message,
                });
                ControlFlow::Break(())
            } else {
                warn!("[{}] {}, retrying", label, outcome.message);
                ControlFlow::Continue(())
            }
        };

        *slot = Some(TaskRunner::start(
            work,
            on_result,
            true,
            Arc::clone(&self.result_lock),
        ));
        Ok(None)
    }

    /// Writes `message` followed by the frame delimiter
    ///
    /// Errors are logged and counted, never returned. Returns whether the
    /// frame was written.
    pub async fn send(&self, message: &str) -> bool {
        let label = &self.shared.label;
        let mut writer = self.shared.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            warn!("[{}] Not connected, dropping '{}'", label, message);
            self.shared.failed_sends.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let frame = format!("{message}{FRAME_DELIMITER}");
        match stream.write_all(frame.as_bytes()).await {
            Ok(()) => {
                debug!("[{}] Sent '{}'", label, message);
                true
            }
            Err(e) => {
                error!("[{}] Socket error in send: {}", label, TransportError::from_io(&e));
                self.shared.failed_sends.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Starts the background receive loop (non-blocking mode)
    ///
    /// Every frame is emitted as a successful [`ConnectionEvent::Received`].
    /// End of stream or a socket error resets the connection, emits one
    /// failed `Received` and ends the loop; the owner is expected to call
    /// [`ConnectionManager::connect`] again.
    pub async fn start_receive(&self) -> Result<(), ConnectionError> {
        let Some(events) = self.events.clone() else {
            warn!("[{}] start_receive() needs non-blocking mode", self.shared.label);
            return Err(ConnectionError::RequiresNonBlocking);
        };
        if self.state() != ConnectionState::Connected {
            warn!("[{}] start_receive() before the socket is connected", self.shared.label);
            return Err(ConnectionError::NotConnected);
        }
        let Some(reader) = self.shared.reader.lock().await.take() else {
            return Err(ConnectionError::NotConnected);
        };

        info!("[{}] Started receiving", self.shared.label);
        self.shared.set_state(ConnectionState::Receiving);

        let reader = Arc::new(AsyncMutex::new(reader));
        let shared = Arc::clone(&self.shared);
        let work = move |_lock: ResultLock| {
            let reader = Arc::clone(&reader);
            let shared = Arc::clone(&shared);
            async move {
                let mut reader = reader.lock().await;
                match read_frame(&mut reader).await {
                    Ok(Some(frame)) => TaskOutcome::ok(frame),
                    Ok(None) => {
                        shared.reset().await;
                        TaskOutcome::failed(EMPTY_MESSAGE)
                    }
                    Err(e) => {
                        shared.reset().await;
                        TaskOutcome::failed(e.to_string())
                    }
                }
            }
        };

        let label = self.shared.label.clone();
        let on_result = move |outcome: TaskOutcome| {
            let success = outcome.success;
            if !success {
                warn!("[{}] Socket disconnected: {}", label, outcome.message);
            }
            let _ = events.send(ConnectionEvent::Received(outcome));
            if success {
                ControlFlow::Continue(())
            } else {
                ControlFlow::Break(())
            }
        };

        *lock_slot(&self.receive_task) = Some(TaskRunner::start(
            work,
            on_result,
            true,
            Arc::clone(&self.result_lock),
        ));
        Ok(())
    }

    /// Reads one frame inline (blocking mode)
    ///
    /// Returns an empty string when the peer closed the connection; the
    /// connection is reset in that case.
    pub async fn receive(&self) -> Result<String, ConnectionError> {
        if self.mode != ConnectionMode::Blocking {
            warn!("[{}] receive() needs blocking mode", self.shared.label);
            return Err(ConnectionError::RequiresBlocking);
        }

        let frame = {
            let mut reader = self.shared.reader.lock().await;
            let Some(reader) = reader.as_mut() else {
                return Err(ConnectionError::NotConnected);
            };
            read_frame(reader).await
        };

        match frame {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => {
                warn!("[{}] Socket disconnected: {}", self.shared.label, EMPTY_MESSAGE);
                self.shared.reset().await;
                Ok(String::new())
            }
            Err(e) => {
                error!("[{}] Socket error in receive: {}", self.shared.label, e);
                self.shared.reset().await;
                Err(e.into())
            }
        }
    }

    /// Stops background work and closes every handle; idempotent
    ///
    /// Returns once the connect and receive tasks have ended.
    pub async fn close(&self) {
        let connect = lock_slot(&self.connect_task).take();
        let receive = lock_slot(&self.receive_task).take();
        for runner in [connect, receive].into_iter().flatten() {
            runner.abort_and_wait().await;
        }
        self.shared.writer.lock().await.take();
        self.shared.reader.lock().await.take();
        self.shared.listener.lock().await.take();
        self.shared.set_state(ConnectionState::Disconnected);
        debug!("[{}] Closed", self.shared.label);
    }
}

impl Shared {
    async fn connect_batch_owned(self: Arc<Self>) -> TaskOutcome {
        self.connect_batch().await
    }

    async fn accept_batch_owned(self: Arc<Self>) -> TaskOutcome {
        self.accept_batch().await
    }
}

fn lock_slot(slot: &Mutex<Option<TaskRunner>>) -> MutexGuard<'_, Option<TaskRunner>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl DeviceLink for ConnectionManager {
    async fn send(&self, frame: &str) -> bool {
        ConnectionManager::send(self, frame).await
    }
}
