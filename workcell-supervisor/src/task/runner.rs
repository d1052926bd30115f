//! Task runner
//!
//! A [`TaskRunner`] owns one spawned tokio task. The work closure produces a
//! [`TaskOutcome`]; the result callback consumes it while holding a
//! [`ResultLock`] shared by every runner that touches the same state, so two
//! runners never deliver results at the same time.

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

/// Lock held while a result callback runs
///
/// Also handed to the work closure so work can touch the same state safely.
pub type ResultLock = Arc<Mutex<()>>;

/// Result of one unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub success: bool,
    pub message: String,
}

impl TaskOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Misuse of a runner
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("Cannot stop a non-looping task")]
    NotLooping,
}

/// Runs work on a background task
///
/// Non-looping runners execute the work once and deliver one result.
/// Looping runners repeat until [`TaskRunner::stop`] is called or the
/// callback returns `ControlFlow::Break`. The stop flag is checked between
/// iterations; an iteration that is already running completes and still
/// delivers its result.
///
/// Dropping the runner stops the loop and aborts the task, which also
/// cancels an iteration blocked in I/O. Drop cannot wait; use
/// [`TaskRunner::abort_and_wait`] when the work must be gone before moving on.
pub struct TaskRunner {
    looping: bool,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TaskRunner {
    /// Spawns the work
    ///
    /// # Arguments
    /// * `work` - produces one outcome per call
    /// * `on_result` - receives every outcome, in order, under `lock`
    /// * `looping` - repeat the work until stopped
    /// * `lock` - shared result lock
    pub fn start<W, Fut, C>(work: W, on_result: C, looping: bool, lock: ResultLock) -> Self
    where
        W: FnMut(ResultLock) -> Fut + Send + 'static,
        Fut: Future<Output = TaskOutcome> + Send + 'static,
        C: FnMut(TaskOutcome) -> ControlFlow<()> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(run(work, on_result, looping, lock, Arc::clone(&stop)));

        Self {
            looping,
            stop,
            handle: Some(handle),
        }
    }

    /// Requests a looping runner to stop after the current iteration
    ///
    /// Idempotent. Calling it on a non-looping runner is reported and
    /// otherwise ignored.
    pub fn stop(&self) -> Result<(), TaskError> {
        if !self.looping {
            warn!("stop() called on a non-looping task");
            return Err(TaskError::NotLooping);
        }
        self.stop.store(true, Ordering::Release);
        Ok(())
    }

    /// Whether the background task is still alive
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the loop and waits until the background task has ended
    ///
    /// A looping runner first finishes its current iteration.
    pub async fn shutdown(mut self) {
        if self.looping {
            self.stop.store(true, Ordering::Release);
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!("Background task panicked: {}", e);
                }
            }
        }
    }

    /// Aborts the background task and waits until it has ended
    ///
    /// Everything the work captured, sockets included, is released by the
    /// time this returns.
    pub async fn abort_and_wait(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!("Background task panicked: {}", e);
                }
            }
        }
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run<W, Fut, C>(
    mut work: W,
    mut on_result: C,
    looping: bool,
    lock: ResultLock,
    stop: Arc<AtomicBool>,
) where
    W: FnMut(ResultLock) -> Fut,
    Fut: Future<Output = TaskOutcome>,
    C: FnMut(TaskOutcome) -> ControlFlow<()>,
{
    if !looping {
        let outcome = work(Arc::clone(&lock)).await;
        let _guard = lock.lock().await;
        let _ = on_result(outcome);
        return;
    }

    while !stop.load(Ordering::Acquire) {
        let outcome = work(Arc::clone(&lock)).await;
        let _guard = lock.lock().await;
        if on_result(outcome).is_break() {
            stop.store(true, Ordering::Release);
        }
    }
}
