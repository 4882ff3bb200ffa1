//! Owns the dedicated thread a client's dispatch loop runs on.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::dispatch::DispatchLoop;
use crate::error::ManagerError;

const MANAGER_TARGET: &str = "tether_core::manager";
const DISPATCH_THREAD_NAME: &str = "tether-dispatch";

type LoopOutcome = Result<i32, ManagerError>;

/// Result slot the dispatch thread fills exactly once before it returns.
#[derive(Default)]
struct Outcome {
    slot: Mutex<Option<LoopOutcome>>,
    ready: Condvar,
}

impl Outcome {
    fn publish(&self, outcome: LoopOutcome) {
        *self.slot() = Some(outcome);
        self.ready.notify_all();
    }

    /// Waits for the outcome; `None` when `timeout` elapsed first.
    fn wait(&self, timeout: Option<Duration>) -> Option<LoopOutcome> {
        let slot = self.slot();
        let filled = match timeout {
            Some(limit) => {
                self.ready
                    .wait_timeout_while(slot, limit, |pending| pending.is_none())
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => self
                .ready
                .wait_while(slot, |pending| pending.is_none())
                .unwrap_or_else(PoisonError::into_inner),
        };
        filled.clone()
    }

    fn slot(&self) -> MutexGuard<'_, Option<LoopOutcome>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Worker {
    Unstarted,
    Running {
        handle: JoinHandle<()>,
        outcome: Arc<Outcome>,
    },
    Finished(LoopOutcome),
}

/// Starts one [`DispatchLoop`] on its own thread and stops it exactly once.
///
/// A manager is single-use: once stopped it keeps returning the loop's
/// outcome, and a new channel needs a new manager. The worker lock is only
/// held for bookkeeping, never while waiting for the thread, so
/// [`is_running`](Self::is_running) stays responsive during a slow stop.
pub struct DispatchLoopManager {
    dispatch: Arc<DispatchLoop>,
    worker: Mutex<Worker>,
}

impl DispatchLoopManager {
    /// Wraps `dispatch` without starting it.
    #[must_use]
    pub fn new(dispatch: Arc<DispatchLoop>) -> Self {
        Self {
            dispatch,
            worker: Mutex::new(Worker::Unstarted),
        }
    }

    /// The managed loop.
    #[must_use]
    pub fn dispatch(&self) -> &Arc<DispatchLoop> {
        &self.dispatch
    }

    /// Spawns the dispatch thread.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::AlreadyStarted`] on a second call and
    /// [`ManagerError::Spawn`] when the thread cannot be created.
    pub fn start(&self) -> Result<(), ManagerError> {
        let mut worker = self.worker();
        if !matches!(*worker, Worker::Unstarted) {
            return Err(ManagerError::AlreadyStarted);
        }
        let outcome = Arc::new(Outcome::default());
        let published = Arc::clone(&outcome);
        let dispatch = Arc::clone(&self.dispatch);
        let handle = thread::Builder::new()
            .name(DISPATCH_THREAD_NAME.to_owned())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| dispatch.run()))
                    .map_or(Err(ManagerError::Panicked), |ran| {
                        ran.map_err(ManagerError::from)
                    });
                published.publish(result);
            })
            .map_err(|source| ManagerError::Spawn {
                source: Arc::new(source),
            })?;
        *worker = Worker::Running { handle, outcome };
        debug!(target: MANAGER_TARGET, "dispatch thread started");
        Ok(())
    }

    /// Asks the loop to exit and waits for its thread.
    ///
    /// `None` waits indefinitely. On timeout the thread keeps running and
    /// `stop` may be called again; once the thread finished every call
    /// returns the same outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotStarted`] before [`start`](Self::start),
    /// [`ManagerError::StopFromDispatchThread`] when called from a handler
    /// running on the dispatch thread (exit is still requested),
    /// [`ManagerError::Timeout`] when the thread did not finish in time,
    /// [`ManagerError::Panicked`] when it panicked, and
    /// [`ManagerError::Dispatch`] with the loop's own failure.
    pub fn stop(&self, timeout: Option<Duration>) -> Result<i32, ManagerError> {
        let (outcome, on_dispatch_thread) = match &*self.worker() {
            Worker::Unstarted => return Err(ManagerError::NotStarted),
            Worker::Finished(finished) => return finished.clone(),
            Worker::Running { handle, outcome } => (
                Arc::clone(outcome),
                handle.thread().id() == thread::current().id(),
            ),
        };

        self.dispatch.exit(0);
        if on_dispatch_thread {
            debug!(target: MANAGER_TARGET, "stop requested from the dispatch thread");
            return Err(ManagerError::StopFromDispatchThread);
        }

        let Some(result) = outcome.wait(timeout) else {
            let timeout_ms = timeout.map_or(0, millis);
            warn!(target: MANAGER_TARGET, timeout_ms, "dispatch thread did not stop in time");
            return Err(ManagerError::Timeout { timeout_ms });
        };

        let mut worker = self.worker();
        match std::mem::replace(&mut *worker, Worker::Unstarted) {
            Worker::Running { handle, .. } => {
                if handle.join().is_err() {
                    warn!(target: MANAGER_TARGET, "dispatch thread panicked");
                }
                *worker = Worker::Finished(result.clone());
                debug!(target: MANAGER_TARGET, ok = result.is_ok(), "dispatch thread stopped");
                result
            }
            Worker::Finished(finished) => {
                *worker = Worker::Finished(finished.clone());
                finished
            }
            Worker::Unstarted => Err(ManagerError::NotStarted),
        }
    }

    /// Whether the dispatch thread was started and has not been joined.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(*self.worker(), Worker::Running { .. })
    }

    fn worker(&self) -> MutexGuard<'_, Worker> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for DispatchLoopManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchLoopManager")
            .field("dispatch", &self.dispatch)
            .field("running", &self.is_running())
            .finish()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
