//! The dispatch loop: reads notifications, runs handlers, acknowledges.
//!
//! One loop serves one client. It runs on the thread that calls
//! [`DispatchLoop::run`] and handles notifications strictly one at a time:
//! the acknowledgement of a notification is queued only after all of its
//! handlers returned, so acknowledgements leave in arrival order.
//!
//! ```text
//! Idle --run--> Running --exit--> Exiting --stream ends--> Stopped
//!   \                                                        ^
//!    `--exit--> Exiting --run--------------------------------'
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, warn};

use crate::context::ContextStack;
use crate::error::{DispatchError, StreamError};
use crate::protocol::Notification;
use crate::queue::AckQueue;
use crate::registry::HandlerRegistry;
use crate::stream::NotificationStream;

const DISPATCH_TARGET: &str = "tether_core::dispatch";

/// Lifecycle state of a [`DispatchLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Created, not yet running.
    Idle,
    /// Reading and dispatching notifications.
    Running,
    /// Asked to exit; waiting for the inbound half to end.
    Exiting,
    /// Finished. Terminal.
    Stopped,
}

#[derive(Debug)]
struct Lifecycle {
    state: LoopState,
    exit_code: i32,
}

/// Single-threaded notification pump for one client.
pub struct DispatchLoop {
    registry: Arc<HandlerRegistry>,
    stream: Arc<NotificationStream>,
    lifecycle: Mutex<Lifecycle>,
    delivered: AtomicU64,
    handler_failures: AtomicU64,
}

impl DispatchLoop {
    /// Creates an idle loop routing `stream` through `registry`.
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>, stream: Arc<NotificationStream>) -> Self {
        Self {
            registry,
            stream,
            lifecycle: Mutex::new(Lifecycle {
                state: LoopState::Idle,
                exit_code: 0,
            }),
            delivered: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
        }
    }

    /// Runs the loop on the calling thread until the inbound half ends.
    ///
    /// Returns the exit code recorded by [`exit`](Self::exit), or `0` when
    /// the host ended the stream on its own. Handler failures are logged and
    /// counted; they never end the loop.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyRunning`] or
    /// [`DispatchError::AlreadyStopped`] when the loop is not idle,
    /// [`DispatchError::StreamBusy`] or [`DispatchError::Open`] when the
    /// event call cannot be opened, and [`DispatchError::Transport`] when the
    /// call fails for any reason other than the cancellation requested by
    /// [`exit`](Self::exit).
    pub fn run(&self) -> Result<i32, DispatchError> {
        {
            let mut lifecycle = self.lifecycle();
            match lifecycle.state {
                LoopState::Idle => lifecycle.state = LoopState::Running,
                LoopState::Exiting => {
                    lifecycle.state = LoopState::Stopped;
                    debug!(
                        target: DISPATCH_TARGET,
                        code = lifecycle.exit_code,
                        "exit requested before start"
                    );
                    return Ok(lifecycle.exit_code);
                }
                LoopState::Running => return Err(DispatchError::AlreadyRunning),
                LoopState::Stopped => return Err(DispatchError::AlreadyStopped),
            }
        }
        debug!(target: DISPATCH_TARGET, "dispatch loop running");

        let opened = match self.stream.ensure_open() {
            Ok(Some(opened)) => opened,
            Ok(None) => return Err(self.fail(DispatchError::StreamBusy)),
            Err(source) => return Err(self.fail(DispatchError::Open(source))),
        };
        if self.state() == LoopState::Exiting {
            self.stream.close();
        }

        let mut stack = ContextStack::new();
        for item in opened.inbound {
            match item {
                Ok(_) if self.state() == LoopState::Exiting => break,
                Ok(notification) => self.deliver(&mut stack, notification, &opened.acks),
                Err(failure) => return self.end_with(failure),
            }
        }
        Ok(self.stop())
    }

    /// Asks the loop to exit with `code`.
    ///
    /// A handler already running finishes; no further notification is
    /// dispatched. The acknowledgement queue is closed so the host can end
    /// the call gracefully. Only the first request counts.
    pub fn exit(&self, code: i32) {
        {
            let mut lifecycle = self.lifecycle();
            match lifecycle.state {
                LoopState::Idle | LoopState::Running => {
                    lifecycle.state = LoopState::Exiting;
                    lifecycle.exit_code = code;
                }
                LoopState::Exiting | LoopState::Stopped => return,
            }
        }
        debug!(target: DISPATCH_TARGET, code, "exit requested");
        self.stream.close();
    }

    /// Nudges the loop if it is blocked on an idle inbound half.
    pub fn wake_up(&self) {
        self.stream.wake();
    }

    /// Whether the loop is running or exiting.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.state(), LoopState::Running | LoopState::Exiting)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        self.lifecycle().state
    }

    /// Exit code recorded so far.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.lifecycle().exit_code
    }

    /// Notifications dispatched and acknowledged so far.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Handler failures observed so far.
    #[must_use]
    pub fn handler_failures(&self) -> u64 {
        self.handler_failures.load(Ordering::Relaxed)
    }

    fn deliver(&self, stack: &mut ContextStack, received: Notification, acks: &AckQueue) {
        let notification = Arc::new(received);
        let report = {
            let scope = stack.enter(Arc::clone(&notification));
            self.registry.dispatch(
                &scope.context(),
                &notification.instance,
                notification.index,
                &notification.arguments,
            )
        };
        self.delivered.fetch_add(1, Ordering::Relaxed);
        let failures = u64::try_from(report.failures().len()).unwrap_or(u64::MAX);
        self.handler_failures.fetch_add(failures, Ordering::Relaxed);

        if let Err(refused) = acks.put(notification.acknowledgement()) {
            debug!(
                target: DISPATCH_TARGET,
                index = %notification.index,
                correlation_id = %notification.correlation_id,
                error = %refused,
                "acknowledgement dropped"
            );
        }
    }

    fn end_with(&self, failure: StreamError) -> Result<i32, DispatchError> {
        if failure.is_cancelled() && self.state() == LoopState::Exiting {
            debug!(target: DISPATCH_TARGET, "event call cancelled on exit");
            return Ok(self.stop());
        }
        error!(target: DISPATCH_TARGET, error = %failure, "event call failed");
        Err(self.fail(DispatchError::Transport(failure)))
    }

    fn stop(&self) -> i32 {
        let mut lifecycle = self.lifecycle();
        lifecycle.state = LoopState::Stopped;
        debug!(target: DISPATCH_TARGET, code = lifecycle.exit_code, "dispatch loop stopped");
        lifecycle.exit_code
    }

    fn fail(&self, failure: DispatchError) -> DispatchError {
        self.lifecycle().state = LoopState::Stopped;
        if matches!(failure, DispatchError::StreamBusy | DispatchError::Open(_)) {
            warn!(target: DISPATCH_TARGET, error = %failure, "dispatch loop could not start");
        }
        failure
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for DispatchLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchLoop")
            .field("state", &self.state())
            .field("delivered", &self.delivered())
            .finish_non_exhaustive()
    }
}
