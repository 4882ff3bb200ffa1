//! Failure taxonomy of the dispatch engine.
//!
//! Queue preconditions (`Closed`, `Full`, `Empty`) are recoverable by the
//! caller. Transport failures terminate a dispatch loop and are re-raised to
//! whoever awaits it. Handler failures are isolated per invocation and never
//! stop acknowledgement. I/O errors are wrapped in `Arc` so every error here
//! stays `Clone` and can be replayed to several waiters.

use std::any::Any;
use std::sync::Arc;

use thiserror::Error;

use crate::protocol::{InstanceId, MemberIndex};

/// Errors raised by [`CloseableQueue`](crate::queue::CloseableQueue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue no longer accepts items, or it is closed and drained.
    #[error("queue is closed")]
    Closed,
    /// A non-blocking put found the queue at capacity.
    #[error("queue is full")]
    Full,
    /// A non-blocking get found the queue empty.
    #[error("queue is empty")]
    Empty,
    /// A timed get found no item before the deadline.
    #[error("timed out waiting for an item")]
    Timeout,
}

/// Failures reported by the inbound half of an event call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The stream ended because this side asked it to.
    #[error("event stream was cancelled")]
    Cancelled,
    /// The stream failed for a reason not caused by this side.
    #[error("event stream failed: {message}")]
    Failed {
        /// Description of the transport failure.
        message: String,
    },
}

impl StreamError {
    /// Builds a [`StreamError::Failed`].
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Whether this is the self-inflicted cancellation signature.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Failures of unary calls against the remote host.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The connection to the host is gone.
    #[error("remote host disconnected")]
    Disconnected,
    /// The host did not answer in time.
    #[error("remote call '{method}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Remote method that timed out.
        method: String,
        /// Timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },
    /// The host answered with an error.
    #[error("remote host rejected the call: {message} (code: {code})")]
    Rejected {
        /// Host error code.
        code: i64,
        /// Host error message.
        message: String,
    },
    /// A message could not be encoded or decoded.
    #[error("remote codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },
    /// The underlying pipe failed.
    #[error("remote I/O error: {source}")]
    Io {
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl From<std::io::Error> for RemoteError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            source: Arc::new(source),
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(error: serde_json::Error) -> Self {
        Self::Codec {
            message: error.to_string(),
        }
    }
}

/// Failures of handler registration.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The instance is not registered, or it was already destroyed.
    #[error("instance '{instance}' is not registered")]
    UnknownInstance {
        /// Instance that was looked up.
        instance: InstanceId,
    },
    /// The host refused to start delivering the event.
    #[error("host refused to connect event {index} of '{instance}'")]
    SubscribeRejected {
        /// Target instance.
        instance: InstanceId,
        /// Event member.
        index: MemberIndex,
    },
    /// The host refused to stop delivering the event.
    #[error("host refused to disconnect event {index} of '{instance}'")]
    UnsubscribeRejected {
        /// Target instance.
        instance: InstanceId,
        /// Event member.
        index: MemberIndex,
    },
    /// The subscribe or unsubscribe call itself failed.
    #[error("subscription call failed: {0}")]
    Remote(#[from] RemoteError),
}

/// Failure raised by an event handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Builds a handler error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Converts a caught panic payload into a handler error.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|text| (*text).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| String::from("non-string panic payload"));
        Self::new(format!("handler panicked: {detail}"))
    }

    /// Human-readable description.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_str()
    }
}

/// Failures terminating a [`DispatchLoop`](crate::dispatch::DispatchLoop).
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The loop already ran to completion and cannot be restarted.
    #[error("dispatch loop already stopped")]
    AlreadyStopped,
    /// The loop is already running on another thread.
    #[error("dispatch loop is already running")]
    AlreadyRunning,
    /// Another reader holds the inbound half of the event call.
    #[error("event stream is already being read")]
    StreamBusy,
    /// The event call could not be opened.
    #[error("failed to open event stream: {0}")]
    Open(#[source] RemoteError),
    /// The event call failed while the loop was reading it.
    #[error("event stream failed: {0}")]
    Transport(#[source] StreamError),
}

/// Failures of [`DispatchLoopManager`](crate::manager::DispatchLoopManager).
#[derive(Debug, Clone, Error)]
pub enum ManagerError {
    /// `start` was called more than once.
    #[error("dispatch thread already started")]
    AlreadyStarted,
    /// `stop` was called before `start`.
    #[error("dispatch thread was never started")]
    NotStarted,
    /// The dispatch thread could not be spawned.
    #[error("failed to spawn dispatch thread: {source}")]
    Spawn {
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
    /// The dispatch thread did not finish in time; `stop` may be retried.
    #[error("dispatch thread did not stop within {timeout_ms}ms")]
    Timeout {
        /// Timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },
    /// The dispatch thread panicked.
    #[error("dispatch thread panicked")]
    Panicked,
    /// `stop` was called on the dispatch thread itself, which cannot join
    /// itself. Exit was still requested; the loop stops once the current
    /// handler returns.
    #[error("dispatch thread cannot wait for itself to stop")]
    StopFromDispatchThread,
    /// The dispatch loop terminated with a failure.
    #[error("dispatch loop failed: {0}")]
    Dispatch(#[from] DispatchError),
}
