//! Boundary with the remote stub.
//!
//! The engine never speaks to the host directly. Everything it needs, the
//! unary calls and the one bidirectional event call, goes through
//! [`RemoteStub`]. Implementations must report deliberate cancellation of the
//! event call as [`StreamError::Cancelled`] and every other ending as
//! [`StreamError::Failed`]; the dispatch loop relies on that distinction to
//! tell a clean shutdown from a transport failure.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{RemoteError, StreamError};
use crate::protocol::{CallRequest, InstanceId, MemberDescriptor, MemberIndex, Notification};
use crate::queue::AckQueue;

/// Inbound half of an event call: notifications until the host ends it.
pub type Inbound = Box<dyn Iterator<Item = Result<Notification, StreamError>> + Send>;

/// Out-of-band control over an open event call.
pub trait StreamControl: Send + Sync {
    /// Ends the inbound half immediately with [`StreamError::Cancelled`].
    fn cancel(&self);

    /// Nudges a reader blocked on the inbound half so it re-checks state.
    fn wake(&self) {}
}

/// An open bidirectional event call.
pub struct EventCall {
    /// Notifications pushed by the host.
    pub inbound: Inbound,
    /// Cancellation and wake-up handle for the call.
    pub control: Arc<dyn StreamControl>,
}

impl EventCall {
    /// Pairs an inbound sequence with its control handle.
    #[must_use]
    pub fn new(inbound: Inbound, control: Arc<dyn StreamControl>) -> Self {
        Self { inbound, control }
    }
}

impl fmt::Debug for EventCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCall").finish_non_exhaustive()
    }
}

/// Calls the engine and the client issue against the remote host.
pub trait RemoteStub: Send + Sync {
    /// Waits until the host answers, or fails after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the host is unreachable.
    fn ready(&self, timeout: Duration) -> Result<(), RemoteError> {
        let _ = timeout;
        Ok(())
    }

    /// Creates a remote instance of `class_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the call fails.
    fn create(&self, class_id: &str) -> Result<InstanceId, RemoteError>;

    /// Destroys a remote instance; `false` when the host refused.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the call fails.
    fn destroy(&self, instance: &InstanceId) -> Result<bool, RemoteError>;

    /// Lists the members of a remote instance.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the call fails.
    fn describe(&self, instance: &InstanceId) -> Result<Vec<MemberDescriptor>, RemoteError>;

    /// Performs one unary call against a member.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the call fails.
    fn call(&self, request: CallRequest) -> Result<Value, RemoteError>;

    /// Asks the host to start delivering an event; `false` when refused.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the call fails.
    fn connect_event(&self, instance: &InstanceId, index: MemberIndex)
    -> Result<bool, RemoteError>;

    /// Asks the host to stop delivering an event; `false` when refused.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the call fails.
    fn disconnect_event(
        &self,
        instance: &InstanceId,
        index: MemberIndex,
    ) -> Result<bool, RemoteError>;

    /// Opens the event call, draining `acks` as its outbound half.
    ///
    /// Closing `acks` ends the call gracefully once the backlog is sent.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the call cannot be opened.
    fn handle_event(&self, acks: Arc<AckQueue>) -> Result<EventCall, RemoteError>;
}
