//! Lazily opened bidirectional event call.
//!
//! [`NotificationStream`] owns the current [`AckQueue`] and the control
//! handle of the event call it feeds. A closed queue means the call is over
//! (or ending), so the next [`NotificationStream::ensure_open`] opens a fresh
//! one.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::error::RemoteError;
use crate::queue::AckQueue;
use crate::remote::{Inbound, RemoteStub, StreamControl};

const STREAM_TARGET: &str = "tether_core::stream";

/// The reading side of a freshly opened event call.
pub struct OpenStream {
    /// Notifications pushed by the host.
    pub inbound: Inbound,
    /// Queue feeding acknowledgements back to the host.
    pub acks: Arc<AckQueue>,
}

impl fmt::Debug for OpenStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenStream")
            .field("acks", &self.acks)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct StreamState {
    acks: Option<Arc<AckQueue>>,
    control: Option<Arc<dyn StreamControl>>,
}

/// Owner of the single event call shared by every instance of a client.
pub struct NotificationStream {
    remote: Arc<dyn RemoteStub>,
    capacity: Option<usize>,
    state: Mutex<StreamState>,
}

impl NotificationStream {
    /// Creates a stream whose acknowledgement queues hold `capacity` items
    /// (`None` for unbounded). Nothing is opened until first use.
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteStub>, capacity: Option<usize>) -> Self {
        Self {
            remote,
            capacity,
            state: Mutex::new(StreamState::default()),
        }
    }

    /// Opens a new event call unless the current one is still open.
    ///
    /// Returns the new call's reading side, or `None` when an open call
    /// already exists; its inbound half belongs to whoever opened it.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the remote stub cannot open the call.
    pub fn ensure_open(&self) -> Result<Option<OpenStream>, RemoteError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.acks.as_ref().is_some_and(|acks| !acks.is_closed()) {
            return Ok(None);
        }
        let acks = Arc::new(AckQueue::new(self.capacity));
        let call = self.remote.handle_event(Arc::clone(&acks))?;
        state.acks = Some(Arc::clone(&acks));
        state.control = Some(call.control);
        debug!(target: STREAM_TARGET, capacity = ?self.capacity, "opened event call");
        Ok(Some(OpenStream {
            inbound: call.inbound,
            acks,
        }))
    }

    /// Whether an event call is open and still accepting acknowledgements.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .acks
            .as_ref()
            .is_some_and(|acks| !acks.is_closed())
    }

    /// Ends the current call gracefully.
    ///
    /// Closing the acknowledgement queue lets queued acknowledgements drain,
    /// after which the host ends the inbound half. Without a queue the
    /// inbound half is cancelled directly. May block while the queue is full.
    /// Returns `false` when nothing was open.
    pub fn close(&self) -> bool {
        let (acks, control) = self.current();
        if let Some(queue) = acks {
            if queue.is_closed() {
                return false;
            }
            queue.close();
            debug!(target: STREAM_TARGET, "closed acknowledgement queue");
            return true;
        }
        control.is_some_and(|handle| {
            handle.cancel();
            debug!(target: STREAM_TARGET, "cancelled event call without queue");
            true
        })
    }

    /// Cancels the current call at once, discarding queued acknowledgements.
    pub fn cancel(&self) {
        let (acks, control) = self.current();
        if let Some(handle) = control {
            handle.cancel();
            debug!(target: STREAM_TARGET, "cancelled event call");
        }
        if let Some(queue) = acks {
            queue.close_now();
        }
    }

    /// Nudges a reader blocked on the inbound half.
    pub fn wake(&self) {
        if let (_, Some(handle)) = self.current() {
            handle.wake();
        }
    }

    fn current(&self) -> (Option<Arc<AckQueue>>, Option<Arc<dyn StreamControl>>) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        (state.acks.clone(), state.control.clone())
    }
}

impl fmt::Debug for NotificationStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationStream")
            .field("capacity", &self.capacity)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
