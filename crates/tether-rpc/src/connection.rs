//! Client side of a framed JSON-RPC connection.
//!
//! [`RpcConnection`] implements [`RemoteStub`] over any pair of byte pipes.
//! One reader thread demultiplexes everything the host sends: responses go to
//! the caller waiting on that request id, `events/notify` and `events/end`
//! go to the open event call. Each event call also owns a writer thread that
//! drains its acknowledgement queue onto the wire.

use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tether_core::{
    AckQueue, CallRequest, EventCall, InstanceId, MemberDescriptor, MemberIndex, Notification,
    RemoteError, RemoteStub, StreamControl, StreamError,
};
use tracing::{debug, warn};

use crate::error::rejected;
use crate::frame::{FrameReader, FrameWriter};
use crate::jsonrpc::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND,
    RequestIds,
};
use crate::methods::{
    CALL, CONNECT_EVENT, CREATE, CreateParams, DESCRIBE, DESTROY, DISCONNECT_EVENT, EVENTS_ACK,
    EVENTS_CANCEL, EVENTS_CLOSE, EVENTS_END, EVENTS_NOTIFY, EVENTS_OPEN, EventParams,
    InstanceParams, PING,
};

const CONNECTION_TARGET: &str = "tether_rpc::connection";
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Tunables of an [`RpcConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcOptions {
    call_timeout: Duration,
}

impl RpcOptions {
    /// Options with the given unary call timeout.
    #[must_use]
    pub const fn new(call_timeout: Duration) -> Self {
        Self { call_timeout }
    }

    /// How long a unary call waits for its response.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        self.call_timeout
    }
}

impl Default for RpcOptions {
    fn default() -> Self {
        Self::new(DEFAULT_CALL_TIMEOUT)
    }
}

type Reply = Result<Value, RemoteError>;

enum EventMessage {
    Notify(Notification),
    End,
    Failed(String),
    Cancel,
    Wake,
}

#[derive(Default)]
struct Pending {
    waiters: HashMap<i64, Sender<Reply>>,
    disconnected: bool,
}

#[derive(Default)]
struct EventSlot {
    generation: u64,
    sender: Option<Sender<EventMessage>>,
    acks: Option<Arc<AckQueue>>,
}

struct Shared {
    writer: Mutex<FrameWriter<Box<dyn Write + Send>>>,
    pending: Mutex<Pending>,
    events: Mutex<EventSlot>,
    ids: RequestIds,
    options: RpcOptions,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn events(&self) -> MutexGuard<'_, EventSlot> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send_message<T: Serialize>(&self, message: &T) -> Result<(), RemoteError> {
        let payload = serde_json::to_vec(message)?;
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(&payload)?;
        Ok(())
    }

    fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RemoteError> {
        debug!(target: CONNECTION_TARGET, method, "sending notification");
        self.send_message(&JsonRpcNotification::new(method, params))
    }

    fn request(&self, method: &str, params: Value, timeout: Duration) -> Reply {
        let id = self.ids.next_id();
        let (sender, receiver) = mpsc::channel();
        {
            let mut pending = self.pending();
            if pending.disconnected {
                return Err(RemoteError::Disconnected);
            }
            pending.waiters.insert(id, sender);
        }

        debug!(target: CONNECTION_TARGET, method, id, "sending request");
        if let Err(error) = self.send_message(&JsonRpcRequest::new(id, method, Some(params))) {
            self.pending().waiters.remove(&id);
            return Err(error);
        }

        match receiver.recv_timeout(timeout) {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => {
                self.pending().waiters.remove(&id);
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(target: CONNECTION_TARGET, method, id, timeout_ms, "request timed out");
                Err(RemoteError::Timeout {
                    method: method.to_owned(),
                    timeout_ms,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(RemoteError::Disconnected),
        }
    }

    fn call<P, R>(&self, method: &str, params: &P) -> Result<R, RemoteError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params_value = serde_json::to_value(params)?;
        let result = self.request(method, params_value, self.options.call_timeout)?;
        Ok(serde_json::from_value(result)?)
    }

    fn read_loop<R: Read>(&self, mut reader: FrameReader<R>) {
        let reason = loop {
            match reader.receive() {
                Ok(Some(payload)) => self.route(&payload),
                Ok(None) => break String::from("host closed the connection"),
                Err(error) => break error.to_string(),
            }
        };
        self.disconnect(&reason);
    }

    fn route(&self, payload: &[u8]) {
        match serde_json::from_slice::<JsonRpcMessage>(payload) {
            Ok(JsonRpcMessage::Response(response)) => self.complete(response),
            Ok(JsonRpcMessage::Notification(notification)) => self.on_notification(notification),
            Ok(JsonRpcMessage::Request(request)) => {
                warn!(
                    target: CONNECTION_TARGET,
                    method = %request.method,
                    "host sent an unsupported request"
                );
                let reply = JsonRpcResponse::failure(request.id, METHOD_NOT_FOUND, "not supported");
                if let Err(error) = self.send_message(&reply) {
                    debug!(target: CONNECTION_TARGET, %error, "failed to refuse host request");
                }
            }
            Err(error) => {
                warn!(target: CONNECTION_TARGET, %error, "discarding undecodable message");
            }
        }
    }

    fn complete(&self, response: JsonRpcResponse) {
        let Some(id) = response.id else {
            warn!(target: CONNECTION_TARGET, "response without id");
            return;
        };
        let Some(waiter) = self.pending().waiters.remove(&id) else {
            debug!(target: CONNECTION_TARGET, id, "response for abandoned request");
            return;
        };
        let reply = match response.error {
            Some(error) => Err(rejected(error)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        if waiter.send(reply).is_err() {
            debug!(target: CONNECTION_TARGET, id, "caller stopped waiting");
        }
    }

    fn on_notification(&self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            EVENTS_NOTIFY => {
                let params = notification.params.unwrap_or(Value::Null);
                match serde_json::from_value::<Notification>(params) {
                    Ok(event) => self.forward(EventMessage::Notify(event)),
                    Err(error) => {
                        warn!(target: CONNECTION_TARGET, %error, "discarding malformed notification");
                    }
                }
            }
            EVENTS_END => self.forward(EventMessage::End),
            other => debug!(target: CONNECTION_TARGET, method = other, "ignoring notification"),
        }
    }

    fn forward(&self, message: EventMessage) {
        let events = self.events();
        let delivered = events
            .sender
            .as_ref()
            .is_some_and(|sender| sender.send(message).is_ok());
        if !delivered {
            debug!(target: CONNECTION_TARGET, "event message without an open event call");
        }
    }

    fn disconnect(&self, reason: &str) {
        let abandoned = {
            let mut pending = self.pending();
            pending.disconnected = true;
            std::mem::take(&mut pending.waiters)
        };
        let (sender, acks) = {
            let mut events = self.events();
            (events.sender.take(), events.acks.take())
        };
        if let Some(events) = sender
            && events.send(EventMessage::Failed(reason.to_owned())).is_err()
        {
            debug!(target: CONNECTION_TARGET, "event call already gone");
        }
        if let Some(queue) = acks {
            queue.close_now();
        }
        warn!(
            target: CONNECTION_TARGET,
            reason,
            abandoned = abandoned.len(),
            "connection closed"
        );
    }

    fn release_event_slot(&self, generation: u64) {
        let mut events = self.events();
        if events.generation == generation {
            events.sender = None;
            events.acks = None;
        }
    }
}

/// A [`RemoteStub`] speaking framed JSON-RPC.
pub struct RpcConnection {
    shared: Arc<Shared>,
}

impl RpcConnection {
    /// Starts the reader thread over `reader` and sends through `writer`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Io`] when the reader thread cannot be spawned.
    pub fn new<R, W>(reader: R, writer: W, options: RpcOptions) -> Result<Self, RemoteError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let sink: Box<dyn Write + Send> = Box::new(writer);
        let shared = Arc::new(Shared {
            writer: Mutex::new(FrameWriter::new(sink)),
            pending: Mutex::new(Pending::default()),
            events: Mutex::new(EventSlot::default()),
            ids: RequestIds::new(),
            options,
        });
        let reading = Arc::clone(&shared);
        thread::Builder::new()
            .name(String::from("tether-rpc-reader"))
            .spawn(move || reading.read_loop(FrameReader::new(reader)))?;
        Ok(Self { shared })
    }

    /// Whether the host side is still readable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.shared.pending().disconnected
    }

    /// Options the connection was built with.
    #[must_use]
    pub fn options(&self) -> RpcOptions {
        self.shared.options
    }
}

impl fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcConnection")
            .field("options", &self.shared.options)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl RemoteStub for RpcConnection {
    fn ready(&self, timeout: Duration) -> Result<(), RemoteError> {
        self.shared.request(PING, Value::Null, timeout).map(drop)
    }

    fn create(&self, class_id: &str) -> Result<InstanceId, RemoteError> {
        self.shared.call(
            CREATE,
            &CreateParams {
                class_id: class_id.to_owned(),
            },
        )
    }

    fn destroy(&self, instance: &InstanceId) -> Result<bool, RemoteError> {
        self.shared.call(
            DESTROY,
            &InstanceParams {
                instance: instance.clone(),
            },
        )
    }

    fn describe(&self, instance: &InstanceId) -> Result<Vec<MemberDescriptor>, RemoteError> {
        self.shared.call(
            DESCRIBE,
            &InstanceParams {
                instance: instance.clone(),
            },
        )
    }

    fn call(&self, request: CallRequest) -> Result<Value, RemoteError> {
        self.shared.call(CALL, &request)
    }

    fn connect_event(&self, instance: &InstanceId, index: MemberIndex) -> Result<bool, RemoteError> {
        self.shared.call(
            CONNECT_EVENT,
            &EventParams {
                instance: instance.clone(),
                index,
            },
        )
    }

    fn disconnect_event(
        &self,
        instance: &InstanceId,
        index: MemberIndex,
    ) -> Result<bool, RemoteError> {
        self.shared.call(
            DISCONNECT_EVENT,
            &EventParams {
                instance: instance.clone(),
                index,
            },
        )
    }

    fn handle_event(&self, acks: Arc<AckQueue>) -> Result<EventCall, RemoteError> {
        let (sender, receiver) = mpsc::channel();
        let generation = {
            let mut events = self.shared.events();
            events.generation += 1;
            if let Some(previous) = events.sender.replace(sender.clone())
                && previous.send(EventMessage::End).is_err()
            {
                debug!(target: CONNECTION_TARGET, "previous event call already gone");
            }
            events.acks = Some(Arc::clone(&acks));
            events.generation
        };

        if let Err(error) =
            self.shared
                .request(EVENTS_OPEN, Value::Null, self.shared.options.call_timeout)
        {
            self.shared.release_event_slot(generation);
            return Err(error);
        }
        debug!(target: CONNECTION_TARGET, generation, "event call open");

        let cancelled = Arc::new(AtomicBool::new(false));
        spawn_ack_writer(Arc::clone(&self.shared), acks, Arc::clone(&cancelled), generation)?;
        let control = Arc::new(RpcEventControl {
            shared: Arc::clone(&self.shared),
            sender,
            cancelled: Arc::clone(&cancelled),
        });
        let inbound = RpcInbound {
            receiver,
            cancelled,
            done: false,
        };
        Ok(EventCall::new(Box::new(inbound), control))
    }
}

fn spawn_ack_writer(
    shared: Arc<Shared>,
    acks: Arc<AckQueue>,
    cancelled: Arc<AtomicBool>,
    generation: u64,
) -> Result<(), RemoteError> {
    thread::Builder::new()
        .name(String::from("tether-rpc-acks"))
        .spawn(move || {
            for ack in acks.iter() {
                let sent = serde_json::to_value(&ack)
                    .map_err(RemoteError::from)
                    .and_then(|params| shared.notify(EVENTS_ACK, Some(params)));
                if let Err(error) = sent {
                    warn!(target: CONNECTION_TARGET, %error, "failed to send acknowledgement");
                    acks.close_now();
                    return;
                }
            }
            if cancelled.load(Ordering::Acquire) {
                return;
            }
            if let Err(error) = shared.notify(EVENTS_CLOSE, None) {
                debug!(target: CONNECTION_TARGET, %error, "failed to close event call");
            }
            debug!(target: CONNECTION_TARGET, generation, "acknowledgements drained");
        })?;
    Ok(())
}

struct RpcEventControl {
    shared: Arc<Shared>,
    sender: Sender<EventMessage>,
    cancelled: Arc<AtomicBool>,
}

impl StreamControl for RpcEventControl {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.sender.send(EventMessage::Cancel).is_err() {
            debug!(target: CONNECTION_TARGET, "event reader already gone");
        }
        if let Err(error) = self.shared.notify(EVENTS_CANCEL, None) {
            debug!(target: CONNECTION_TARGET, %error, "failed to notify cancellation");
        }
    }

    fn wake(&self) {
        if self.sender.send(EventMessage::Wake).is_err() {
            debug!(target: CONNECTION_TARGET, "event reader already gone");
        }
    }
}

struct RpcInbound {
    receiver: Receiver<EventMessage>,
    cancelled: Arc<AtomicBool>,
    done: bool,
}

impl Iterator for RpcInbound {
    type Item = Result<Notification, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let message = self.receiver.recv();
            if self.cancelled.load(Ordering::Acquire) {
                self.done = true;
                return Some(Err(StreamError::Cancelled));
            }
            match message {
                Ok(EventMessage::Notify(notification)) => return Some(Ok(notification)),
                Ok(EventMessage::Wake | EventMessage::Cancel) => {}
                Ok(EventMessage::End) => self.done = true,
                Ok(EventMessage::Failed(reason)) => {
                    self.done = true;
                    return Some(Err(StreamError::failed(reason)));
                }
                Err(_) => {
                    self.done = true;
                    return Some(Err(StreamError::failed("event call dropped")));
                }
            }
        }
        None
    }
}
