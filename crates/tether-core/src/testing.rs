//! In-memory remote host for exercising the engine without a transport.
//!
//! [`ScriptedRemote`] records every unary call, buffers pushed notifications
//! until an event call reads them, and drains the acknowledgement queue on a
//! background thread the way a real host would. Closing the queue ends the
//! inbound half gracefully; cancelling the call ends it with
//! [`StreamError::Cancelled`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use serde_json::Value;

use crate::error::{RemoteError, StreamError};
use crate::protocol::{
    Acknowledgement, CallRequest, InstanceId, MemberDescriptor, MemberIndex, Notification,
};
use crate::queue::AckQueue;
use crate::remote::{EventCall, RemoteStub, StreamControl};

type Responder = dyn Fn(&CallRequest) -> Result<Value, RemoteError> + Send + Sync;

enum Step {
    Deliver(Notification),
    Fail(StreamError),
    End,
}

#[derive(Default)]
struct Script {
    classes: HashMap<String, Vec<MemberDescriptor>>,
    instances: HashMap<InstanceId, String>,
    next_instance: u64,
    destroyed: Vec<InstanceId>,
    calls: Vec<CallRequest>,
    subscriptions: Vec<(InstanceId, MemberIndex)>,
    unsubscriptions: Vec<(InstanceId, MemberIndex)>,
    refuse_subscriptions: bool,
    refuse_destroy: bool,
    responder: Option<Arc<Responder>>,
    pending: VecDeque<Step>,
    acknowledgements: Vec<Acknowledgement>,
    generation: u64,
    events_opened: usize,
    ended: bool,
    cancelled: bool,
    wakes: usize,
}

#[derive(Default)]
struct Shared {
    script: Mutex<Script>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, change: impl FnOnce(&mut Script)) {
        change(&mut self.lock());
        self.changed.notify_all();
    }
}

/// Scripted stand-in for a remote host.
#[derive(Clone, Default)]
pub struct ScriptedRemote {
    shared: Arc<Shared>,
}

impl ScriptedRemote {
    /// Creates a host with no classes and nothing to deliver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a class the host can instantiate, with its members.
    #[must_use]
    pub fn with_class(self, class_id: &str, members: Vec<MemberDescriptor>) -> Self {
        self.shared.update(|script| {
            script.classes.insert(class_id.to_owned(), members);
        });
        self
    }

    /// Answers unary calls with `responder` instead of `null`.
    #[must_use]
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: Fn(&CallRequest) -> Result<Value, RemoteError> + Send + Sync + 'static,
    {
        self.shared
            .update(|script| script.responder = Some(Arc::new(responder)));
        self
    }

    /// Makes the host refuse (or accept again) event subscriptions.
    pub fn refuse_subscriptions(&self, refuse: bool) {
        self.shared
            .update(|script| script.refuse_subscriptions = refuse);
    }

    /// Makes the host keep (or release again) instances asked to be destroyed.
    pub fn refuse_destroy(&self, refuse: bool) {
        self.shared.update(|script| script.refuse_destroy = refuse);
    }

    /// Queues a notification for delivery on the current or next event call.
    pub fn push(&self, notification: Notification) {
        self.shared
            .update(|script| script.pending.push_back(Step::Deliver(notification)));
    }

    /// Queues a transport failure after the notifications already pushed.
    pub fn fail(&self, message: &str) {
        let failure = StreamError::failed(message);
        self.shared
            .update(|script| script.pending.push_back(Step::Fail(failure)));
    }

    /// Ends the inbound half once every pushed notification was read.
    pub fn end(&self) {
        self.shared
            .update(|script| script.pending.push_back(Step::End));
    }

    /// Acknowledgements received so far, in arrival order.
    #[must_use]
    pub fn acknowledgements(&self) -> Vec<Acknowledgement> {
        self.shared.lock().acknowledgements.clone()
    }

    /// Waits until at least `count` acknowledgements arrived.
    pub fn wait_for_acknowledgements(&self, count: usize, timeout: Duration) -> bool {
        let guard = self.shared.lock();
        let (script, _) = self
            .shared
            .changed
            .wait_timeout_while(guard, timeout, |script| {
                script.acknowledgements.len() < count
            })
            .unwrap_or_else(PoisonError::into_inner);
        script.acknowledgements.len() >= count
    }

    /// Unary calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<CallRequest> {
        self.shared.lock().calls.clone()
    }

    /// Accepted or refused subscribe requests, in order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<(InstanceId, MemberIndex)> {
        self.shared.lock().subscriptions.clone()
    }

    /// Unsubscribe requests, in order.
    #[must_use]
    pub fn unsubscriptions(&self) -> Vec<(InstanceId, MemberIndex)> {
        self.shared.lock().unsubscriptions.clone()
    }

    /// Instances destroyed so far.
    #[must_use]
    pub fn destroyed(&self) -> Vec<InstanceId> {
        self.shared.lock().destroyed.clone()
    }

    /// Number of event calls opened so far.
    #[must_use]
    pub fn events_opened(&self) -> usize {
        self.shared.lock().events_opened
    }

    /// Number of wake-up nudges received.
    #[must_use]
    pub fn wakes(&self) -> usize {
        self.shared.lock().wakes
    }

    /// Whether the current event call was cancelled.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.shared.lock().cancelled
    }
}

impl RemoteStub for ScriptedRemote {
    fn create(&self, class_id: &str) -> Result<InstanceId, RemoteError> {
        let mut script = self.shared.lock();
        if !script.classes.contains_key(class_id) {
            return Err(RemoteError::Rejected {
                code: -32602,
                message: format!("unknown class '{class_id}'"),
            });
        }
        script.next_instance += 1;
        let instance = InstanceId::new(format!("{class_id}#{}", script.next_instance));
        script
            .instances
            .insert(instance.clone(), class_id.to_owned());
        Ok(instance)
    }

    fn destroy(&self, instance: &InstanceId) -> Result<bool, RemoteError> {
        let mut script = self.shared.lock();
        if script.refuse_destroy {
            return Ok(false);
        }
        let known = script.instances.remove(instance).is_some();
        if known {
            script.destroyed.push(instance.clone());
        }
        Ok(known)
    }

    fn describe(&self, instance: &InstanceId) -> Result<Vec<MemberDescriptor>, RemoteError> {
        let script = self.shared.lock();
        Ok(script
            .instances
            .get(instance)
            .and_then(|class_id| script.classes.get(class_id))
            .cloned()
            .unwrap_or_default())
    }

    fn call(&self, request: CallRequest) -> Result<Value, RemoteError> {
        let responder = {
            let mut script = self.shared.lock();
            script.calls.push(request.clone());
            script.responder.clone()
        };
        responder.map_or(Ok(Value::Null), |respond| respond(&request))
    }

    fn connect_event(&self, instance: &InstanceId, index: MemberIndex) -> Result<bool, RemoteError> {
        let mut script = self.shared.lock();
        script.subscriptions.push((instance.clone(), index));
        Ok(!script.refuse_subscriptions)
    }

    fn disconnect_event(
        &self,
        instance: &InstanceId,
        index: MemberIndex,
    ) -> Result<bool, RemoteError> {
        self.shared
            .lock()
            .unsubscriptions
            .push((instance.clone(), index));
        Ok(true)
    }

    fn handle_event(&self, acks: Arc<AckQueue>) -> Result<EventCall, RemoteError> {
        let generation = {
            let mut script = self.shared.lock();
            script.generation += 1;
            script.events_opened += 1;
            script.ended = false;
            script.cancelled = false;
            script.generation
        };
        let drain = Arc::clone(&self.shared);
        thread::Builder::new()
            .name(String::from("scripted-acks"))
            .spawn(move || {
                for ack in acks.iter() {
                    drain.update(|script| script.acknowledgements.push(ack));
                }
                drain.update(|script| {
                    if script.generation == generation {
                        script.ended = true;
                    }
                });
            })?;
        let control = Arc::new(ScriptedControl {
            shared: Arc::clone(&self.shared),
            generation,
        });
        let inbound = ScriptedInbound {
            shared: Arc::clone(&self.shared),
            generation,
            done: false,
        };
        Ok(EventCall::new(Box::new(inbound), control))
    }
}

struct ScriptedControl {
    shared: Arc<Shared>,
    generation: u64,
}

impl StreamControl for ScriptedControl {
    fn cancel(&self) {
        self.shared.update(|script| {
            if script.generation == self.generation {
                script.cancelled = true;
            }
        });
    }

    fn wake(&self) {
        self.shared.update(|script| script.wakes += 1);
    }
}

struct ScriptedInbound {
    shared: Arc<Shared>,
    generation: u64,
    done: bool,
}

impl Iterator for ScriptedInbound {
    type Item = Result<Notification, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut script = self.shared.lock();
        loop {
            if script.generation != self.generation {
                self.done = true;
                return None;
            }
            if script.cancelled {
                self.done = true;
                return Some(Err(StreamError::Cancelled));
            }
            match script.pending.pop_front() {
                Some(Step::Deliver(notification)) => return Some(Ok(notification)),
                Some(Step::Fail(failure)) => {
                    self.done = true;
                    return Some(Err(failure));
                }
                Some(Step::End) => {
                    self.done = true;
                    return None;
                }
                None => {}
            }
            if script.ended {
                self.done = true;
                return None;
            }
            script = self
                .shared
                .changed
                .wait(script)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
