//! Per-instance, per-member handler sets and their subscription state.
//!
//! Each `(instance, member)` pair owns one [`HandlerSet`] guarded by two
//! locks. The membership lock serialises `connect` and `disconnect`, and is
//! held across the subscribe or unsubscribe call so concurrent registrations
//! never issue duplicate host calls. The snapshot lock guards only the handler
//! list and is held for a push, a removal, or a clone; dispatch takes nothing
//! else, so a handler may call back into `connect` or `disconnect` on its own
//! member without deadlocking.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::{debug, warn};

use crate::context::CallContext;
use crate::error::{HandlerError, RegistryError};
use crate::protocol::{InstanceId, MemberIndex};
use crate::remote::RemoteStub;

const REGISTRY_TARGET: &str = "tether_core::registry";

type HandlerFn = dyn Fn(&CallContext<'_>, &[Value]) -> Result<(), HandlerError> + Send + Sync;

/// A registered event handler.
///
/// Handlers compare by identity: two clones of one `Handler` are equal, two
/// handlers built from identical closures are not.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    /// Wraps a handler function.
    #[must_use]
    pub fn new<F>(function: F) -> Self
    where
        F: Fn(&CallContext<'_>, &[Value]) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Self(Arc::new(function))
    }

    /// Runs the handler, converting a panic into a [`HandlerError`].
    ///
    /// # Errors
    ///
    /// Returns the handler's own error, or the converted panic.
    pub fn invoke(&self, context: &CallContext<'_>, arguments: &[Value]) -> Result<(), HandlerError> {
        panic::catch_unwind(AssertUnwindSafe(|| (self.0)(context, arguments)))
            .unwrap_or_else(|payload| Err(HandlerError::from_panic(payload.as_ref())))
    }

    fn address(&self) -> *const () {
        Arc::as_ptr(&self.0).cast::<()>()
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Eq for Handler {}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.address()).finish()
    }
}

/// Outcome of dispatching one notification to its handler set.
#[derive(Debug, Default)]
pub struct DispatchReport {
    invoked: usize,
    failures: Vec<HandlerError>,
}

impl DispatchReport {
    /// Number of handlers that ran, failed or not.
    #[must_use]
    pub const fn invoked(&self) -> usize {
        self.invoked
    }

    /// Failures raised by individual handlers, in invocation order.
    #[must_use]
    pub fn failures(&self) -> &[HandlerError] {
        &self.failures
    }

    /// Whether every handler returned successfully.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Default)]
struct HandlerSet {
    membership: Mutex<()>,
    handlers: Mutex<Vec<Handler>>,
    retired: AtomicBool,
}

impl HandlerSet {
    fn snapshot(&self) -> Vec<Handler> {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn len(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

type MemberSets = HashMap<MemberIndex, Arc<HandlerSet>>;

/// Routes notifications to handlers and keeps host subscriptions in step.
pub struct HandlerRegistry {
    remote: Arc<dyn RemoteStub>,
    instances: Mutex<HashMap<InstanceId, MemberSets>>,
}

impl HandlerRegistry {
    /// Creates an empty registry issuing subscription calls through `remote`.
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteStub>) -> Self {
        Self {
            remote,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Makes `instance` known so handlers can be connected to its members.
    ///
    /// Registering an instance twice keeps its existing handler sets.
    pub fn register_instance(&self, instance: InstanceId) {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(instance)
            .or_default();
    }

    /// Drops every handler set of `instance` without contacting the host.
    ///
    /// Returns `false` when the instance was not registered.
    pub fn unregister_instance(&self, instance: &InstanceId) -> bool {
        let removed = self
            .instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(instance);
        let Some(sets) = removed else {
            return false;
        };
        for set in sets.values() {
            let _membership = set.membership.lock().unwrap_or_else(PoisonError::into_inner);
            set.retired.store(true, Ordering::Release);
            set.handlers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
        debug!(
            target: REGISTRY_TARGET,
            instance = %instance,
            members = sets.len(),
            "unregistered instance"
        );
        true
    }

    /// Whether `instance` is registered.
    #[must_use]
    pub fn is_registered(&self, instance: &InstanceId) -> bool {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(instance)
    }

    /// Adds `handler` to the set of `(instance, index)`.
    ///
    /// The first handler of a set subscribes the event on the host; the
    /// handler is only added once the host accepted.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownInstance`] for an unregistered
    /// instance, [`RegistryError::SubscribeRejected`] when the host refused,
    /// and [`RegistryError::Remote`] when the subscribe call failed.
    pub fn connect(
        &self,
        instance: &InstanceId,
        index: MemberIndex,
        handler: Handler,
    ) -> Result<(), RegistryError> {
        let set = self.set_for(instance, index)?;
        let _membership = set.membership.lock().unwrap_or_else(PoisonError::into_inner);
        if set.retired.load(Ordering::Acquire) {
            return Err(unknown(instance));
        }
        if set.len() == 0 {
            if !self.remote.connect_event(instance, index)? {
                return Err(RegistryError::SubscribeRejected {
                    instance: instance.clone(),
                    index,
                });
            }
            debug!(target: REGISTRY_TARGET, instance = %instance, index = %index, "subscribed event");
        }
        set.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
        Ok(())
    }

    /// Removes one registration of `handler` from `(instance, index)`.
    ///
    /// Removing the last handler unsubscribes the event on the host first;
    /// if that fails the handler stays registered. Returns `false` when the
    /// handler was not registered.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownInstance`] for an unregistered
    /// instance, [`RegistryError::UnsubscribeRejected`] when the host refused,
    /// and [`RegistryError::Remote`] when the unsubscribe call failed.
    pub fn disconnect(
        &self,
        instance: &InstanceId,
        index: MemberIndex,
        handler: &Handler,
    ) -> Result<bool, RegistryError> {
        let Some(set) = self.existing_set(instance, index)? else {
            return Ok(false);
        };
        let _membership = set.membership.lock().unwrap_or_else(PoisonError::into_inner);
        if set.retired.load(Ordering::Acquire) {
            return Err(unknown(instance));
        }
        let snapshot = set.snapshot();
        let Some(position) = snapshot.iter().position(|candidate| candidate == handler) else {
            return Ok(false);
        };
        if snapshot.len() == 1 {
            if !self.remote.disconnect_event(instance, index)? {
                return Err(RegistryError::UnsubscribeRejected {
                    instance: instance.clone(),
                    index,
                });
            }
            debug!(target: REGISTRY_TARGET, instance = %instance, index = %index, "unsubscribed event");
        }
        set.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(position);
        Ok(true)
    }

    /// Runs every handler of `(instance, index)` in registration order.
    ///
    /// The handler list is snapshotted first; handlers connected or
    /// disconnected meanwhile take effect from the next notification. A
    /// failing or panicking handler does not stop the ones after it.
    pub fn dispatch(
        &self,
        context: &CallContext<'_>,
        instance: &InstanceId,
        index: MemberIndex,
        arguments: &[Value],
    ) -> DispatchReport {
        let handlers = match self.existing_set(instance, index) {
            Ok(Some(set)) => set.snapshot(),
            Ok(None) => Vec::new(),
            Err(_) => {
                debug!(
                    target: REGISTRY_TARGET,
                    instance = %instance,
                    index = %index,
                    "notification for unknown instance"
                );
                Vec::new()
            }
        };

        let mut report = DispatchReport::default();
        for handler in &handlers {
            report.invoked += 1;
            if let Err(error) = handler.invoke(context, arguments) {
                warn!(
                    target: REGISTRY_TARGET,
                    instance = %instance,
                    index = %index,
                    error = %error,
                    "event handler failed"
                );
                report.failures.push(error);
            }
        }
        report
    }

    /// Number of handlers registered on `(instance, index)`.
    #[must_use]
    pub fn handler_count(&self, instance: &InstanceId, index: MemberIndex) -> usize {
        match self.existing_set(instance, index) {
            Ok(Some(set)) => set.len(),
            _ => 0,
        }
    }

    /// Whether the host currently delivers `(instance, index)`.
    #[must_use]
    pub fn is_subscribed(&self, instance: &InstanceId, index: MemberIndex) -> bool {
        self.handler_count(instance, index) > 0
    }

    fn set_for(
        &self,
        instance: &InstanceId,
        index: MemberIndex,
    ) -> Result<Arc<HandlerSet>, RegistryError> {
        let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        let sets = instances.get_mut(instance).ok_or_else(|| unknown(instance))?;
        Ok(Arc::clone(sets.entry(index).or_default()))
    }

    fn existing_set(
        &self,
        instance: &InstanceId,
        index: MemberIndex,
    ) -> Result<Option<Arc<HandlerSet>>, RegistryError> {
        let instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        let sets = instances.get(instance).ok_or_else(|| unknown(instance))?;
        Ok(sets.get(&index).cloned())
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let instances = self
            .instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("HandlerRegistry")
            .field("instances", &instances)
            .finish_non_exhaustive()
    }
}

fn unknown(instance: &InstanceId) -> RegistryError {
    RegistryError::UnknownInstance {
        instance: instance.clone(),
    }
}
