//! Proxies for remote instances.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tether_core::{
    CallContext, CallKind, CallRequest, Handler, InstanceId, MemberDescriptor, MemberKind,
};
use tracing::debug;

use crate::client::ClientCore;
use crate::error::ClientError;
use crate::members::MemberTable;

const OBJECT_TARGET: &str = "tether_client::object";

/// A live remote instance and the typed view of its members.
///
/// Every outbound call takes the [`CallContext`] it is issued from: handlers
/// pass the context they were given, other code passes
/// [`CallContext::root`]. Dropping the object destroys the instance.
pub struct RemoteObject {
    core: Arc<ClientCore>,
    class_id: String,
    instance: InstanceId,
    members: MemberTable,
    destroying: Mutex<()>,
    destroyed: AtomicBool,
}

impl RemoteObject {
    pub(crate) fn new(
        core: Arc<ClientCore>,
        class_id: &str,
        instance: InstanceId,
        members: Vec<MemberDescriptor>,
    ) -> Self {
        Self {
            core,
            class_id: class_id.to_owned(),
            instance,
            members: MemberTable::new(members),
            destroying: Mutex::new(()),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Identifier of the remote instance.
    #[must_use]
    pub const fn instance(&self) -> &InstanceId {
        &self.instance
    }

    /// Class the instance was created from.
    #[must_use]
    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    /// All members of the instance.
    #[must_use]
    pub const fn members(&self) -> &MemberTable {
        &self.members
    }

    /// Looks up one member by name.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MemberNotFound`] for an unknown name.
    pub fn member(&self, name: &str) -> Result<&MemberDescriptor, ClientError> {
        self.members.get_member(&self.instance, name)
    }

    /// Reads a property.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the member is not a property, the object
    /// is gone, or the call fails.
    pub fn get(&self, context: &CallContext<'_>, name: &str) -> Result<Value, ClientError> {
        self.call(context, name, MemberKind::Property, CallKind::GetProperty, Vec::new())
    }

    /// Writes a property.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the member is not a property, the object
    /// is gone, or the call fails.
    pub fn set(&self, context: &CallContext<'_>, name: &str, value: Value) -> Result<(), ClientError> {
        self.call(context, name, MemberKind::Property, CallKind::SetProperty, vec![value])
            .map(drop)
    }

    /// Invokes a method.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the member is not a method, the object is
    /// gone, or the call fails.
    pub fn invoke(
        &self,
        context: &CallContext<'_>,
        name: &str,
        arguments: Vec<Value>,
    ) -> Result<Value, ClientError> {
        self.call(context, name, MemberKind::Method, CallKind::Invoke, arguments)
    }

    /// Connects `handler` to an event member.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the member is not an event, the object is
    /// gone, or the host refused the subscription.
    pub fn connect(&self, name: &str, handler: Handler) -> Result<(), ClientError> {
        let index = self.live_member(name, MemberKind::Event)?.index;
        self.core.registry.connect(&self.instance, index, handler)?;
        Ok(())
    }

    /// Disconnects one registration of `handler` from an event member.
    ///
    /// Returns `false` when the handler was not connected.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the member is not an event, the object is
    /// gone, or the host refused to unsubscribe.
    pub fn disconnect(&self, name: &str, handler: &Handler) -> Result<bool, ClientError> {
        let index = self.live_member(name, MemberKind::Event)?.index;
        Ok(self.core.registry.disconnect(&self.instance, index, handler)?)
    }

    /// Destroys the instance on the host, then drops its handlers.
    ///
    /// Once the host released the instance later calls succeed without
    /// contacting it. A failed or rejected destroy leaves the object usable
    /// and its handlers connected, so it may be retried.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] after the client closed,
    /// [`ClientError::DestroyRejected`] when the host kept the instance and
    /// [`ClientError::Remote`] when the call failed.
    pub fn destroy(&self) -> Result<(), ClientError> {
        let _exclusive = self.destroying.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_destroyed() {
            return Ok(());
        }
        self.core.ensure_open()?;
        if !self.core.remote.destroy(&self.instance)? {
            return Err(ClientError::DestroyRejected {
                instance: self.instance.clone(),
            });
        }
        self.destroyed.store(true, Ordering::Release);
        self.core.registry.unregister_instance(&self.instance);
        debug!(target: OBJECT_TARGET, instance = %self.instance, "destroyed remote object");
        Ok(())
    }

    /// Whether [`destroy`](Self::destroy) succeeded.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn live_member(&self, name: &str, kind: MemberKind) -> Result<&MemberDescriptor, ClientError> {
        if self.is_destroyed() {
            return Err(ClientError::Closed);
        }
        self.core.ensure_open()?;
        self.members.get_member_of_kind(&self.instance, name, kind)
    }

    fn call(
        &self,
        context: &CallContext<'_>,
        name: &str,
        member_kind: MemberKind,
        call_kind: CallKind,
        arguments: Vec<Value>,
    ) -> Result<Value, ClientError> {
        let index = self.live_member(name, member_kind)?.index;
        let request = CallRequest {
            instance: self.instance.clone(),
            index,
            kind: call_kind,
            arguments,
            callback: context.callback_tag(),
        };
        Ok(self.core.remote.call(request)?)
    }
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObject")
            .field("class_id", &self.class_id)
            .field("instance", &self.instance)
            .field("members", &self.members.len())
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

impl Drop for RemoteObject {
    fn drop(&mut self) {
        if self.is_destroyed() {
            return;
        }
        if let Err(error) = self.destroy() {
            debug!(
                target: OBJECT_TARGET,
                instance = %self.instance,
                %error,
                "failed to destroy remote object on drop"
            );
        }
    }
}
