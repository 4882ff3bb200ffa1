//! Notification dispatch engine for remote objects.
//!
//! A client drives out-of-process objects through unary calls while the host
//! pushes event notifications back over one long-lived event call. This crate
//! is the machinery around that event call:
//!
//! - [`AckQueue`] carries acknowledgements back to the host and closes
//!   without starving a blocked producer.
//! - [`ContextStack`] and [`CallContext`] track which notification is being
//!   handled so outbound calls from a handler carry a callback tag.
//! - [`HandlerRegistry`] keeps the handler sets per instance and member and
//!   subscribes or unsubscribes events on the host as sets fill and empty.
//! - [`NotificationStream`] opens the event call lazily and reopens it after
//!   a close.
//! - [`DispatchLoop`] reads notifications in order, runs their handlers and
//!   acknowledges each one, and [`DispatchLoopManager`] runs it on a
//!   dedicated thread for the lifetime of a client.
//!
//! The host itself is reached through the [`RemoteStub`] trait; this crate
//! never assumes a transport.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tether_core::{
//!     DispatchLoop, DispatchLoopManager, Handler, HandlerRegistry, InstanceId, MemberIndex,
//!     NotificationStream, RemoteStub,
//! };
//!
//! fn serve(remote: Arc<dyn RemoteStub>) -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(HandlerRegistry::new(Arc::clone(&remote)));
//!     let stream = Arc::new(NotificationStream::new(remote, Some(64)));
//!     let manager = DispatchLoopManager::new(Arc::new(DispatchLoop::new(
//!         Arc::clone(&registry),
//!         stream,
//!     )));
//!     manager.start()?;
//!
//!     let instance = InstanceId::from("clock#1");
//!     registry.register_instance(instance.clone());
//!     registry.connect(&instance, MemberIndex::new(2), Handler::new(|_, _| Ok(())))?;
//!
//!     manager.stop(Some(Duration::from_secs(5)))?;
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod remote;
pub mod stream;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

#[cfg(test)]
mod tests;

pub use self::context::{CallContext, ContextScope, ContextStack};
pub use self::dispatch::{DispatchLoop, LoopState};
pub use self::error::{
    DispatchError, HandlerError, ManagerError, QueueError, RegistryError, RemoteError, StreamError,
};
pub use self::manager::DispatchLoopManager;
pub use self::protocol::{
    Acknowledgement, CallKind, CallRequest, CorrelationId, InstanceId, MemberDescriptor,
    MemberIndex, MemberKind, Notification,
};
pub use self::queue::{AckQueue, CloseableQueue};
pub use self::registry::{DispatchReport, Handler, HandlerRegistry};
pub use self::remote::{EventCall, Inbound, RemoteStub, StreamControl};
pub use self::stream::{NotificationStream, OpenStream};
