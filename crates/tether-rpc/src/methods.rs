//! Method names and parameter shapes spoken between client and host.

use serde::{Deserialize, Serialize};
use tether_core::{InstanceId, MemberIndex};

/// Readiness probe; answered with `null`.
pub const PING: &str = "ping";
/// Creates an instance: [`CreateParams`] → instance id.
pub const CREATE: &str = "create";
/// Destroys an instance: [`InstanceParams`] → `bool`.
pub const DESTROY: &str = "destroy";
/// Lists members: [`InstanceParams`] → member descriptors.
pub const DESCRIBE: &str = "describe";
/// Unary member call: a `CallRequest` → value.
pub const CALL: &str = "call";
/// Subscribes an event: [`EventParams`] → `bool`.
pub const CONNECT_EVENT: &str = "connect_event";
/// Unsubscribes an event: [`EventParams`] → `bool`.
pub const DISCONNECT_EVENT: &str = "disconnect_event";

/// Opens the event call (request).
pub const EVENTS_OPEN: &str = "events/open";
/// Host → client notification carrying one `Notification`.
pub const EVENTS_NOTIFY: &str = "events/notify";
/// Client → host notification carrying one `Acknowledgement`.
pub const EVENTS_ACK: &str = "events/ack";
/// Client → host: no more acknowledgements will follow.
pub const EVENTS_CLOSE: &str = "events/close";
/// Client → host: the client abandoned the event call.
pub const EVENTS_CANCEL: &str = "events/cancel";
/// Host → client: the event call is over.
pub const EVENTS_END: &str = "events/end";

/// Parameters of [`CREATE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateParams {
    /// Class to instantiate.
    pub class_id: String,
}

/// Parameters of [`DESTROY`] and [`DESCRIBE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceParams {
    /// Target instance.
    pub instance: InstanceId,
}

/// Parameters of [`CONNECT_EVENT`] and [`DISCONNECT_EVENT`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventParams {
    /// Target instance.
    pub instance: InstanceId,
    /// Event member.
    pub index: MemberIndex,
}
