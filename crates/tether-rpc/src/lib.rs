//! Framed JSON-RPC remote stub.
//!
//! `tether-rpc` drives a remote host over any pair of byte pipes, typically
//! the standard I/O of a host process the caller already spawned or a local
//! socket. Messages are JSON-RPC 2.0 payloads framed with a `Content-Length`
//! header. [`RpcConnection`] implements [`tether_core::RemoteStub`], so it can
//! be handed straight to the dispatch engine.
//!
//! # Event call
//!
//! The bidirectional event call is carried by a handful of methods from
//! [`methods`]: the client opens it with an `events/open` request, the host
//! pushes `events/notify` notifications, the client answers each with an
//! `events/ack` and sends `events/close` once its acknowledgement queue is
//! closed and drained, and the host finishes with `events/end`. A cancelled
//! call sends `events/cancel` instead.

pub mod connection;
pub mod error;
pub mod frame;
pub mod jsonrpc;
pub mod methods;

pub use self::connection::{RpcConnection, RpcOptions};
pub use self::error::FrameError;
pub use self::frame::{FrameReader, FrameWriter};
pub use self::jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};
