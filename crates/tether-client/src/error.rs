//! Errors surfaced by the client facade.

use tether_core::{InstanceId, ManagerError, MemberKind, RegistryError, RemoteError};
use thiserror::Error;

/// Failures of client, remote object and client registry operations.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// A unary call to the host failed.
    #[error("remote call failed: {0}")]
    Remote(#[from] RemoteError),

    /// Connecting or disconnecting an event handler failed.
    #[error("event registration failed: {0}")]
    Registry(#[from] RegistryError),

    /// Starting or stopping the dispatch thread failed.
    #[error("dispatch thread failed: {0}")]
    Manager(#[from] ManagerError),

    /// The remote type has no member with this name.
    #[error("'{instance}' has no member named '{name}'")]
    MemberNotFound {
        /// Instance that was searched.
        instance: InstanceId,
        /// Requested member name.
        name: String,
    },

    /// The member exists but does not support the requested operation.
    #[error("member '{name}' is a {actual}, not a {expected}")]
    WrongMemberKind {
        /// Member name.
        name: String,
        /// Kind the operation needs.
        expected: MemberKind,
        /// Kind the member has.
        actual: MemberKind,
    },

    /// The client was closed, or the object was destroyed.
    #[error("client is closed")]
    Closed,

    /// The host refused to destroy the instance.
    #[error("host refused to destroy '{instance}'")]
    DestroyRejected {
        /// Instance the host kept.
        instance: InstanceId,
    },
}
