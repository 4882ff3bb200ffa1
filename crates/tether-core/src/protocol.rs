//! Messages exchanged with the remote host.
//!
//! Arguments and return values stay opaque [`Value`]s: the dispatch engine
//! only routes them, it never interprets them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Position of a member (property, method or event) in a remote type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberIndex(u32);

impl MemberIndex {
    /// Wraps a raw member index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Raw numeric index.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for MemberIndex {
    fn from(index: u32) -> Self {
        Self(index)
    }
}

impl fmt::Display for MemberIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps an identifier issued by the host.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrowed identifier text.
            #[must_use]
            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of a live remote instance.
    InstanceId
);

string_id!(
    /// Token correlating a notification with its acknowledgement.
    CorrelationId
);

/// An event pushed by the host for one member of one remote instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Instance whose member fired.
    pub instance: InstanceId,
    /// Event member that fired.
    pub index: MemberIndex,
    /// Token echoed back in the acknowledgement.
    pub correlation_id: CorrelationId,
    /// Event arguments.
    #[serde(default)]
    pub arguments: Vec<Value>,
}

impl Notification {
    /// Builds a notification.
    #[must_use]
    pub fn new(
        instance: impl Into<InstanceId>,
        index: impl Into<MemberIndex>,
        correlation_id: impl Into<CorrelationId>,
        arguments: Vec<Value>,
    ) -> Self {
        Self {
            instance: instance.into(),
            index: index.into(),
            correlation_id: correlation_id.into(),
            arguments,
        }
    }

    /// The acknowledgement completing this notification.
    #[must_use]
    pub fn acknowledgement(&self) -> Acknowledgement {
        Acknowledgement {
            index: self.index,
            correlation_id: self.correlation_id.clone(),
        }
    }
}

/// Completion signal sent once every handler of a notification returned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Acknowledgement {
    /// Member index of the acknowledged notification.
    pub index: MemberIndex,
    /// Correlation token of the acknowledged notification.
    pub correlation_id: CorrelationId,
}

impl Acknowledgement {
    /// Builds an acknowledgement.
    #[must_use]
    pub fn new(index: impl Into<MemberIndex>, correlation_id: impl Into<CorrelationId>) -> Self {
        Self {
            index: index.into(),
            correlation_id: correlation_id.into(),
        }
    }
}

/// Kind of a remote member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    /// Readable and writable value.
    Property,
    /// Callable operation.
    Method,
    /// Notification source handlers can connect to.
    Event,
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Property => "property",
            Self::Method => "method",
            Self::Event => "event",
        };
        f.write_str(label)
    }
}

/// Description of one member of a remote type, as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDescriptor {
    /// Member name.
    pub name: String,
    /// Member index used on the wire.
    pub index: MemberIndex,
    /// What kind of member this is.
    pub kind: MemberKind,
}

impl MemberDescriptor {
    /// Builds a descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, index: impl Into<MemberIndex>, kind: MemberKind) -> Self {
        Self {
            name: name.into(),
            index: index.into(),
            kind,
        }
    }
}

/// Operation requested by an outbound unary call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    /// Read a property.
    GetProperty,
    /// Write a property.
    SetProperty,
    /// Invoke a method.
    Invoke,
}

/// An outbound unary call against one member of a remote instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    /// Target instance.
    pub instance: InstanceId,
    /// Target member.
    pub index: MemberIndex,
    /// Requested operation.
    pub kind: CallKind,
    /// Call arguments.
    #[serde(default)]
    pub arguments: Vec<Value>,
    /// Event member whose handler issued this call, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<MemberIndex>,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    fn acknowledgement_echoes_identity() {
        let notification = Notification::new("inst-1", 3, "a", vec![json!(true)]);
        assert_eq!(notification.acknowledgement(), Acknowledgement::new(3, "a"));
    }

    #[rstest]
    fn notification_deserialises_without_arguments() {
        let notification: Notification =
            serde_json::from_value(json!({"instance": "i", "index": 7, "correlation_id": "c"}))
                .expect("parse notification");
        assert_eq!(notification.index, MemberIndex::new(7));
        assert!(notification.arguments.is_empty());
    }

    #[rstest]
    fn untagged_call_omits_callback() {
        let request = CallRequest {
            instance: InstanceId::from("i"),
            index: MemberIndex::new(1),
            kind: CallKind::Invoke,
            arguments: Vec::new(),
            callback: None,
        };
        let encoded = serde_json::to_value(&request).expect("encode request");
        assert!(encoded.get("callback").is_none());
        assert_eq!(encoded.get("kind"), Some(&json!("invoke")));
    }
}
