//! Name-indexed member descriptors of one remote type.

use std::collections::HashMap;

use tether_core::{InstanceId, MemberDescriptor, MemberKind};

use crate::error::ClientError;

/// Lookup table from member name to descriptor, built once per instance.
#[derive(Debug, Clone, Default)]
pub struct MemberTable {
    by_name: HashMap<String, MemberDescriptor>,
}

impl MemberTable {
    /// Indexes `descriptors` by name; a later duplicate name wins.
    #[must_use]
    pub fn new(descriptors: Vec<MemberDescriptor>) -> Self {
        let by_name = descriptors
            .into_iter()
            .map(|descriptor| (descriptor.name.clone(), descriptor))
            .collect();
        Self { by_name }
    }

    /// Looks up a member of `instance` by name.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MemberNotFound`] when no member has this name.
    pub fn get_member(
        &self,
        instance: &InstanceId,
        name: &str,
    ) -> Result<&MemberDescriptor, ClientError> {
        self.by_name
            .get(name)
            .ok_or_else(|| ClientError::MemberNotFound {
                instance: instance.clone(),
                name: name.to_owned(),
            })
    }

    /// Looks up a member and checks its kind.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MemberNotFound`] or
    /// [`ClientError::WrongMemberKind`].
    pub fn get_member_of_kind(
        &self,
        instance: &InstanceId,
        name: &str,
        expected: MemberKind,
    ) -> Result<&MemberDescriptor, ClientError> {
        let descriptor = self.get_member(instance, name)?;
        if descriptor.kind != expected {
            return Err(ClientError::WrongMemberKind {
                name: name.to_owned(),
                expected,
                actual: descriptor.kind,
            });
        }
        Ok(descriptor)
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether the type has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Member names, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }
}
