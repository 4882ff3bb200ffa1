//! Explicit call-context tracking for reentrant outbound calls.
//!
//! Each dispatch thread owns one [`ContextStack`]. A notification is pushed
//! before its handlers run and popped by the [`ContextScope`] guard on every
//! exit path, including unwinding. Handlers receive a [`CallContext`] view of
//! the stack and pass it to outbound calls, which tag themselves with the
//! member index of the innermost notification. Code outside any handler uses
//! [`CallContext::root`], which carries no tag.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::protocol::{MemberIndex, Notification};

/// Stack of notifications currently being handled on one dispatch thread.
#[derive(Debug, Default)]
pub struct ContextStack {
    frames: Vec<Arc<Notification>>,
}

impl ContextStack {
    /// Creates an empty stack.
    #[must_use]
    pub const fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Pushes a notification; the returned guard pops it when dropped.
    pub fn enter(&mut self, notification: Arc<Notification>) -> ContextScope<'_> {
        self.frames.push(notification);
        ContextScope { stack: self }
    }

    /// Innermost notification, if any.
    #[must_use]
    pub fn current(&self) -> Option<&Notification> {
        self.frames.last().map(Arc::as_ref)
    }

    /// Nesting depth; zero outside any handler.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Read-only view handed to handlers and outbound calls.
    #[must_use]
    pub fn context(&self) -> CallContext<'_> {
        CallContext {
            frames: &self.frames,
        }
    }
}

/// Guard keeping one notification on a [`ContextStack`].
#[derive(Debug)]
pub struct ContextScope<'a> {
    stack: &'a mut ContextStack,
}

impl Deref for ContextScope<'_> {
    type Target = ContextStack;

    fn deref(&self) -> &ContextStack {
        self.stack
    }
}

impl DerefMut for ContextScope<'_> {
    fn deref_mut(&mut self) -> &mut ContextStack {
        self.stack
    }
}

impl Drop for ContextScope<'_> {
    fn drop(&mut self) {
        self.stack.frames.pop();
    }
}

/// Borrowed view of the notifications enclosing the current call.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    frames: &'a [Arc<Notification>],
}

impl CallContext<'static> {
    /// Context for code running outside any handler.
    #[must_use]
    pub const fn root() -> Self {
        Self { frames: &[] }
    }
}

impl CallContext<'_> {
    /// Innermost notification being handled, if any.
    #[must_use]
    pub fn current(&self) -> Option<&Notification> {
        self.frames.last().map(Arc::as_ref)
    }

    /// Nesting depth; zero outside any handler.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether the caller runs inside a notification handler.
    #[must_use]
    pub const fn in_handler(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Originating-callback tag for outbound calls issued from here.
    #[must_use]
    pub fn callback_tag(&self) -> Option<MemberIndex> {
        self.current().map(|notification| notification.index)
    }
}

impl Default for CallContext<'static> {
    fn default() -> Self {
        Self::root()
    }
}
