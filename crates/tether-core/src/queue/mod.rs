//! Bounded, closeable, blocking FIFO queue.
//!
//! The queue drives the outbound half of the event call: the dispatch thread
//! puts acknowledgements and the transport drains them with [`iter`]. Closing
//! is part of the same wait/wake protocol as `put`: [`close`] waits for a free
//! slot before marking the queue closed, so a producer blocked on a full
//! queue is never stranded mid-close. Items enqueued before the close stay
//! consumable until the backlog is drained.
//!
//! [`iter`]: CloseableQueue::iter
//! [`close`]: CloseableQueue::close

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::QueueError;
use crate::protocol::Acknowledgement;

/// Queue feeding acknowledgements to the host.
pub type AckQueue = CloseableQueue<Acknowledgement>;

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A FIFO queue with an optional bound and a one-way `closed` state.
pub struct CloseableQueue<T> {
    capacity: Option<usize>,
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> CloseableQueue<T> {
    /// Creates a queue; `None` or `Some(0)` means unbounded.
    #[must_use]
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity: capacity.filter(|bound| *bound > 0),
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Creates a queue holding at most `capacity` items.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self::new(Some(capacity))
    }

    /// Creates a queue without a bound.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Maximum number of queued items, `None` when unbounded.
    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Appends an item, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] if the queue is closed before a slot
    /// frees up.
    pub fn put(&self, item: T) -> Result<(), QueueError> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(QueueError::Closed);
            }
            if !self.is_full(&state) {
                self.push(&mut state, item);
                return Ok(());
            }
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Appends an item without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] when closed and [`QueueError::Full`]
    /// when at capacity.
    pub fn try_put(&self, item: T) -> Result<(), QueueError> {
        let mut state = self.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }
        if self.is_full(&state) {
            return Err(QueueError::Full);
        }
        self.push(&mut state, item);
        Ok(())
    }

    /// Removes the oldest item, blocking while the queue is empty and open.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] once the queue is closed and drained.
    pub fn get(&self) -> Result<T, QueueError> {
        let mut state = self.lock();
        loop {
            if let Some(item) = self.pop(&mut state) {
                return Ok(item);
            }
            if state.closed {
                return Err(QueueError::Closed);
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Removes the oldest item without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] when closed and drained, and
    /// [`QueueError::Empty`] when open and empty.
    pub fn try_get(&self) -> Result<T, QueueError> {
        let mut state = self.lock();
        match self.pop(&mut state) {
            Some(item) => Ok(item),
            None if state.closed => Err(QueueError::Closed),
            None => Err(QueueError::Empty),
        }
    }

    /// Removes the oldest item, waiting at most `timeout` for one to arrive.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] when closed and drained, and
    /// [`QueueError::Timeout`] when the deadline passes first.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, QueueError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(item) = self.pop(&mut state) {
                return Ok(item);
            }
            if state.closed {
                return Err(QueueError::Closed);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(QueueError::Timeout);
            }
            state = self
                .not_empty
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Closes the queue once it has a free slot. Idempotent.
    ///
    /// Waiting for a free slot lets a producer already blocked on a full
    /// queue be woken by the consumer and either complete its put or observe
    /// the close, instead of racing a close that ignores it.
    pub fn close(&self) {
        let mut state = self.lock();
        while !state.closed && self.is_full(&state) {
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        self.mark_closed(&mut state);
    }

    /// Closes the queue immediately, even when full. Idempotent.
    pub fn close_now(&self) {
        let mut state = self.lock();
        self.mark_closed(&mut state);
    }

    /// Whether [`close`](Self::close) has taken effect.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Whether no items are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Blocking iterator yielding items until the queue is closed and drained.
    #[must_use]
    pub const fn iter(&self) -> Iter<'_, T> {
        Iter { queue: self }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_full(&self, state: &QueueState<T>) -> bool {
        self.capacity
            .is_some_and(|capacity| state.items.len() >= capacity)
    }

    fn push(&self, state: &mut QueueState<T>, item: T) {
        state.items.push_back(item);
        self.not_empty.notify_one();
    }

    fn pop(&self, state: &mut QueueState<T>) -> Option<T> {
        let item = state.items.pop_front()?;
        // Producers and a pending close share `not_full`; wake all of them so
        // the close is never the only waiter left asleep.
        self.not_full.notify_all();
        Some(item)
    }

    fn mark_closed(&self, state: &mut QueueState<T>) {
        if state.closed {
            return;
        }
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

impl<T> Default for CloseableQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<T> fmt::Debug for CloseableQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("CloseableQueue")
            .field("capacity", &self.capacity)
            .field("len", &state.items.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// Blocking iterator over a [`CloseableQueue`].
#[derive(Debug)]
pub struct Iter<'a, T> {
    queue: &'a CloseableQueue<T>,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.queue.get().ok()
    }
}

impl<'a, T> IntoIterator for &'a CloseableQueue<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}
