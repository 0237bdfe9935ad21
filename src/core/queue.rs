//! Thread-safe double-ended queue with blocking wait
//!
//! Hands messages between the I/O thread and consumer threads. All structural
//! mutations happen under one lock, and every push wakes one waiter.

use crate::error::{NetworkError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Concurrent deque with a blocking `wait`
pub struct ThreadSafeQueue<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
}

impl<T> ThreadSafeQueue<T> {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        }
    }

    /// Push an item at the back and wake one waiter
    pub fn push_back(&self, item: T) {
        self.items.lock().push_back(item);
        self.not_empty.notify_one();
    }

    /// Push an item at the front and wake one waiter
    pub fn push_front(&self, item: T) {
        self.items.lock().push_front(item);
        self.not_empty.notify_one();
    }

    /// Push at the back, reporting whether the queue was empty beforehand.
    ///
    /// The check and the push happen under the same lock hold.
    pub(crate) fn push_back_checked(&self, item: T) -> bool {
        let was_empty = {
            let mut items = self.items.lock();
            let was_empty = items.is_empty();
            items.push_back(item);
            was_empty
        };
        self.not_empty.notify_one();
        was_empty
    }

    /// Remove the front item and return how many remain
    pub(crate) fn drop_front(&self) -> usize {
        let mut items = self.items.lock();
        items.pop_front();
        items.len()
    }

    /// Pop the front item
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::EmptyQueue`] if there is nothing to pop.
    pub fn pop_front(&self) -> Result<T> {
        self.items.lock().pop_front().ok_or(NetworkError::EmptyQueue)
    }

    /// Pop the back item
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::EmptyQueue`] if there is nothing to pop.
    pub fn pop_back(&self) -> Result<T> {
        self.items.lock().pop_back().ok_or(NetworkError::EmptyQueue)
    }

    /// Check if the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Number of queued items
    #[must_use]
    pub fn count(&self) -> usize {
        self.items.lock().len()
    }

    /// Drop every queued item
    pub fn clear(&self) {
        self.items.lock().clear();
    }

    /// Block the calling thread until the queue holds at least one item
    pub fn wait(&self) {
        let mut items = self.items.lock();
        while items.is_empty() {
            self.not_empty.wait(&mut items);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// Returns `true` if the queue is non-empty on return.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        while items.is_empty() {
            if self.not_empty.wait_until(&mut items, deadline).timed_out() {
                return !items.is_empty();
            }
        }
        true
    }
}

impl<T: Clone> ThreadSafeQueue<T> {
    /// Clone of the front item
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::EmptyQueue`] if the queue is empty.
    pub fn front(&self) -> Result<T> {
        self.items
            .lock()
            .front()
            .cloned()
            .ok_or(NetworkError::EmptyQueue)
    }

    /// Clone of the back item
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::EmptyQueue`] if the queue is empty.
    pub fn back(&self) -> Result<T> {
        self.items
            .lock()
            .back()
            .cloned()
            .ok_or(NetworkError::EmptyQueue)
    }
}

impl<T> Default for ThreadSafeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ThreadSafeQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSafeQueue")
            .field("count", &self.count())
            .finish()
    }
}
