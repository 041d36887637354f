//! Thread-safe double-ended queue with blocking waits
//!
//! The queue is the only structure shared between an I/O thread and the
//! application thread. Producers push from inside the tokio runtime, consumers
//! drain it from plain threads and may park on the condition variable until
//! something arrives.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Mutex-protected deque plus a condition variable for blocking consumers
#[derive(Debug)]
pub struct BlockingQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Appends an item and wakes one waiting consumer
    pub fn push_back(&self, item: T) {
        self.items.lock().push_back(item);
        self.available.notify_one();
    }

    /// Prepends an item and wakes one waiting consumer
    pub fn push_front(&self, item: T) {
        self.items.lock().push_front(item);
        self.available.notify_one();
    }

    pub fn pop_front(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    pub fn pop_back(&self) -> Option<T> {
        self.items.lock().pop_back()
    }

    pub fn count(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    /// Blocks the calling thread until at least one item is queued
    ///
    /// Spurious wakeups are absorbed by re-checking the deque under the lock,
    /// so on return the queue held an item at the moment the lock was released.
    pub fn wait(&self) {
        let mut items = self.items.lock();
        while items.is_empty() {
            self.available.wait(&mut items);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// Returns true if an item is available.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        while items.is_empty() {
            if self.available.wait_until(&mut items, deadline).timed_out() {
                return !items.is_empty();
            }
        }
        true
    }

    /// Waits for an item and removes it from the front in one step
    pub fn wait_pop_front(&self) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            self.available.wait(&mut items);
        }
    }
}

impl<T: Clone> BlockingQueue<T> {
    pub fn front(&self) -> Option<T> {
        self.items.lock().front().cloned()
    }

    pub fn back(&self) -> Option<T> {
        self.items.lock().back().cloned()
    }
}
