//! The worker's inbound message queue.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct Inner<T> {
    queue: VecDeque<T>,
    done: bool,
}

/// A mutex-protected FIFO with condition-variable signalling, consumed by a
/// single worker. Producers push without blocking; the worker blocks while
/// the queue is empty and not terminated. Messages pushed before termination
/// are still drained.
pub struct MessageQueue<T> {
    inner: Mutex<Inner<T>>,
    cond: Condvar,
}

impl<T> MessageQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                done: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Enqueue a message and wake the worker. Pushes after termination are
    /// discarded.
    pub fn push(&self, msg: T) {
        let mut inner = self.inner.lock();
        if inner.done {
            return;
        }
        inner.queue.push_back(msg);
        self.cond.notify_one();
    }

    /// Dequeue the next message, blocking while the queue is empty. Returns
    /// `None` once the queue is terminated and drained.
    pub fn pop_wait(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(msg) = inner.queue.pop_front() {
                return Some(msg);
            }
            if inner.done {
                return None;
            }
            self.cond.wait(&mut inner);
        }
    }

    /// Non-blocking dequeue.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().queue.pop_front()
    }

    /// Set the termination flag and wake the worker.
    pub fn terminate(&self) {
        let mut inner = self.inner.lock();
        inner.done = true;
        self.cond.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
