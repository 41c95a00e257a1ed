//! Dispatch Queue and Holding Buffer (§4.3).
//!
//! Both share this one FIFO type: an unbounded `VecDeque` behind a
//! `std::sync::Mutex`, with O(1) enqueue/dequeue and linear-time identity
//! membership (`Arc::ptr_eq`), matching §4.3 exactly. Never hold the lock
//! across an `.await` — every method here is synchronous and short.

use crate::command::RedisCommand;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub(crate) struct CommandQueue {
    inner: Mutex<VecDeque<Arc<dyn RedisCommand>>>,
}

impl CommandQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn push_back(&self, cmd: Arc<dyn RedisCommand>) {
        self.inner.lock().unwrap().push_back(cmd);
    }

    pub(crate) fn pop_front(&self) -> Option<Arc<dyn RedisCommand>> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Peeks the head without removing it (§4.6 step 3a).
    pub(crate) fn peek_front(&self) -> Option<Arc<dyn RedisCommand>> {
        self.inner.lock().unwrap().front().cloned()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub(crate) fn contains(&self, cmd: &Arc<dyn RedisCommand>) -> bool {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .any(|existing| Arc::ptr_eq(existing, cmd))
    }

    /// Drains all entries in FIFO order, leaving the queue empty.
    pub(crate) fn drain_all(&self) -> Vec<Arc<dyn RedisCommand>> {
        self.inner.lock().unwrap().drain(..).collect()
    }
}
