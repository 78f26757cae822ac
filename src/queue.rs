//! Fixed-capacity blocking queue coupling the writer pipeline's threads
//! (spec §4.2/§5). Grounded directly on
//! `examples/original_source/ftbwriter.h`'s `SlotQueue<T>` template (a
//! `SQ_NSLOTS`-slot ring buffer behind one `pthread_mutex_t` and one
//! `pthread_cond_t`): reproduced here with `std::sync::{Mutex, Condvar}`
//! and a ring of `Option<T>` slots.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Number of slots per queue, matching the reference's `SQ_NSLOTS`.
pub const SQ_NSLOTS: usize = 4;

struct Inner<T> {
    items: VecDeque<T>,
    capacity: usize,
}

/// A bounded MPMC queue: `enqueue` blocks while full, `dequeue` blocks
/// while empty. Used for every hand-off in the writer's thread pipeline
/// (walker → compressor → finisher, plus the history side-queue).
pub struct SlotQueue<T> {
    inner: Mutex<Inner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> SlotQueue<T> {
    pub fn new() -> Self {
        Self::with_capacity(SQ_NSLOTS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { items: VecDeque::with_capacity(capacity), capacity }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    pub fn enqueue(&self, item: T) {
        let mut guard = self.inner.lock().unwrap();
        while guard.items.len() == guard.capacity {
            guard = self.not_full.wait(guard).unwrap();
        }
        guard.items.push_back(item);
        self.not_empty.notify_one();
    }

    pub fn dequeue(&self) -> T {
        let mut guard = self.inner.lock().unwrap();
        while guard.items.is_empty() {
            guard = self.not_empty.wait(guard).unwrap();
        }
        let item = guard.items.pop_front().unwrap();
        self.not_full.notify_one();
        item
    }

    pub fn try_dequeue(&self) -> Option<T> {
        let mut guard = self.inner.lock().unwrap();
        let item = guard.items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_order() {
        let q: SlotQueue<i32> = SlotQueue::new();
        q.enqueue(1);
        q.enqueue(2);
        assert_eq!(q.dequeue(), 1);
        assert_eq!(q.dequeue(), 2);
    }

    #[test]
    fn blocks_producer_when_full_then_unblocks() {
        let q = Arc::new(SlotQueue::<i32>::with_capacity(2));
        q.enqueue(1);
        q.enqueue(2);
        let q2 = q.clone();
        let handle = thread::spawn(move || {
            q2.enqueue(3); // blocks until a slot frees
        });
        thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(q.dequeue(), 1);
        handle.join().unwrap();
        assert_eq!(q.dequeue(), 2);
        assert_eq!(q.dequeue(), 3);
    }

    #[test]
    fn try_dequeue_empty_is_none() {
        let q: SlotQueue<i32> = SlotQueue::new();
        assert!(q.try_dequeue().is_none());
    }
}
