//! Key lock table and per-key queue store.
//!
//! Both live in one [`KeyTable`] guarded by a single mutex in the
//! dispatcher, so "append and maybe start a worker" and "observe empty and
//! tear down" are each one atomic step. A lock is only ever released in the
//! same step that removes its queue.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::model::{Key, WorkItem};

pub struct KeyTable<T> {
    queues: HashMap<Key, VecDeque<WorkItem<T>>>,
    locks: HashSet<Key>,
}

impl<T> Default for KeyTable<T> {
    fn default() -> Self {
        Self {
            queues: HashMap::new(),
            locks: HashSet::new(),
        }
    }
}

/// What a worker got when it asked for the next item.
pub enum Next<T> {
    Item(WorkItem<T>),
    /// The queue was empty; lock and queue are gone.
    Drained,
}

impl<T> KeyTable<T> {
    /// Append an item to its key's queue, creating the queue if absent.
    /// Returns the queue depth after the append.
    pub fn push_back(&mut self, item: WorkItem<T>) -> usize {
        let queue = self.queues.entry(item.key.clone()).or_default();
        queue.push_back(item);
        queue.len()
    }

    /// Take the drain lock for `key` if nobody holds it.
    ///
    /// Panics if the key has no queue: a worker for an empty store would
    /// release immediately and anything racing it could be lost.
    pub fn try_acquire(&mut self, key: &Key) -> bool {
        assert!(
            self.queues.contains_key(key),
            "lock requested for key {key} with no queue"
        );
        self.locks.insert(key.clone())
    }

    /// Pop the head of `key`'s queue, or release the lock and remove the
    /// queue if it is empty.
    ///
    /// Panics if the caller does not hold the lock or the queue vanished
    /// under a held lock. Either means the single-worker discipline broke.
    pub fn pop_or_release(&mut self, key: &Key) -> Next<T> {
        assert!(
            self.locks.contains(key),
            "worker for key {key} popped without holding its lock"
        );
        let Some(queue) = self.queues.get_mut(key) else {
            panic!("queue for key {key} vanished while its lock was held");
        };

        match queue.pop_front() {
            Some(item) => Next::Item(item),
            None => {
                self.queues.remove(key);
                self.locks.remove(key);
                Next::Drained
            }
        }
    }

    /// Put an item back at the head of its key's queue for another attempt.
    pub fn requeue_front(&mut self, item: WorkItem<T>) {
        assert!(
            self.locks.contains(&item.key),
            "requeue for key {} without holding its lock",
            item.key
        );
        self.queues
            .entry(item.key.clone())
            .or_default()
            .push_front(item);
    }

    /// Drop every pending item. Locked queues stay so their workers can
    /// observe them empty and tear down; unlocked ones are removed.
    pub fn discard_pending(&mut self) -> usize {
        let mut discarded = 0;
        let locks = &self.locks;
        self.queues.retain(|key, queue| {
            discarded += queue.len();
            queue.clear();
            locks.contains(key)
        });
        discarded
    }

    pub fn is_locked(&self, key: &Key) -> bool {
        self.locks.contains(key)
    }

    pub fn pending(&self, key: &Key) -> usize {
        self.queues.get(key).map_or(0, VecDeque::len)
    }

    pub fn active_keys(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty() && self.locks.is_empty()
    }
}
