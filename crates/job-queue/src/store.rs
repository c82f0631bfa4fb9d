//! C1: the priority job store — an ordered multiset of pending tasks,
//! strictly by priority ascending with insertion-order (FIFO) tiebreak.
//!
//! Never blocks; concurrent access is serialized by the queue manager's
//! single lock (spec.md §4.1, §5).

use crate::task::QueuedTask;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct Entry<T> {
    priority: i32,
    seq: u64,
    task: QueuedTask<T>,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    /// `BinaryHeap` is a max-heap; we want the entry with the *lowest*
    /// priority value, and among ties the *earliest* sequence number,
    /// to compare greatest so it pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Ordered multiset of queued tasks. Owned by [`crate::QueueManager`];
/// not `Sync` on its own — callers serialize access externally.
pub(crate) struct PriorityJobStore<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

impl<T> PriorityJobStore<T> {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub(crate) fn push(&mut self, task: QueuedTask<T>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            priority: task.priority,
            seq,
            task,
        });
    }

    pub(crate) fn pop_highest(&mut self) -> Option<QueuedTask<T>> {
        self.heap.pop().map(|entry| entry.task)
    }

    pub(crate) fn size(&self) -> usize {
        self.heap.len()
    }

    /// Drains every queued task, returning them for the caller to
    /// cancel. Used by graceful shutdown (spec.md §4.9 step 5).
    pub(crate) fn drop_all(&mut self) -> Vec<QueuedTask<T>> {
        self.heap.drain().map(|entry| entry.task).collect()
    }
}
