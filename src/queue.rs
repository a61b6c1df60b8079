//! Bounded producer/consumer row queue with drop-oldest backpressure.
//!
//! The acquisition thread pushes, consumers drain. Neither end ever waits for the
//! other: when the queue is full the oldest queued row is evicted to admit the new
//! one, and draining an empty queue returns an empty batch immediately.
//!
//! Built on `crossbeam_queue::ArrayQueue`, whose `force_push` evicts and inserts as a
//! single lock-free step, so a push into a full queue can never be lost to a
//! concurrent drain.

use crate::parser::Row;
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default capacity of the row queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Fixed-capacity FIFO of parsed rows.
#[derive(Debug)]
pub struct BoundedRowQueue {
    inner: ArrayQueue<Row>,
    pushed: AtomicU64,
    dropped: AtomicU64,
}

impl BoundedRowQueue {
    /// Create a queue holding at most `capacity` rows.
    ///
    /// A zero capacity is bumped to one; configuration validation rejects it earlier.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: ArrayQueue::new(capacity.max(1)),
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Rows held before a push evicts the oldest.
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Enqueue without blocking. Returns `true` if the oldest row was evicted to make room.
    pub fn push(&self, row: Row) -> bool {
        self.pushed.fetch_add(1, Ordering::Relaxed);
        match self.inner.force_push(row) {
            Some(_evicted) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Take every row queued at the time of the call, oldest first.
    ///
    /// Rows pushed while draining are left for the next call, so this always terminates
    /// even under a producer that never pauses.
    pub fn drain_all(&self) -> Vec<Row> {
        self.drain_up_to(self.inner.len())
    }

    /// Take at most `n` of the oldest rows.
    pub fn drain_up_to(&self, n: usize) -> Vec<Row> {
        let mut rows = Vec::with_capacity(n.min(self.inner.len()));
        while rows.len() < n {
            match self.inner.pop() {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        rows
    }

    /// Current depth. Racy; for diagnostics only.
    pub fn approximate_size(&self) -> usize {
        self.inner.len()
    }

    /// Rows accepted by `push` since creation, including ones later evicted.
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Rows evicted by overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for BoundedRowQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn row(v: i64) -> Row {
        Row::new(vec![v], 1).unwrap()
    }

    fn values(rows: Vec<Row>) -> Vec<i64> {
        rows.into_iter().map(|r| r[0]).collect()
    }

    #[test]
    fn drain_preserves_fifo_order() {
        let queue = BoundedRowQueue::new(8);
        for v in 1..=5 {
            assert!(!queue.push(row(v)));
        }
        assert_eq!(values(queue.drain_all()), vec![1, 2, 3, 4, 5]);
        assert!(queue.drain_all().is_empty());
    }

    #[test]
    fn capacity_two_keeps_two_newest() {
        let queue = BoundedRowQueue::new(2);
        queue.push(row(1));
        queue.push(row(2));
        assert!(queue.push(row(3)));
        assert_eq!(queue.approximate_size(), 2);
        assert_eq!(values(queue.drain_all()), vec![2, 3]);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pushed(), 3);
    }

    #[test]
    fn overflow_by_one_keeps_most_recent_capacity_rows() {
        let capacity = 100;
        let queue = BoundedRowQueue::new(capacity);
        for v in 0..=capacity as i64 {
            queue.push(row(v));
        }
        assert_eq!(queue.approximate_size(), capacity);
        assert_eq!(values(queue.drain_all()), (1..=capacity as i64).collect::<Vec<_>>());
    }

    #[test]
    fn drain_up_to_takes_oldest() {
        let queue = BoundedRowQueue::new(8);
        for v in 1..=5 {
            queue.push(row(v));
        }
        assert_eq!(values(queue.drain_up_to(2)), vec![1, 2]);
        assert_eq!(values(queue.drain_up_to(10)), vec![3, 4, 5]);
        assert!(queue.drain_up_to(2).is_empty());
    }

    #[test]
    fn concurrent_push_and_drain_never_exceeds_capacity() {
        let queue = Arc::new(BoundedRowQueue::new(64));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for v in 0..20_000 {
                    queue.push(row(v));
                    assert!(queue.approximate_size() <= 64);
                }
            })
        };

        let mut seen = Vec::new();
        while !producer.is_finished() {
            seen.extend(values(queue.drain_all()));
        }
        producer.join().unwrap();
        seen.extend(values(queue.drain_all()));

        // whatever survived eviction arrives strictly in order
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.len() as u64 + queue.dropped(), 20_000);
    }
}
