//! # Buffer Manager
//!
//! Holds readings between flush cycles in two FIFO queues:
//!
//! - **incoming**: fresh readings from the producer
//! - **retry**: readings whose delivery failed, capped at `retry_capacity`
//!
//! The producer and the delivery worker share one mutex; every critical
//! section is O(1) or a single move of the queues.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::reading::Reading;

#[derive(Debug, Default)]
struct Queues {
    incoming: VecDeque<Reading>,
    retry: VecDeque<Reading>,
}

/// Two-queue reading buffer with oldest-first eviction of the retry queue.
#[derive(Debug)]
pub struct BufferManager {
    queues: Mutex<Queues>,
    retry_capacity: usize,
    evicted: AtomicU64,
}

impl BufferManager {
    /// Create an empty buffer whose retry queue holds at most `retry_capacity` readings
    pub fn new(retry_capacity: usize) -> Self {
        Self {
            queues: Mutex::new(Queues::default()),
            retry_capacity,
            evicted: AtomicU64::new(0),
        }
    }

    /// Append a fresh reading. Never blocks for longer than the push itself.
    pub fn add(&self, reading: Reading) {
        let mut queues = self.queues.lock();
        queues.incoming.push_back(reading);
        debug!(incoming = queues.incoming.len(), "Reading buffered");
    }

    /// Take everything, retry contents first.
    ///
    /// The retry queue is trimmed to capacity before it is drained, so a
    /// single drain never hands out more than `retry_capacity` old readings.
    ///
    /// # Returns
    ///
    /// * `Vec<Reading>` - retry readings (oldest first) followed by incoming readings
    pub fn drain_all(&self) -> Vec<Reading> {
        let mut queues = self.queues.lock();
        let dropped = trim_oldest(&mut queues.retry, self.retry_capacity);
        self.record_eviction(dropped);

        let mut drained: Vec<Reading> = queues.retry.drain(..).collect();
        drained.extend(queues.incoming.drain(..));
        drained
    }

    /// Put undelivered readings back at the tail of the retry queue.
    pub fn requeue_failed(&self, readings: Vec<Reading>) {
        if readings.is_empty() {
            return;
        }

        let mut queues = self.queues.lock();
        queues.retry.extend(readings);
        let dropped = trim_oldest(&mut queues.retry, self.retry_capacity);
        self.record_eviction(dropped);
    }

    /// Total buffered readings across both queues
    pub fn size(&self) -> usize {
        let queues = self.queues.lock();
        queues.incoming.len() + queues.retry.len()
    }

    /// Readings currently waiting for another delivery attempt
    pub fn retry_len(&self) -> usize {
        self.queues.lock().retry.len()
    }

    /// Readings dropped by the retry cap since creation
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Drop everything in both queues
    pub fn clear(&self) {
        let mut queues = self.queues.lock();
        let total = queues.incoming.len() + queues.retry.len();
        queues.incoming.clear();
        queues.retry.clear();
        debug!(discarded = total, "Buffers cleared");
    }

    fn record_eviction(&self, dropped: usize) {
        if dropped > 0 {
            self.evicted.fetch_add(dropped as u64, Ordering::Relaxed);
            warn!(
                dropped,
                capacity = self.retry_capacity,
                "Retry buffer over capacity, discarded oldest readings"
            );
        }
    }
}

fn trim_oldest(queue: &mut VecDeque<Reading>, capacity: usize) -> usize {
    let excess = queue.len().saturating_sub(capacity);
    queue.drain(..excess);
    excess
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    /// Reading whose latitude doubles as a sequence number
    fn reading(seq: u32) -> Reading {
        Reading::new(seq as f64, 0.0, 1.0, Utc.timestamp_opt(1_700_000_000 + seq as i64, 0).unwrap())
    }

    fn seqs(readings: &[Reading]) -> Vec<u32> {
        readings.iter().map(|r| r.latitude as u32).collect()
    }

    #[test]
    fn test_add_and_size() {
        let buffer = BufferManager::new(10);
        assert_eq!(buffer.size(), 0);

        buffer.add(reading(1));
        buffer.add(reading(2));
        assert_eq!(buffer.size(), 2);
        assert_eq!(buffer.retry_len(), 0);
    }

    #[test]
    fn test_drain_empties_both_queues() {
        let buffer = BufferManager::new(10);
        buffer.add(reading(1));
        buffer.requeue_failed(vec![reading(0)]);

        let drained = buffer.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(buffer.size(), 0);
        assert!(buffer.drain_all().is_empty());
    }

    #[test]
    fn test_retry_contents_come_first() {
        let buffer = BufferManager::new(10);
        buffer.add(reading(10));
        buffer.add(reading(11));
        buffer.requeue_failed(vec![reading(1), reading(2)]);
        buffer.add(reading(12));

        assert_eq!(seqs(&buffer.drain_all()), vec![1, 2, 10, 11, 12]);
    }

    #[test]
    fn test_requeue_evicts_oldest() {
        let buffer = BufferManager::new(3);
        buffer.requeue_failed((0..5).map(reading).collect());

        assert_eq!(buffer.retry_len(), 3);
        assert_eq!(buffer.evicted(), 2);
        assert_eq!(seqs(&buffer.drain_all()), vec![2, 3, 4]);
    }

    #[test]
    fn test_requeue_appends_after_existing_retry() {
        let buffer = BufferManager::new(4);
        buffer.requeue_failed(vec![reading(1), reading(2), reading(3)]);
        buffer.requeue_failed(vec![reading(4), reading(5)]);

        assert_eq!(buffer.evicted(), 1);
        assert_eq!(seqs(&buffer.drain_all()), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_incoming_is_not_capped() {
        let buffer = BufferManager::new(2);
        for i in 0..50 {
            buffer.add(reading(i));
        }
        assert_eq!(buffer.size(), 50);
        assert_eq!(buffer.evicted(), 0);
    }

    #[test]
    fn test_requeue_empty_is_noop() {
        let buffer = BufferManager::new(2);
        buffer.requeue_failed(Vec::new());
        assert_eq!(buffer.size(), 0);
        assert_eq!(buffer.evicted(), 0);
    }

    #[test]
    fn test_clear() {
        let buffer = BufferManager::new(5);
        buffer.add(reading(1));
        buffer.requeue_failed(vec![reading(2)]);

        buffer.clear();
        assert_eq!(buffer.size(), 0);
        assert!(buffer.drain_all().is_empty());
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        use std::sync::Arc;
        use std::thread;

        let buffer = Arc::new(BufferManager::new(10));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..250 {
                        buffer.add(reading(t * 1000 + i));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let drained = buffer.drain_all();
        assert_eq!(drained.len(), 1000);

        // Per-producer order is preserved
        for t in 0..4u32 {
            let own: Vec<u32> = seqs(&drained).into_iter().filter(|s| s / 1000 == t).collect();
            let mut sorted = own.clone();
            sorted.sort_unstable();
            assert_eq!(own, sorted);
        }
    }
}
