//! Thread-safe FIFO hand-off between the network I/O tasks and the
//! game-logic consumer thread
//!
//! The queue is the single concurrency boundary of the session core:
//! any number of producers enqueue without blocking, exactly one
//! consumer drains with a blocking, timed or non-blocking dequeue.
//! Shutdown is idempotent, irreversible and wakes every blocked waiter.

use crate::utils::lock_unpoisoned;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Error returned by [`PacketQueue::try_dequeue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryDequeueError {
    /// The queue holds no items right now.
    Empty,
    /// The queue was shut down and fully drained.
    Closed,
}

impl fmt::Display for TryDequeueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryDequeueError::Empty => write!(f, "queue is empty"),
            TryDequeueError::Closed => write!(f, "queue is closed"),
        }
    }
}

/// Error returned by [`PacketQueue::dequeue_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DequeueTimeoutError {
    /// No item arrived within the given window.
    TimedOut,
    /// The queue was shut down and fully drained.
    Closed,
}

impl fmt::Display for DequeueTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DequeueTimeoutError::TimedOut => write!(f, "timed out waiting for an item"),
            DequeueTimeoutError::Closed => write!(f, "queue is closed"),
        }
    }
}

struct QueueInner<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// Unbounded multi-producer single-consumer queue with strict FIFO
/// ordering across all producers combined.
pub struct PacketQueue<T> {
    inner: Mutex<QueueInner<T>>,
    available: Condvar,
}

impl<T> PacketQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Appends an item to the tail of the queue. Never blocks.
    ///
    /// After shutdown the item is silently dropped; producers racing a
    /// shutdown do not need to coordinate with it.
    pub fn enqueue(&self, item: T) {
        let mut inner = lock_unpoisoned(&self.inner);
        if inner.shutdown {
            return;
        }
        inner.items.push_back(item);
        self.available.notify_one();
    }

    /// Removes and returns the head item, blocking until one is
    /// available. Returns None once the queue is shut down and empty.
    pub fn dequeue(&self) -> Option<T> {
        let mut inner = lock_unpoisoned(&self.inner);
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.shutdown {
                return None;
            }
            inner = self
                .available
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Non-blocking dequeue.
    pub fn try_dequeue(&self) -> Result<T, TryDequeueError> {
        let mut inner = lock_unpoisoned(&self.inner);
        if let Some(item) = inner.items.pop_front() {
            return Ok(item);
        }
        if inner.shutdown {
            Err(TryDequeueError::Closed)
        } else {
            Err(TryDequeueError::Empty)
        }
    }

    /// Dequeue that waits at most `timeout` for an item. The consumer
    /// loop uses this to interleave packet processing with its periodic
    /// maintenance tick.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Result<T, DequeueTimeoutError> {
        let deadline = Instant::now() + timeout;
        let mut inner = lock_unpoisoned(&self.inner);
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Ok(item);
            }
            if inner.shutdown {
                return Err(DequeueTimeoutError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DequeueTimeoutError::TimedOut);
            }
            // Re-check the deadline on every wakeup so a spurious wake
            // cannot extend the wait
            let (guard, _) = self
                .available
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            inner = guard;
        }
    }

    /// Marks the queue closed and wakes all blocked consumers.
    /// Idempotent and irreversible; items already queued can still be
    /// drained afterwards.
    pub fn shutdown(&self) {
        let mut inner = lock_unpoisoned(&self.inner);
        if inner.shutdown {
            return;
        }
        inner.shutdown = true;
        self.available.notify_all();
    }

    /// Discards all pending items without waking anyone.
    pub fn clear(&self) {
        let mut inner = lock_unpoisoned(&self.inner);
        inner.items.clear();
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.inner).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shutdown(&self) -> bool {
        lock_unpoisoned(&self.inner).shutdown
    }
}

impl<T> Default for PacketQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_single_producer() {
        let queue = PacketQueue::new();
        for i in 0..100 {
            queue.enqueue(i);
        }
        for i in 0..100 {
            assert_eq!(queue.try_dequeue(), Ok(i));
        }
        assert_eq!(queue.try_dequeue(), Err(TryDequeueError::Empty));
    }

    #[test]
    fn test_fifo_across_producers() {
        let queue = Arc::new(PacketQueue::new());
        let producers = 4;
        let per_producer = 250;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..per_producer {
                        queue.enqueue((p, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Total order is whatever interleaving happened, but each
        // producer's items must still come out in its enqueue order
        let mut last_seen = vec![-1i64; producers];
        let mut total = 0;
        while let Ok((p, i)) = queue.try_dequeue() {
            assert!(i as i64 > last_seen[p], "producer {} reordered", p);
            last_seen[p] = i as i64;
            total += 1;
        }
        assert_eq!(total, producers * per_producer);
    }

    #[test]
    fn test_blocking_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(PacketQueue::new());

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue())
        };

        thread::sleep(Duration::from_millis(20));
        queue.enqueue(42u32);

        assert_eq!(consumer.join().unwrap(), Some(42));
    }

    #[test]
    fn test_shutdown_unblocks_waiters() {
        let queue: Arc<PacketQueue<u32>> = Arc::new(PacketQueue::new());

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.dequeue())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        queue.shutdown();

        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), None);
        }
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let queue: PacketQueue<u32> = PacketQueue::new();
        queue.shutdown();
        queue.shutdown();
        assert!(queue.is_shutdown());
        assert_eq!(queue.try_dequeue(), Err(TryDequeueError::Closed));
    }

    #[test]
    fn test_shutdown_drains_pending_items_first() {
        let queue = PacketQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.shutdown();

        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_enqueue_after_shutdown_is_dropped() {
        let queue = PacketQueue::new();
        queue.shutdown();
        queue.enqueue(7);
        assert!(queue.is_empty());
        assert_eq!(queue.try_dequeue(), Err(TryDequeueError::Closed));
    }

    #[test]
    fn test_try_dequeue_empty() {
        let queue: PacketQueue<u32> = PacketQueue::new();
        assert_eq!(queue.try_dequeue(), Err(TryDequeueError::Empty));
    }

    #[test]
    fn test_dequeue_timeout_expires() {
        let queue: PacketQueue<u32> = PacketQueue::new();
        let start = Instant::now();
        let result = queue.dequeue_timeout(Duration::from_millis(30));
        assert_eq!(result, Err(DequeueTimeoutError::TimedOut));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_dequeue_timeout_returns_item() {
        let queue = Arc::new(PacketQueue::new());

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                queue.enqueue(9);
            })
        };

        assert_eq!(queue.dequeue_timeout(Duration::from_secs(2)), Ok(9));
        producer.join().unwrap();
    }

    #[test]
    fn test_dequeue_timeout_closed() {
        let queue: PacketQueue<u32> = PacketQueue::new();
        queue.shutdown();
        assert_eq!(
            queue.dequeue_timeout(Duration::from_millis(10)),
            Err(DequeueTimeoutError::Closed)
        );
    }

    #[test]
    fn test_clear_discards_pending() {
        let queue = PacketQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        assert_eq!(queue.len(), 2);

        queue.clear();
        assert!(queue.is_empty());
        assert!(!queue.is_shutdown());
        assert_eq!(queue.try_dequeue(), Err(TryDequeueError::Empty));

        // Still usable after a clear
        queue.enqueue(3);
        assert_eq!(queue.dequeue(), Some(3));
    }
}
