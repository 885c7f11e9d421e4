//! Fixed-capacity MPMC queue used for the frame and result hand-offs

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Error returned by the put family of operations.
///
/// The rejected item is handed back to the caller so it can be retried,
/// dropped with accounting, or rerouted.
pub enum PutError<T> {
    /// The queue stayed at capacity for the whole timeout.
    Full(T),
    /// The queue has been closed; no further items are accepted.
    Closed(T),
}

impl<T> PutError<T> {
    /// Recovers the item that was not enqueued.
    pub fn into_inner(self) -> T {
        match self {
            PutError::Full(item) | PutError::Closed(item) => item,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, PutError::Full(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, PutError::Closed(_))
    }
}

// Manual impls: the carried item is opaque and need not be Debug.
impl<T> fmt::Debug for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PutError::Full(_) => f.write_str("Full(..)"),
            PutError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> fmt::Display for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PutError::Full(_) => f.write_str("queue full"),
            PutError::Closed(_) => f.write_str("queue closed"),
        }
    }
}

impl<T> std::error::Error for PutError<T> {}

/// Error returned by the get family of operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GetError {
    /// The queue stayed empty for the whole timeout.
    #[error("queue empty")]
    Empty,
    /// The queue is closed and fully drained.
    #[error("queue closed")]
    Closed,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A fixed-capacity, multi-producer/multi-consumer FIFO.
///
/// Blocking operations take an explicit timeout and never wait past it.
/// Closing is idempotent: pending `get` calls drain whatever is buffered and
/// then observe [`GetError::Closed`]; every subsequent `put` is rejected with
/// [`PutError::Closed`]. Ordering is strictly FIFO per producer; with several
/// producers the global order must be recovered from sequence numbers.
pub struct BoundedQueue<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items.
    ///
    /// A capacity of zero is clamped to one; a zero-slot hand-off cannot make
    /// progress with timeout-based puts.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of buffered items. Advisory: another thread may have
    /// changed it by the time the caller acts on the value.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Blocks until space is available or `timeout` elapses.
    pub fn put(&self, item: T, timeout: Duration) -> Result<(), PutError<T>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(PutError::Closed(item));
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back(item);
                drop(inner);
                self.not_empty.notify_one();
                return Ok(());
            }
            if self.not_full.wait_until(&mut inner, deadline).timed_out() {
                // The wakeup may have raced the deadline; settle under the lock.
                if inner.closed {
                    return Err(PutError::Closed(item));
                }
                if inner.items.len() < self.capacity {
                    inner.items.push_back(item);
                    drop(inner);
                    self.not_empty.notify_one();
                    return Ok(());
                }
                return Err(PutError::Full(item));
            }
        }
    }

    /// Non-blocking put.
    pub fn try_put(&self, item: T) -> Result<(), PutError<T>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(PutError::Closed(item));
        }
        if inner.items.len() >= self.capacity {
            return Err(PutError::Full(item));
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Non-blocking put that evicts the oldest buffered item when full.
    ///
    /// Returns the evicted item, if any. This is the freshest-wins discipline
    /// the CAMERA-mode publish path runs on.
    pub fn force_put(&self, item: T) -> Result<Option<T>, PutError<T>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(PutError::Closed(item));
        }
        let evicted = if inner.items.len() >= self.capacity {
            inner.items.pop_front()
        } else {
            None
        };
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(evicted)
    }

    /// Blocks until an item is available or `timeout` elapses.
    pub fn get(&self, timeout: Duration) -> Result<T, GetError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Ok(item);
            }
            if inner.closed {
                return Err(GetError::Closed);
            }
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                if let Some(item) = inner.items.pop_front() {
                    drop(inner);
                    self.not_full.notify_one();
                    return Ok(item);
                }
                return if inner.closed {
                    Err(GetError::Closed)
                } else {
                    Err(GetError::Empty)
                };
            }
        }
    }

    /// Non-blocking get.
    pub fn try_get(&self) -> Result<T, GetError> {
        let mut inner = self.inner.lock();
        match inner.items.pop_front() {
            Some(item) => {
                drop(inner);
                self.not_full.notify_one();
                Ok(item)
            }
            None if inner.closed => Err(GetError::Closed),
            None => Err(GetError::Empty),
        }
    }

    /// Closes the queue and wakes every waiter. Idempotent.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            inner.closed = true;
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn test_fifo_order() {
        let q = BoundedQueue::new(4);
        for i in 0..4 {
            q.put(i, SHORT).unwrap();
        }
        for i in 0..4 {
            assert_eq!(q.get(SHORT).unwrap(), i);
        }
    }

    #[test]
    fn test_put_times_out_when_full() {
        let q = BoundedQueue::new(1);
        q.put(1u32, SHORT).unwrap();
        let err = q.put(2, SHORT).unwrap_err();
        assert!(err.is_full());
        assert_eq!(err.into_inner(), 2);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_get_times_out_when_empty() {
        let q: BoundedQueue<u32> = BoundedQueue::new(1);
        assert_eq!(q.get(SHORT), Err(GetError::Empty));
    }

    #[test]
    fn test_try_put_try_get() {
        let q = BoundedQueue::new(1);
        q.try_put(7u32).unwrap();
        assert!(q.try_put(8).unwrap_err().is_full());
        assert_eq!(q.try_get(), Ok(7));
        assert_eq!(q.try_get(), Err(GetError::Empty));
    }

    #[test]
    fn test_force_put_evicts_oldest() {
        let q = BoundedQueue::new(2);
        q.try_put(1u32).unwrap();
        q.try_put(2).unwrap();
        let evicted = q.force_put(3).unwrap();
        assert_eq!(evicted, Some(1));
        assert_eq!(q.get(SHORT).unwrap(), 2);
        assert_eq!(q.get(SHORT).unwrap(), 3);
    }

    #[test]
    fn test_close_drains_then_reports_closed() {
        let q = BoundedQueue::new(4);
        q.try_put(1u32).unwrap();
        q.try_put(2).unwrap();
        q.close();
        q.close(); // idempotent

        assert!(q.try_put(3).unwrap_err().is_closed());
        assert_eq!(q.get(SHORT).unwrap(), 1);
        assert_eq!(q.get(SHORT).unwrap(), 2);
        assert_eq!(q.get(SHORT), Err(GetError::Closed));
    }

    #[test]
    fn test_close_wakes_blocked_getter() {
        let q: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new(1));
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.get(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(50));
        q.close();
        assert_eq!(handle.join().unwrap(), Err(GetError::Closed));
    }

    #[test]
    fn test_blocked_put_proceeds_after_get() {
        let q = Arc::new(BoundedQueue::new(1));
        q.put(1u32, SHORT).unwrap();

        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.put(2, Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(q.get(SHORT).unwrap(), 1);
        handle.join().unwrap().unwrap();
        assert_eq!(q.get(SHORT).unwrap(), 2);
    }

    #[test]
    fn test_multi_producer_multi_consumer_conserves_items() {
        let q = Arc::new(BoundedQueue::new(8));
        let mut producers = Vec::new();
        for p in 0..4u32 {
            let q = Arc::clone(&q);
            producers.push(thread::spawn(move || {
                for i in 0..100u32 {
                    q.put(p * 1000 + i, Duration::from_secs(5)).unwrap();
                }
            }));
        }

        let mut consumers = Vec::new();
        for _ in 0..2 {
            let q = Arc::clone(&q);
            consumers.push(thread::spawn(move || {
                let mut got = Vec::new();
                loop {
                    match q.get(Duration::from_secs(1)) {
                        Ok(item) => got.push(item),
                        Err(GetError::Closed) => break,
                        Err(GetError::Empty) => continue,
                    }
                }
                got
            }));
        }

        for handle in producers {
            handle.join().unwrap();
        }
        q.close();

        let mut all: Vec<u32> = consumers
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all.len(), 400);
        all.dedup();
        assert_eq!(all.len(), 400, "every item delivered exactly once");
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let q = Arc::new(BoundedQueue::new(3));
        let q2 = Arc::clone(&q);
        let producer = thread::spawn(move || {
            for i in 0..50u32 {
                q2.put(i, Duration::from_secs(5)).unwrap();
            }
        });

        let mut seen = 0;
        while seen < 50 {
            assert!(q.len() <= 3);
            if q.get(Duration::from_millis(100)).is_ok() {
                seen += 1;
            }
        }
        producer.join().unwrap();
    }
}
