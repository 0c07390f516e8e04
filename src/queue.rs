//! # Bounded Handoff Queue
//!
//! The `BoundedBuffer` struct is a fixed-capacity, blocking, thread-safe FIFO
//! used to hand ownership of work items between producer and consumer
//! threads. Two instances form one broker channel: an outbound queue of raw
//! items and an inbound queue of processed ones.
//!
//! Timed operations report expiry as a value, not an error type from
//! [`crate::error`]: a pop that finds nothing within its budget is the normal
//! idle state of every polling loop in this crate and must stay cheap to
//! produce and impossible to mistake for a fault. A timed push hands the
//! rejected item back inside the error so ownership never silently leaves the
//! caller.
//!
//! ## Example
//!
//! ```rust
//! use evobroker::queue::BoundedBuffer;
//! use std::time::Duration;
//!
//! let buffer: BoundedBuffer<u32> = BoundedBuffer::new(2);
//! buffer.push_front(1);
//! buffer.push_front(2);
//!
//! // Full: a timed push returns the item to the caller.
//! let rejected = buffer
//!     .push_front_timeout(3, Duration::from_millis(10))
//!     .unwrap_err();
//! assert_eq!(rejected.into_inner(), 3);
//!
//! assert_eq!(buffer.pop_back(), 1);
//! assert_eq!(buffer.pop_back(), 2);
//! ```

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Error returned by [`BoundedBuffer::push_front_timeout`] when no slot became
/// free within the budget. Carries the rejected item so the caller keeps
/// ownership.
#[derive(Debug)]
pub struct PushTimeoutError<T>(T);

impl<T> PushTimeoutError<T> {
    /// Recovers the item that could not be inserted.
    pub fn into_inner(self) -> T {
        self.0
    }
}

/// Error returned by [`BoundedBuffer::pop_back_timeout`] when the buffer
/// stayed empty for the whole budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopTimeoutError;

/// A fixed-capacity, thread-safe FIFO with blocking and timed variants.
///
/// Invariants: the length never exceeds the capacity fixed at construction;
/// FIFO order is preserved within one instance; every operation is safe under
/// any number of concurrent producers and consumers. There is no ordering
/// guarantee across different buffer instances.
#[derive(Debug)]
pub struct BoundedBuffer<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> BoundedBuffer<T> {
    /// Creates a buffer with the given fixed capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero — a zero-capacity handoff queue can never
    /// transfer anything and is a programming error, not a runtime condition.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedBuffer capacity must be non-zero");
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// The fixed capacity of this buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Inserts an item, blocking indefinitely until a slot is free.
    pub fn push_front(&self, item: T) {
        let mut items = self.items.lock().unwrap();
        while items.len() == self.capacity {
            items = self.not_full.wait(items).unwrap();
        }
        items.push_front(item);
        drop(items);
        self.not_empty.notify_one();
    }

    /// Inserts an item, giving up after `timeout`.
    ///
    /// On expiry the item is handed back inside the error; it is never
    /// dropped or duplicated.
    pub fn push_front_timeout(
        &self,
        item: T,
        timeout: Duration,
    ) -> Result<(), PushTimeoutError<T>> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock().unwrap();
        while items.len() == self.capacity {
            let now = Instant::now();
            if now >= deadline {
                return Err(PushTimeoutError(item));
            }
            let (guard, result) = self.not_full.wait_timeout(items, deadline - now).unwrap();
            items = guard;
            if result.timed_out() && items.len() == self.capacity {
                return Err(PushTimeoutError(item));
            }
        }
        items.push_front(item);
        drop(items);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Removes the oldest item, blocking indefinitely until one is present.
    pub fn pop_back(&self) -> T {
        let mut items = self.items.lock().unwrap();
        loop {
            if let Some(item) = items.pop_back() {
                drop(items);
                self.not_full.notify_one();
                return item;
            }
            items = self.not_empty.wait(items).unwrap();
        }
    }

    /// Removes the oldest item, giving up after `timeout`.
    pub fn pop_back_timeout(&self, timeout: Duration) -> Result<T, PopTimeoutError> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock().unwrap();
        loop {
            if let Some(item) = items.pop_back() {
                drop(items);
                self.not_full.notify_one();
                return Ok(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(PopTimeoutError);
            }
            let (guard, result) = self.not_empty.wait_timeout(items, deadline - now).unwrap();
            items = guard;
            if result.timed_out() && items.is_empty() {
                return Err(PopTimeoutError);
            }
        }
    }

    /// Snapshot of the current length. Consistent only at the instant of the
    /// internal lock.
    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    /// Snapshot emptiness query.
    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }

    /// Snapshot fullness query.
    pub fn is_full(&self) -> bool {
        self.items.lock().unwrap().len() == self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let buffer = BoundedBuffer::new(8);
        for i in 0..8 {
            buffer.push_front(i);
        }
        for i in 0..8 {
            assert_eq!(buffer.pop_back(), i);
        }
    }

    #[test]
    fn test_push_timeout_returns_item() {
        let buffer = BoundedBuffer::new(1);
        buffer.push_front(10);
        let err = buffer
            .push_front_timeout(20, Duration::from_millis(20))
            .unwrap_err();
        assert_eq!(err.into_inner(), 20);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_pop_timeout_on_empty() {
        let buffer: BoundedBuffer<u8> = BoundedBuffer::new(4);
        assert_eq!(
            buffer.pop_back_timeout(Duration::from_millis(20)),
            Err(PopTimeoutError)
        );
    }

    #[test]
    fn test_blocked_push_wakes_on_pop() {
        let buffer = Arc::new(BoundedBuffer::new(1));
        buffer.push_front(1);

        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.push_front(2))
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(buffer.pop_back(), 1);
        producer.join().unwrap();
        assert_eq!(buffer.pop_back(), 2);
    }

    #[test]
    #[should_panic(expected = "capacity must be non-zero")]
    fn test_zero_capacity_panics() {
        let _ = BoundedBuffer::<u8>::new(0);
    }
}
