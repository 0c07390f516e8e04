use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use evobroker::queue::BoundedBuffer;

#[test]
fn test_fifo_property() {
    let buffer = BoundedBuffer::new(64);
    for i in 0..64u32 {
        buffer.push_front(i);
    }
    let popped: Vec<u32> = (0..64).map(|_| buffer.pop_back()).collect();
    let expected: Vec<u32> = (0..64).collect();
    assert_eq!(popped, expected);
}

#[test]
fn test_capacity_invariant() {
    for capacity in [1usize, 2, 7, 32] {
        let buffer = BoundedBuffer::new(capacity);
        for i in 0..capacity {
            buffer
                .push_front_timeout(i, Duration::from_millis(50))
                .expect("push within capacity must succeed");
        }
        assert!(buffer.is_full());
        assert_eq!(buffer.len(), capacity);

        // The (C+1)-th push must time out, not succeed.
        let overflow = buffer.push_front_timeout(capacity, Duration::from_millis(20));
        let rejected = overflow.expect_err("push beyond capacity must time out");
        assert_eq!(rejected.into_inner(), capacity);
        assert_eq!(buffer.len(), capacity);
    }
}

#[test]
fn test_no_duplication_or_loss_under_concurrency() {
    const PRODUCERS: usize = 4;
    const ITEMS_PER_PRODUCER: usize = 250;
    const CONSUMERS: usize = 3;
    const TOTAL: usize = PRODUCERS * ITEMS_PER_PRODUCER;

    let buffer: Arc<BoundedBuffer<usize>> = Arc::new(BoundedBuffer::new(8));
    let received = Arc::new(Mutex::new(HashSet::new()));
    let count = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();

    for p in 0..PRODUCERS {
        let buffer = Arc::clone(&buffer);
        handles.push(thread::spawn(move || {
            for k in 0..ITEMS_PER_PRODUCER {
                buffer.push_front(p * ITEMS_PER_PRODUCER + k);
            }
        }));
    }

    for _ in 0..CONSUMERS {
        let buffer = Arc::clone(&buffer);
        let received = Arc::clone(&received);
        let count = Arc::clone(&count);
        handles.push(thread::spawn(move || {
            while count.load(Ordering::Acquire) < TOTAL {
                if let Ok(item) = buffer.pop_back_timeout(Duration::from_millis(20)) {
                    let fresh = received.lock().unwrap().insert(item);
                    assert!(fresh, "item {} was received twice", item);
                    count.fetch_add(1, Ordering::AcqRel);
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(count.load(Ordering::Acquire), TOTAL);
    assert_eq!(received.lock().unwrap().len(), TOTAL);
    assert!(buffer.is_empty());
}

#[test]
fn test_pop_timeout_does_not_consume() {
    let buffer: BoundedBuffer<u8> = BoundedBuffer::new(4);
    assert!(buffer.pop_back_timeout(Duration::from_millis(10)).is_err());
    buffer.push_front(42);
    assert_eq!(buffer.pop_back_timeout(Duration::from_millis(10)), Ok(42));
}

#[test]
fn test_size_queries_track_content() {
    let buffer = BoundedBuffer::new(3);
    assert!(buffer.is_empty());
    assert!(!buffer.is_full());
    assert_eq!(buffer.capacity(), 3);

    buffer.push_front("a");
    buffer.push_front("b");
    assert_eq!(buffer.len(), 2);

    buffer.push_front("c");
    assert!(buffer.is_full());

    buffer.pop_back();
    assert_eq!(buffer.len(), 2);
}
