//! A lock-free, multi-producer/multi-consumer FIFO queue reclaimed with
//! Michael-style hazard pointers.
//!
//! The queue (`src/queue.rs`) is a Michael–Scott linked list with atomic
//! `first`/`last` pointers and a permanent dummy sentinel; pointers it
//! dereferences are protected, and nodes it retires are reclaimed, through
//! the hazard-pointer domain in `src/hazard.rs`. Neither module is useful
//! without the other, but only the queue's types are public: the hazard
//! domain is an implementation detail, the way an allocator is.
//!
//! ```
//! use hazard_fifo::Queue;
//!
//! let queue = Queue::new();
//! let handle = queue.attach().expect("attach should succeed");
//!
//! handle.push(1).unwrap();
//! handle.push(2).unwrap();
//! assert_eq!(handle.pop(), Some(1));
//! assert_eq!(handle.pop(), Some(2));
//! assert_eq!(handle.pop(), None);
//! ```

mod error;
mod hazard;
mod queue;

pub use error::QueueError;
pub use queue::{Queue, QueueConfig, ThreadHandle};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn empty_queue_pops_none() {
        let queue: Queue<i32> = Queue::new();
        let handle = queue.attach().unwrap();
        assert_eq!(handle.pop(), None);
        assert_eq!(handle.pop(), None);
    }

    #[test]
    fn single_threaded_round_trip() {
        let queue = Queue::new();
        let handle = queue.attach().unwrap();

        handle.push(1).unwrap();
        handle.push(2).unwrap();
        handle.push(3).unwrap();

        assert_eq!(handle.pop(), Some(1));
        assert_eq!(handle.pop(), Some(2));
        assert_eq!(handle.pop(), Some(3));
        assert_eq!(handle.pop(), None);
    }

    #[test]
    fn fifo_order_is_preserved_per_producer() {
        let queue = Queue::new();
        let handle = queue.attach().unwrap();
        for i in 0..1000 {
            handle.push(i).unwrap();
        }
        for i in 0..1000 {
            assert_eq!(handle.pop(), Some(i));
        }
        assert_eq!(handle.pop(), None);
    }

    #[test]
    fn dropping_a_partially_drained_queue_drops_remaining_values() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountsDrops(usize);
        static DROPPED: AtomicUsize = AtomicUsize::new(0);
        impl Drop for CountsDrops {
            fn drop(&mut self) {
                DROPPED.fetch_add(1, Ordering::SeqCst);
            }
        }

        {
            let queue = Queue::new();
            let handle = queue.attach().unwrap();
            for i in 0..5 {
                handle.push(CountsDrops(i)).unwrap();
            }
            assert_eq!(handle.pop().map(|v| v.0), Some(0));
            // four values remain un-popped when `queue` (and `handle`) drop.
        }

        assert_eq!(DROPPED.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn reattaching_reuses_the_released_record() {
        let queue = Queue::new();
        {
            let handle = queue.attach().unwrap();
            handle.push(1).unwrap();
            assert_eq!(handle.pop(), Some(1));
        }
        // The first handle's record is now inactive and should be handed
        // back out rather than growing the hazard domain's record list.
        let handle = queue.attach().unwrap();
        handle.push(2).unwrap();
        assert_eq!(handle.pop(), Some(2));
    }

    #[test]
    fn concurrent_producers_and_consumers_preserve_multiset() {
        let queue = Arc::new(Queue::new());
        let producers = 4;
        let per_producer = 2000;

        let push_handles: Vec<_> = (0..producers)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let handle = queue.attach().unwrap();
                    for i in 0..per_producer {
                        handle.push(p * per_producer + i).unwrap();
                    }
                })
            })
            .collect();
        for h in push_handles {
            h.join().unwrap();
        }

        let consumer = queue.attach().unwrap();
        let mut seen = HashSet::new();
        let expected: HashSet<i32> = (0..producers * per_producer).collect();
        while seen.len() < expected.len() {
            if let Some(v) = consumer.pop() {
                assert!(seen.insert(v), "value {v} observed twice");
            }
        }
        assert_eq!(seen, expected);
        assert_eq!(consumer.pop(), None);
    }
}
