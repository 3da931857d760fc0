//! Michael–Scott lock-free FIFO queue, reclaimed through the hazard-pointer
//! domain in [`crate::hazard`].

use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crossbeam_utils::Backoff;
use tracing::{trace, warn};

use crate::error::QueueError;
use crate::hazard::{
    HazardDomain, HazardDomainConfig, HazardRecord, HAZARD_SLOT_FIRST, HAZARD_SLOT_SECOND,
};

/// Construction-time tuning for a [`Queue`]. Mirrors
/// [`crate::hazard::HazardDomainConfig`] one-to-one; the queue always fixes
/// two hazard slots per thread, which the algorithm requires and is
/// therefore not configurable.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Upper bound on concurrently attached threads (`E`).
    pub expected_threads: usize,
    /// Retire-list length that triggers an immediate scan (`T`).
    pub scan_threshold: usize,
    /// Initial per-thread retire-list capacity.
    pub retire_list_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        let hazard_defaults = HazardDomainConfig::default();
        QueueConfig {
            expected_threads: hazard_defaults.expected_threads,
            scan_threshold: hazard_defaults.scan_threshold,
            retire_list_capacity: hazard_defaults.retire_list_capacity,
        }
    }
}

impl From<QueueConfig> for HazardDomainConfig {
    fn from(config: QueueConfig) -> Self {
        HazardDomainConfig {
            expected_threads: config.expected_threads,
            scan_threshold: config.scan_threshold,
            retire_list_capacity: config.retire_list_capacity,
        }
    }
}

struct Node<T> {
    /// Valid exactly from construction (by `push`) until the `pop` that
    /// promotes this node's predecessor hands the value to its caller.
    /// After that read, this slot is never touched again — the node only
    /// continues to exist as a sentinel, and a sentinel's own value is
    /// never read.
    value: MaybeUninit<T>,
    next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    fn sentinel() -> Self {
        Node {
            value: MaybeUninit::uninit(),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    fn holding(value: T) -> Self {
        Node {
            value: MaybeUninit::new(value),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

fn release_node<T>(ptr: *mut Node<T>) {
    // SAFETY: called only by the hazard domain once a scan has proven no
    // thread still holds `ptr` in a hazard slot, and only once per pointer
    // (it is removed from its retire list in the same step).
    unsafe {
        drop(Box::from_raw(ptr));
    }
}

/// A lock-free, multi-producer/multi-consumer FIFO queue.
///
/// Values are moved in and out by value; a successful [`ThreadHandle::pop`]
/// transfers ownership to the caller. Threads participate through a
/// [`ThreadHandle`] obtained from [`Queue::attach`].
pub struct Queue<T> {
    first: AtomicPtr<Node<T>>,
    last: AtomicPtr<Node<T>>,
    domain: HazardDomain<Node<T>>,
}

// SAFETY: all cross-thread mutation of the node list goes through atomics
// (CAS on `first`/`last`/`next`); the hazard domain gates reclamation.
unsafe impl<T: Send> Sync for Queue<T> {}
unsafe impl<T: Send> Send for Queue<T> {}

impl<T> Queue<T> {
    /// Builds a queue with the reference configuration (`E=9`, `T=16`,
    /// initial retire-list capacity 32).
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    /// Builds a queue with an explicit configuration.
    pub fn with_config(config: QueueConfig) -> Self {
        let dummy = Box::into_raw(Box::new(Node::sentinel()));
        Queue {
            first: AtomicPtr::new(dummy),
            last: AtomicPtr::new(dummy),
            domain: HazardDomain::new(config.into(), release_node::<T>),
        }
    }

    /// Registers the calling thread with the queue's hazard domain,
    /// returning a handle through which it can `push`/`pop`.
    pub fn attach(&self) -> Result<ThreadHandle<'_, T>, QueueError> {
        let record = self.domain.acquire()?;
        Ok(ThreadHandle {
            queue: self,
            record,
        })
    }

    fn push_inner(&self, record: &HazardRecord<Node<T>>, value: T) -> Result<(), QueueError> {
        let node = Box::into_raw(Box::new(Node::holding(value)));
        let backoff = Backoff::new();

        let tail = loop {
            let tail = self.last.load(Ordering::SeqCst);
            self.domain.set_hazard(record, HAZARD_SLOT_FIRST, tail)?;
            if self.last.load(Ordering::SeqCst) != tail {
                backoff.spin();
                continue;
            }

            // SAFETY: `tail` is hazard-protected above, so it cannot be
            // reclaimed while we dereference it.
            let next = unsafe { (*tail).next.load(Ordering::SeqCst) };
            if self.last.load(Ordering::SeqCst) != tail {
                backoff.spin();
                continue;
            }

            if !next.is_null() {
                let _ = self
                    .last
                    .compare_exchange(tail, next, Ordering::SeqCst, Ordering::SeqCst);
                backoff.spin();
                continue;
            }

            // SAFETY: see above; `tail` is protected for the duration of this CAS.
            let cas = unsafe {
                (*tail)
                    .next
                    .compare_exchange(ptr::null_mut(), node, Ordering::SeqCst, Ordering::SeqCst)
            };
            if cas.is_ok() {
                break tail;
            }
            backoff.spin();
        };

        // Best-effort: another thread may already have helped this along.
        let _ = self
            .last
            .compare_exchange(tail, node, Ordering::SeqCst, Ordering::SeqCst);
        self.domain.clear_hazard(record, HAZARD_SLOT_FIRST);
        trace!("push linearized");
        Ok(())
    }

    fn pop_inner(&self, record: &HazardRecord<Node<T>>) -> Result<Option<T>, QueueError> {
        let backoff = Backoff::new();

        loop {
            let first = self.first.load(Ordering::SeqCst);
            self.domain.set_hazard(record, HAZARD_SLOT_FIRST, first)?;
            if self.first.load(Ordering::SeqCst) != first {
                backoff.spin();
                continue;
            }

            let last = self.last.load(Ordering::SeqCst);
            // SAFETY: `first` is hazard-protected above.
            let next = unsafe { (*first).next.load(Ordering::SeqCst) };
            self.domain.set_hazard(record, HAZARD_SLOT_SECOND, next)?;
            if self.first.load(Ordering::SeqCst) != first {
                backoff.spin();
                continue;
            }

            if next.is_null() {
                self.domain.clear_hazard(record, HAZARD_SLOT_FIRST);
                self.domain.clear_hazard(record, HAZARD_SLOT_SECOND);
                return Ok(None);
            }

            if first == last {
                let _ = self
                    .last
                    .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst);
                backoff.spin();
                continue;
            }

            // SAFETY: `next` is hazard-protected above, so reading its value
            // before the head CAS below cannot race with reclamation even
            // if a concurrent pop wins that CAS first.
            let value = unsafe { ptr::read((*next).value.as_ptr()) };

            if self
                .first
                .compare_exchange(first, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                // The pop already linearized by winning the CAS above; a
                // failure to record `first` for reclamation must not cost
                // the caller the value it already owns. Leak the node
                // instead of propagating the error past a successful pop.
                if let Err(err) = self.domain.retire(record, first) {
                    warn!(?err, "retire failed after pop linearized; node leaked");
                }
                self.domain.clear_hazard(record, HAZARD_SLOT_FIRST);
                self.domain.clear_hazard(record, HAZARD_SLOT_SECOND);
                trace!("pop linearized");
                return Ok(Some(value));
            }

            // Lost the race: the value we read out of `next` now belongs to
            // whichever pop won, so it must not be dropped here.
            std::mem::forget(value);
            backoff.spin();
        }
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        let mut cursor = *self.first.get_mut();
        let mut is_sentinel = true;
        while !cursor.is_null() {
            // SAFETY: sole owner during drop; each node visited exactly once.
            let mut node = unsafe { Box::from_raw(cursor) };
            if !is_sentinel {
                // This node was never popped: its value slot is still live
                // and must be dropped in place rather than leaked.
                unsafe { ptr::drop_in_place(node.value.as_mut_ptr()) };
            }
            cursor = *node.next.get_mut();
            is_sentinel = false;
        }
    }
}

/// A thread's binding to a [`Queue`]'s hazard domain.
///
/// Dropping a handle (or calling [`ThreadHandle::detach`] explicitly, which
/// is equivalent) flushes its retire list with one final scan and returns
/// the underlying hazard record to the pool for reuse.
pub struct ThreadHandle<'queue, T> {
    queue: &'queue Queue<T>,
    record: &'queue HazardRecord<Node<T>>,
}

impl<'queue, T> ThreadHandle<'queue, T> {
    /// Enqueues `value`. Returns `Err` only if node allocation failed, in
    /// which case `value` was not enqueued (it is dropped with the failed
    /// allocation attempt, matching `Box::new`'s abort-on-OOM behavior on
    /// stable Rust — see `DESIGN.md`).
    pub fn push(&self, value: T) -> Result<(), QueueError> {
        self.queue.push_inner(self.record, value)
    }

    /// Dequeues the oldest value, or `None` if the queue was observed empty
    /// at some point during the call. A failure to record the vacated node
    /// for later reclamation is logged and leaks that node rather than
    /// costing the caller a value already dequeued (see `DESIGN.md`).
    pub fn pop(&self) -> Option<T> {
        self.queue
            .pop_inner(self.record)
            .expect("pop cannot observe hazard-slot range errors for its own fixed indices")
    }

    /// Explicitly releases this handle's hazard record. Equivalent to
    /// `drop(handle)`; provided for callers that want the release point to
    /// be visible at the call site.
    pub fn detach(self) {
        drop(self)
    }
}

impl<T> Drop for ThreadHandle<'_, T> {
    fn drop(&mut self) {
        let _ = self.queue.domain.scan(self.record);
        self.queue.domain.release_record(self.record);
    }
}
