//! Michael-style hazard-pointer record manager.
//!
//! A [`HazardDomain<P>`] owns a singly linked, append-only list of
//! [`HazardRecord<P>`]s. Threads acquire a record (reusing an inactive one
//! when available), publish pointers they are about to dereference into the
//! record's hazard slots, and retire pointers they have logically removed
//! from a shared structure. A retired pointer is only handed to the release
//! callback once a [`scan`](HazardDomain::scan) proves no record anywhere —
//! active or not — still has it published.
//!
//! This module knows nothing about queues; it protects and reclaims
//! pointers to an arbitrary pointee `P`.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crossbeam_utils::Backoff;
use tracing::trace;

use crate::error::HazardError;

/// Hazard slots held per thread. Fixed by the queue algorithm: one slot
/// protects the node currently believed to be `first` (or `last`), the
/// second protects that node's successor.
pub(crate) const HAZARDS_PER_RECORD: usize = 2;

pub(crate) const HAZARD_SLOT_FIRST: usize = 0;
pub(crate) const HAZARD_SLOT_SECOND: usize = 1;

/// A single thread's published hazards plus its private retirement buffers.
///
/// `rlist` and `plist` are mutated only by the thread that currently owns
/// this record (holds `active == true` via a successful CAS, or is the
/// thread running final teardown with no concurrent owners left). Every
/// other field (`next`, `active`, `slots`) is a cross-thread atomic.
pub(crate) struct HazardRecord<P> {
    next: AtomicPtr<HazardRecord<P>>,
    active: AtomicBool,
    slots: [AtomicPtr<P>; HAZARDS_PER_RECORD],
    // SAFETY: only ever touched by the record's current owner; see module docs.
    rlist: std::cell::UnsafeCell<Vec<*mut P>>,
    plist: std::cell::UnsafeCell<Vec<*mut P>>,
}

// SAFETY: cross-thread access to a HazardRecord is limited to the atomic
// fields (`next`, `active`, `slots`); `rlist`/`plist` are only ever read or
// written by the thread that owns the record (see struct docs).
unsafe impl<P> Sync for HazardRecord<P> {}
unsafe impl<P> Send for HazardRecord<P> {}

impl<P> HazardRecord<P> {
    fn new(rlist_capacity: usize, plist_capacity: usize) -> Result<Self, HazardError> {
        let mut rlist = Vec::new();
        rlist
            .try_reserve(rlist_capacity)
            .map_err(|_| HazardError::OutOfMemory)?;
        let mut plist = Vec::new();
        plist
            .try_reserve(plist_capacity)
            .map_err(|_| HazardError::OutOfMemory)?;
        Ok(HazardRecord {
            next: AtomicPtr::new(ptr::null_mut()),
            active: AtomicBool::new(true),
            slots: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            rlist: std::cell::UnsafeCell::new(rlist),
            plist: std::cell::UnsafeCell::new(plist),
        })
    }

    #[allow(clippy::mut_from_ref)]
    fn rlist_mut(&self) -> &mut Vec<*mut P> {
        // SAFETY: only the owning thread calls this, and never re-enters.
        unsafe { &mut *self.rlist.get() }
    }

    #[allow(clippy::mut_from_ref)]
    fn plist_mut(&self) -> &mut Vec<*mut P> {
        // SAFETY: only the owning thread calls this, and never re-enters.
        unsafe { &mut *self.plist.get() }
    }
}

/// Construction-time tuning for a [`HazardDomain`].
#[derive(Debug, Clone, Copy)]
pub struct HazardDomainConfig {
    /// Upper bound on concurrently live hazard records (`E`). Used only as
    /// an initial-capacity hint for each record's protected-list scratch
    /// buffer; exceeding it degrades to a reallocation, not a failure.
    pub expected_threads: usize,
    /// Retire-list length that triggers an immediate scan (`T`).
    pub scan_threshold: usize,
    /// Initial retire-list capacity per record.
    pub retire_list_capacity: usize,
}

impl Default for HazardDomainConfig {
    fn default() -> Self {
        HazardDomainConfig {
            expected_threads: 9,
            scan_threshold: 16,
            retire_list_capacity: 32,
        }
    }
}

/// Owns the global hazard-record list and the policy for reclaiming retired
/// pointers to `P`.
pub(crate) struct HazardDomain<P> {
    head: AtomicPtr<HazardRecord<P>>,
    config: HazardDomainConfig,
    release: fn(*mut P),
}

unsafe impl<P> Sync for HazardDomain<P> {}
unsafe impl<P> Send for HazardDomain<P> {}

impl<P> HazardDomain<P> {
    pub(crate) fn new(config: HazardDomainConfig, release: fn(*mut P)) -> Self {
        HazardDomain {
            head: AtomicPtr::new(ptr::null_mut()),
            config,
            release,
        }
    }

    /// Finds an inactive record to reuse, or allocates a fresh one and
    /// prepends it to the global list.
    pub(crate) fn acquire(&self) -> Result<&HazardRecord<P>, HazardError> {
        let mut cursor = self.head.load(Ordering::SeqCst);
        while !cursor.is_null() {
            // SAFETY: records are never freed while the domain is alive.
            let record = unsafe { &*cursor };
            if !record.active.load(Ordering::SeqCst)
                && record
                    .active
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                trace!("reused an inactive hazard record");
                return Ok(record);
            }
            cursor = record.next.load(Ordering::SeqCst);
        }

        let plist_capacity = self.config.expected_threads * HAZARDS_PER_RECORD;
        // The record's buffers are reserved with `try_reserve` so a real
        // allocation failure surfaces here as `OutOfMemory` instead of
        // aborting; only the outer `Box` allocation for the record itself
        // is infallible on stable Rust (a true allocator failure there
        // aborts the process, as it does for every `Vec` push that isn't
        // routed through `try_reserve`).
        let record = HazardRecord::new(self.config.retire_list_capacity, plist_capacity)?;
        let fresh_ptr = Box::into_raw(Box::new(record));

        let backoff = Backoff::new();
        loop {
            let old_head = self.head.load(Ordering::SeqCst);
            // SAFETY: fresh_ptr was just created by this thread and not yet published.
            unsafe { (*fresh_ptr).next.store(old_head, Ordering::SeqCst) };
            if self
                .head
                .compare_exchange(old_head, fresh_ptr, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                trace!("allocated and published a new hazard record");
                // SAFETY: published, never freed before domain teardown.
                return Ok(unsafe { &*fresh_ptr });
            }
            backoff.spin();
        }
    }

    /// Clears both slots and marks `record` inactive so another thread may
    /// reuse it. The record's retire list is left as-is.
    pub(crate) fn release_record(&self, record: &HazardRecord<P>) {
        for slot in &record.slots {
            slot.store(ptr::null_mut(), Ordering::SeqCst);
        }
        record.active.store(false, Ordering::SeqCst);
    }

    pub(crate) fn set_hazard(
        &self,
        record: &HazardRecord<P>,
        slot: usize,
        value: *mut P,
    ) -> Result<(), HazardError> {
        record
            .slots
            .get(slot)
            .ok_or(HazardError::InvalidSlot {
                index: slot,
                capacity: HAZARDS_PER_RECORD,
            })?
            .store(value, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn clear_hazard(&self, record: &HazardRecord<P>, slot: usize) {
        if let Some(cell) = record.slots.get(slot) {
            cell.store(ptr::null_mut(), Ordering::SeqCst);
        }
    }

    /// Appends `ptr` to `record`'s retire list, clears any hazard slot of
    /// `record` that still equals `ptr` (a pointer must not protect itself
    /// against its own retirement), and triggers a scan once the list has
    /// grown past the configured threshold.
    pub(crate) fn retire(&self, record: &HazardRecord<P>, ptr: *mut P) -> Result<(), HazardError> {
        let rlist = record.rlist_mut();
        rlist.try_reserve(1).map_err(|_| HazardError::OutOfMemory)?;
        rlist.push(ptr);

        for slot in &record.slots {
            if slot.load(Ordering::SeqCst) == ptr {
                slot.store(ptr::null_mut(), Ordering::SeqCst);
            }
        }

        if rlist.len() >= self.config.scan_threshold {
            self.scan(record)?;
        }
        Ok(())
    }

    /// Rebuilds `record.plist` from every hazard record's slots (active or
    /// not — an as-yet-uncleared slot still constrains reclamation), then
    /// releases every pointer in `record.rlist` that isn't in `plist`.
    pub(crate) fn scan(&self, record: &HazardRecord<P>) -> Result<(), HazardError> {
        let plist = record.plist_mut();
        plist.clear();

        let mut cursor = self.head.load(Ordering::SeqCst);
        while !cursor.is_null() {
            // SAFETY: records are never freed while the domain is alive.
            let other = unsafe { &*cursor };
            for slot in &other.slots {
                let hazard = slot.load(Ordering::SeqCst);
                if !hazard.is_null() {
                    plist
                        .try_reserve(1)
                        .map_err(|_| HazardError::OutOfMemory)?;
                    plist.push(hazard);
                }
            }
            cursor = other.next.load(Ordering::SeqCst);
        }

        let rlist = record.rlist_mut();
        let before = rlist.len();
        let mut i = 0;
        while i < rlist.len() {
            if plist.contains(&rlist[i]) {
                i += 1;
                continue;
            }
            (self.release)(rlist[i]);
            let last = rlist.len() - 1;
            rlist.swap(i, last);
            rlist.pop();
        }
        trace!(
            released = before - rlist.len(),
            retained = rlist.len(),
            "scan reclaimed retired pointers"
        );
        Ok(())
    }
}

impl<P> Drop for HazardDomain<P> {
    fn drop(&mut self) {
        // All threads have detached by this point (the queue enforces this
        // as a precondition of its own teardown), so nothing is protected
        // any more: release every remaining retired pointer unconditionally
        // and free every record.
        let mut cursor = self.head.swap(ptr::null_mut(), Ordering::SeqCst);
        while !cursor.is_null() {
            // SAFETY: sole owner during domain teardown, frees exactly once.
            let record = unsafe { Box::from_raw(cursor) };
            cursor = record.next.load(Ordering::SeqCst);
            for ptr in record.rlist_mut().drain(..) {
                (self.release)(ptr);
            }
        }
    }
}
