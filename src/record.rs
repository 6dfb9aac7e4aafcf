//! Per-thread hazard records.
//!
//! Each thread that touches a protected structure owns one `HazardRecord`:
//! a fixed array of hazard slots, a retirement queue, and an activation
//! flag. Records are linked into the global registry once and never freed;
//! a departing thread only marks its record inactive so a later thread can
//! claim it.

use std::cell::UnsafeCell;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use foldhash::fast::FixedState;

use crate::registry::registry;
use crate::retired::RetiredItem;
use crate::utils::CacheAligned;

/// Hazard slots available to one thread at any instant.
///
/// Three is enough for every operation in the tree (the list map's
/// concurrent iteration is the widest, with prev/curr/skip); reserving more
/// than this many slots at once is a contract violation.
pub const SLOTS_PER_RECORD: usize = 3;

/// Retired items a record accumulates before it scans the registry and
/// frees what it can.
///
/// Any value at least as large as the total number of active hazard slots
/// plus a small constant is correct; larger values trade reclamation
/// latency for fewer scans.
pub const FLUSH_THRESHOLD: usize = 16;

/// Address set reused across scans.
pub(crate) type ScanSet = HashSet<usize, FixedState>;

/// One published hazard: a single word holding an address or zero.
///
/// Stores are atomic, so a concurrent scanner sees either the old or the
/// new value, never a torn word.
pub(crate) struct HazardSlot {
    ptr: AtomicUsize,
}

impl HazardSlot {
    const fn new() -> Self {
        Self {
            ptr: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub(crate) fn load(&self, order: Ordering) -> usize {
        self.ptr.load(order)
    }

    #[inline]
    pub(crate) fn store(&self, value: usize, order: Ordering) {
        self.ptr.store(value, order);
    }
}

pub(crate) struct HazardRecord {
    pub(crate) next: AtomicPtr<HazardRecord>,
    active: AtomicBool,
    slots: [CacheAligned<HazardSlot>; SLOTS_PER_RECORD],
    // Owner-thread only. The owning thread is the one that claimed `active`;
    // nothing else reads or writes these cells.
    retired: UnsafeCell<Vec<RetiredItem>>,
    scratch: UnsafeCell<ScanSet>,
}

// SAFETY: `next`, `active` and the slots are only accessed atomically;
// `retired` and `scratch` are accessed exclusively by the claiming thread
// (see the field comment), which is what makes sharing the record sound.
unsafe impl Send for HazardRecord {}
unsafe impl Sync for HazardRecord {}

impl HazardRecord {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicPtr::new(core::ptr::null_mut()),
            active: AtomicBool::new(true),
            slots: core::array::from_fn(|_| CacheAligned::new(HazardSlot::new())),
            retired: UnsafeCell::new(Vec::with_capacity(FLUSH_THRESHOLD)),
            scratch: UnsafeCell::new(ScanSet::default()),
        }
    }

    #[inline]
    pub(crate) fn slot(&self, index: usize) -> &HazardSlot {
        &self.slots[index].data
    }

    #[inline]
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub(crate) fn is_active(&self, order: Ordering) -> bool {
        self.active.load(order)
    }

    #[inline]
    pub(crate) fn try_claim(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Appends a retired item, flushing once the queue hits the threshold.
    ///
    /// # Safety
    ///
    /// Must be called by the thread that claimed this record.
    pub(crate) unsafe fn add_retired(&self, item: RetiredItem) {
        // SAFETY: owner-thread access per the caller contract. The borrow
        // ends before flush re-enters the cell.
        let pending = {
            let retired = unsafe { &mut *self.retired.get() };
            retired.push(item);
            retired.len()
        };
        if pending >= FLUSH_THRESHOLD {
            registry().flush(self);
        }
    }

    /// # Safety
    ///
    /// Must be called by the thread that claimed this record.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn retired_mut(&self) -> &mut Vec<RetiredItem> {
        unsafe { &mut *self.retired.get() }
    }

    /// # Safety
    ///
    /// Must be called by the thread that claimed this record.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn scratch_mut(&self) -> &mut ScanSet {
        unsafe { &mut *self.scratch.get() }
    }
}
