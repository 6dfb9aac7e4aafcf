//! The process-wide hazard registry.
//!
//! An append-only, singly-linked list of hazard records. Records are pushed
//! at the head with CAS and never removed, so walkers only need an acquire
//! load of `head`. The registry also owns the global sink that receives a
//! deactivating record's unreclaimable leftovers.

use std::sync::atomic::{fence, AtomicPtr, Ordering};
use std::sync::Mutex;

use log::trace;

use crate::record::{HazardRecord, ScanSet};
use crate::retired::RetiredItem;

pub(crate) struct Registry {
    head: AtomicPtr<HazardRecord>,
    sink: Mutex<Vec<RetiredItem>>,
}

static REGISTRY: Registry = Registry {
    head: AtomicPtr::new(core::ptr::null_mut()),
    sink: Mutex::new(Vec::new()),
};

#[inline]
pub(crate) fn registry() -> &'static Registry {
    &REGISTRY
}

impl Registry {
    /// Claims an inactive record, or links a fresh one at the head.
    pub(crate) fn acquire_record(&self) -> &'static HazardRecord {
        let mut cursor = self.head.load(Ordering::Acquire);
        while !cursor.is_null() {
            // SAFETY: records are never freed once linked.
            let record = unsafe { &*cursor };
            if !record.is_active(Ordering::Relaxed) && record.try_claim() {
                trace!("reusing hazard record {:p}", record);
                return record;
            }
            cursor = record.next.load(Ordering::Acquire);
        }

        // Every linked record is in use; push a new one.
        let record: &'static HazardRecord = Box::leak(Box::new(HazardRecord::new()));
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            record.next.store(head, Ordering::Relaxed);
            match self.head.compare_exchange(
                head,
                record as *const _ as *mut _,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    trace!("linked new hazard record {:p}", record);
                    return record;
                }
                Err(observed) => head = observed,
            }
        }
    }

    /// Deactivates a record on thread exit.
    ///
    /// Slots are zeroed behind a release fence so a scanner that still sees
    /// the record observes nulls; the retirement queue is drained as far as
    /// a scan allows and the survivors migrate into the global sink. This
    /// is the one place the system takes a lock.
    ///
    /// # Safety
    ///
    /// Must be called by the thread that claimed the record, exactly once
    /// per claim, with no live slot reservations.
    pub(crate) unsafe fn release_record(&self, record: &'static HazardRecord) {
        fence(Ordering::Release);
        for index in 0..record.slot_count() {
            record.slot(index).store(0, Ordering::Relaxed);
        }

        // SAFETY: still the owning thread until `deactivate` below.
        if unsafe { !record.retired_mut().is_empty() } {
            self.flush(record);
        }
        let survivors = std::mem::take(unsafe { record.retired_mut() });

        {
            let mut sink = self.sink.lock().unwrap();
            sink.extend(survivors);
            if !sink.is_empty() {
                // Opportunistic sweep: with this record's slots already
                // cleared, anything unprotected in the sink can go now.
                let scratch = unsafe { record.scratch_mut() };
                if self.scan(scratch) {
                    sink.retain(|item| {
                        if scratch.contains(&item.address()) {
                            true
                        } else {
                            unsafe { item.delete() };
                            false
                        }
                    });
                } else {
                    for item in sink.drain(..) {
                        unsafe { item.delete() };
                    }
                }
            }
        }

        trace!("deactivating hazard record {:p}", record);
        record.deactivate();
    }

    /// Collects every published hazard into `set`. Returns false when no
    /// hazard is published anywhere.
    ///
    /// The seq_cst fence pairs with the one a reader issues between
    /// publishing into its slot and re-reading the source: either the
    /// scanner sees the slot write, or the reader sees the source change.
    pub(crate) fn scan(&self, set: &mut ScanSet) -> bool {
        fence(Ordering::SeqCst);
        set.clear();
        let mut cursor = self.head.load(Ordering::Acquire);
        while !cursor.is_null() {
            // SAFETY: records are never freed once linked.
            let record = unsafe { &*cursor };
            for index in 0..record.slot_count() {
                let address = record.slot(index).load(Ordering::Relaxed);
                if address != 0 {
                    set.insert(address);
                }
            }
            cursor = record.next.load(Ordering::Acquire);
        }
        fence(Ordering::Acquire);
        !set.is_empty()
    }

    /// Partitions the record's retirement queue against a fresh scan:
    /// protected items stay queued, everything else is destroyed.
    pub(crate) fn flush(&self, record: &HazardRecord) {
        // SAFETY: flush is only reached from the owning thread (retire
        // threshold or release_record).
        let scratch = unsafe { record.scratch_mut() };
        let retired = unsafe { record.retired_mut() };
        if self.scan(scratch) {
            retired.retain(|item| {
                if scratch.contains(&item.address()) {
                    true
                } else {
                    unsafe { item.delete() };
                    false
                }
            });
        } else {
            for item in retired.drain(..) {
                unsafe { item.delete() };
            }
        }
    }
}
