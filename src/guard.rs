//! Hazard slot reservation and the protected-load protocol.
//!
//! A thread reserves slots through a [`HazardArray`], then materialises one
//! [`HazardPtr`] per slot. A `HazardPtr` publishes the address the thread
//! is about to dereference; reclaimers scan every published slot before
//! freeing anything, so a protected object stays alive even after another
//! thread has retired it.
//!
//! The thread's hazard record is claimed lazily on first reservation and
//! handed back when the thread exits: the thread-local holder's destructor
//! does the deactivation, so there is no explicit context object to thread
//! through APIs.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::atomic::AtomicPtr;
//! use cairn::HazardArray;
//!
//! let shared: AtomicPtr<u64> = AtomicPtr::new(Box::into_raw(Box::new(42)));
//!
//! let array = HazardArray::<1>::new();
//! let mut hp = array.hazard_ptr::<u64>();
//! let p = hp.protect(&shared);
//! // *p stays valid until `hp` is cleared or dropped, even if another
//! // thread unlinks and retires it meanwhile.
//! ```

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{fence, AtomicPtr, Ordering};

use crate::record::{HazardRecord, SLOTS_PER_RECORD};
use crate::registry::registry;
use crate::retired::{DeleterFn, RetiredItem};

struct LocalRecord {
    record: &'static HazardRecord,
    reserved: Cell<usize>,
}

impl LocalRecord {
    fn new() -> Self {
        Self {
            record: registry().acquire_record(),
            reserved: Cell::new(0),
        }
    }
}

impl Drop for LocalRecord {
    fn drop(&mut self) {
        // SAFETY: this thread claimed the record and every HazardArray has
        // been dropped by the time thread-local destructors run.
        unsafe { registry().release_record(self.record) };
    }
}

thread_local! {
    static LOCAL: LocalRecord = LocalRecord::new();
}

/// A scoped reservation of `N` contiguous hazard slots from the calling
/// thread's record.
///
/// Reservations are stack-like: arrays must be dropped in reverse creation
/// order (natural scoping does this). Requesting more slots than the record
/// holds ([`SLOTS_PER_RECORD`] at any instant, across all live arrays of
/// the thread) is a contract violation and panics.
pub struct HazardArray<const N: usize> {
    record: &'static HazardRecord,
    base: usize,
    taken: Cell<usize>,
    // Slots belong to the calling thread's record.
    _not_send: PhantomData<*mut ()>,
}

impl<const N: usize> HazardArray<N> {
    /// Reserves `N` slots, lazily binding this thread to a hazard record.
    pub fn new() -> Self {
        LOCAL.with(|local| {
            let base = local.reserved.get();
            assert!(
                base + N <= SLOTS_PER_RECORD,
                "hazard slot capacity exceeded: {} in use, {} requested, {} per thread",
                base,
                N,
                SLOTS_PER_RECORD,
            );
            local.reserved.set(base + N);
            Self {
                record: local.record,
                base,
                taken: Cell::new(0),
                _not_send: PhantomData,
            }
        })
    }

    /// Materialises the next reserved slot as a typed hazard pointer.
    ///
    /// At most `N` hazard pointers can be taken from one array.
    pub fn hazard_ptr<T>(&self) -> HazardPtr<'_, T> {
        let index = self.taken.get();
        assert!(index < N, "hazard array exhausted: {} slots reserved", N);
        self.taken.set(index + 1);
        HazardPtr {
            slot_index: self.base + index,
            record: self.record,
            ptr: core::ptr::null_mut(),
            _marker: PhantomData,
        }
    }
}

impl<const N: usize> Default for HazardArray<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Drop for HazardArray<N> {
    fn drop(&mut self) {
        fence(Ordering::Release);
        for index in self.base..self.base + N {
            self.record.slot(index).store(0, Ordering::Relaxed);
        }
        // Ignore a torn-down thread-local: the record is being released
        // anyway and the reservation dies with it.
        let _ = LOCAL.try_with(|local| {
            debug_assert_eq!(local.reserved.get(), self.base + N);
            local.reserved.set(self.base);
        });
    }
}

/// One hazard slot, typed.
///
/// The pointer held by a `HazardPtr` is safe to dereference until the next
/// `protect`/`set`/`clear` on the same slot, or until the slot is dropped,
/// no matter what other threads retire in the meantime.
pub struct HazardPtr<'a, T> {
    slot_index: usize,
    record: &'a HazardRecord,
    ptr: *mut T,
    _marker: PhantomData<*mut T>,
}

impl<'a, T> HazardPtr<'a, T> {
    /// Reads `src` and publishes the observed pointer into this slot, such
    /// that the publication is visible to any scan that could free the
    /// pointee.
    ///
    /// The loop re-reads `src` after publishing: if the two reads disagree,
    /// a retirer may already have scanned past the not-yet-visible slot
    /// value, so the published value is refreshed and checked again. The
    /// seq_cst fence in the middle pairs with the scanner's.
    pub fn protect(&mut self, src: &AtomicPtr<T>) -> *mut T {
        let mut observed = src.load(Ordering::Relaxed);
        loop {
            self.slot().store(observed as usize, Ordering::Release);
            fence(Ordering::SeqCst);
            let current = src.load(Ordering::Acquire);
            if observed == current {
                self.ptr = current;
                return current;
            }
            observed = current;
        }
    }

    /// Publishes an arbitrary pointer with a full fence.
    ///
    /// The caller must re-verify that the pointee is still reachable after
    /// this returns; until then the protection is not established. To move
    /// a value between two hazard pointers use [`swap`](Self::swap), never
    /// a `get`/`set` pair.
    pub fn set(&mut self, ptr: *mut T) {
        self.slot().store(ptr as usize, Ordering::Release);
        fence(Ordering::SeqCst);
        self.ptr = ptr;
    }

    /// Publishes without the seq_cst fence.
    ///
    /// Only sound where protection is already guaranteed by other means,
    /// e.g. protecting a successor that is still reachable from an already
    /// protected node.
    pub fn set_without_fence(&mut self, ptr: *mut T) {
        self.slot().store(ptr as usize, Ordering::Release);
        self.ptr = ptr;
    }

    /// Empties the slot.
    pub fn clear(&mut self) {
        self.slot().store(0, Ordering::Release);
        self.ptr = core::ptr::null_mut();
    }

    /// Remembers a pointer that is never retired (a sentinel or other
    /// permanent node) without publishing it. The slot itself is emptied.
    pub fn set_sentinel(&mut self, ptr: *mut T) {
        self.slot().store(0, Ordering::Release);
        self.ptr = ptr;
    }

    /// Exchanges both the published slots and the held pointers. Both
    /// hazard pointers must come from the same [`HazardArray`].
    pub fn swap(&mut self, other: &mut HazardPtr<'a, T>) {
        core::mem::swap(&mut self.slot_index, &mut other.slot_index);
        core::mem::swap(&mut self.record, &mut other.record);
        core::mem::swap(&mut self.ptr, &mut other.ptr);
    }

    /// The held pointer.
    #[inline]
    pub fn get(&self) -> *mut T {
        self.ptr
    }

    /// Returns true if no pointer is held.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// # Safety
    ///
    /// The held pointer must have been established via `protect` (or an
    /// equivalent publish-and-verify) and not cleared since.
    #[inline]
    pub unsafe fn as_ref(&self) -> Option<&T> {
        // SAFETY: caller guarantees the protection protocol ran.
        unsafe { self.ptr.as_ref() }
    }

    /// # Safety
    ///
    /// As [`as_ref`](Self::as_ref), and the pointer must be non-null.
    #[inline]
    pub unsafe fn deref(&self) -> &T {
        debug_assert!(!self.ptr.is_null());
        // SAFETY: caller guarantees the protection protocol ran.
        unsafe { &*self.ptr }
    }

    /// Hands the held object to deferred reclamation and empties the slot.
    /// The object is destroyed via `Box::from_raw` once no slot anywhere
    /// publishes it.
    ///
    /// # Safety
    ///
    /// The object must be a `Box` allocation, already unlinked from every
    /// shared root (only thread-local hazard pointers may still hold it),
    /// and retired exactly once.
    pub unsafe fn retire(&mut self)
    where
        T: Send + 'static,
    {
        let object = self.ptr;
        self.clear();
        if object.is_null() {
            return;
        }
        // SAFETY: this thread owns the record behind this slot.
        unsafe { self.record.add_retired(RetiredItem::boxed(object)) };
    }

    /// As [`retire`](Self::retire), but destruction goes through `deleter`
    /// with `context` as its state. This is the allocator hook node pools
    /// use to route reclamation back to a free list.
    ///
    /// # Safety
    ///
    /// As `retire`; additionally `deleter(object, context)` must be sound
    /// to call once from any thread, and `context` must stay valid until
    /// then.
    pub unsafe fn retire_with(&mut self, context: *const u8, deleter: DeleterFn) {
        let object = self.ptr;
        self.clear();
        if object.is_null() {
            return;
        }
        // SAFETY: this thread owns the record behind this slot.
        unsafe {
            self.record
                .add_retired(RetiredItem::raw(object.cast(), context, deleter))
        };
    }

    #[inline]
    fn slot(&self) -> &crate::record::HazardSlot {
        self.record.slot(self.slot_index)
    }
}
