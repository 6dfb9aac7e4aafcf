//! Retired items: nodes handed to deferred reclamation.
//!
//! A retired item is a type-erased `(object, context, deleter)` triple. The
//! concrete type is baked into the monomorphised deleter function, so the
//! scan path never needs to know what it is freeing. The `context` word is
//! free-form deleter state; the plain `Box` deleter ignores it, allocator
//! deleters use it to reach their allocator.

use std::panic::{catch_unwind, AssertUnwindSafe};

use log::warn;

/// Type-erased destruction function for a retired object.
///
/// Called exactly once per retired item, after a scan has proven that no
/// hazard slot protects the object. The second argument is the `context`
/// word recorded at retirement time.
pub type DeleterFn = unsafe fn(*mut u8, *const u8);

pub(crate) struct RetiredItem {
    object: *mut u8,
    context: *const u8,
    deleter: DeleterFn,
}

// SAFETY: a retired item references an allocation that is unreachable from
// any shared root; it is destroyed at most once, and retirement requires
// the pointee to be Send so destruction may run on another thread.
unsafe impl Send for RetiredItem {}

impl RetiredItem {
    pub(crate) fn boxed<T: Send + 'static>(object: *mut T) -> Self {
        Self {
            object: object.cast(),
            context: core::ptr::null(),
            deleter: drop_box::<T>,
        }
    }

    pub(crate) fn raw(object: *mut u8, context: *const u8, deleter: DeleterFn) -> Self {
        Self {
            object,
            context,
            deleter,
        }
    }

    pub(crate) fn address(&self) -> usize {
        self.object as usize
    }

    /// Invokes the deleter. A panicking deleter is swallowed so that one
    /// poisoned item cannot stall reclamation of the rest of the queue.
    ///
    /// # Safety
    ///
    /// No hazard slot may protect the object, and this must be the only
    /// call for this item.
    pub(crate) unsafe fn delete(&self) {
        let object = self.object;
        let context = self.context;
        let deleter = self.deleter;
        if catch_unwind(AssertUnwindSafe(|| unsafe { deleter(object, context) })).is_err() {
            warn!(
                "retired-item deleter panicked, item at {:p} dropped from queue",
                object
            );
        }
    }
}

unsafe fn drop_box<T>(object: *mut u8, _context: *const u8) {
    // SAFETY: the object was allocated via Box and is unreachable.
    unsafe { drop(Box::from_raw(object.cast::<T>())) };
}
