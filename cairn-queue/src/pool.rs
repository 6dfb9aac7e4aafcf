//! A lock-free free list for queue nodes.
//!
//! Dequeued nodes go back onto a Treiber stack instead of the allocator,
//! and `acquire` pops from it before falling back to a fresh allocation.
//! The push side is only ever reached from the reclamation path (or from
//! exclusive teardown), which is what makes the pop safe against ABA: an
//! address cannot re-enter the stack while any thread's hazard slot still
//! publishes it, because re-entry happens through a deferred deleter that
//! runs only after a scan.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use cairn::utils::CacheAligned;
use cairn::{HazardArray, HazardPtr};

use crate::queue::Node;

pub(crate) struct NodePool<T> {
    top: CacheAligned<AtomicPtr<Node<T>>>,
}

impl<T: Send + 'static> NodePool<T> {
    pub(crate) fn new() -> Self {
        Self {
            top: CacheAligned::new(AtomicPtr::new(ptr::null_mut())),
        }
    }

    /// Pops a free node, or allocates a fresh one when the stack is empty.
    /// The returned node's `next` is stale and its value vacant.
    pub(crate) fn acquire(&self) -> *mut Node<T> {
        let array = HazardArray::<1>::new();
        let mut top_hp = array.hazard_ptr::<Node<T>>();
        loop {
            let top = top_hp.protect(&self.top);
            if top.is_null() {
                return Box::into_raw(Box::new(Node::vacant()));
            }
            // SAFETY: `top` is protected, and a protected node cannot be
            // handed out and pushed back concurrently (pushes come from
            // the reclamation path only), so `next` is its stack successor
            // for as long as the CAS below can succeed.
            let next = unsafe { &(*top).next }.load(Ordering::Acquire);
            if self
                .top
                .compare_exchange(top, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return top;
            }
        }
    }

    /// Pushes a node onto the free list.
    ///
    /// # Safety
    ///
    /// No hazard slot may publish `node`: callers are the deferred deleter
    /// (which runs post-scan) and exclusive teardown.
    pub(crate) unsafe fn release(&self, node: *mut Node<T>) {
        let mut top = self.top.load(Ordering::Relaxed);
        loop {
            // SAFETY: the node is unreachable until the CAS links it.
            unsafe { (*node).next.store(top, Ordering::Relaxed) };
            match self
                .top
                .compare_exchange(top, node, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return,
                Err(observed) => top = observed,
            }
        }
    }

    /// Retires the node held by `hp` such that it lands back in this pool
    /// once no hazard protects it. Each pending item carries a strong
    /// reference to the pool, so reclamation may complete after the owning
    /// queue is gone.
    ///
    /// # Safety
    ///
    /// As [`HazardPtr::retire`]: the node must be unlinked and retired
    /// exactly once.
    pub(crate) unsafe fn retire_into(self: &Arc<Self>, hp: &mut HazardPtr<'_, Node<T>>) {
        if hp.get().is_null() {
            return;
        }
        let context = Arc::into_raw(Arc::clone(self)).cast::<u8>();
        // SAFETY: forwarded caller contract; `context` owns one strong
        // reference consumed by the deleter.
        unsafe { hp.retire_with(context, pool_deleter::<T>) };
    }
}

impl<T> Drop for NodePool<T> {
    fn drop(&mut self) {
        // Exclusive access; free nodes hold no values.
        let mut node = self.top.load(Ordering::Relaxed);
        while !node.is_null() {
            // SAFETY: the free list is unreachable now.
            unsafe {
                let next = (*node).next.load(Ordering::Relaxed);
                drop(Box::from_raw(node));
                node = next;
            }
        }
    }
}

unsafe fn pool_deleter<T: Send + 'static>(object: *mut u8, context: *const u8) {
    // SAFETY: `context` carries the strong reference taken at retirement;
    // the scan has proven `object` unprotected.
    let pool = unsafe { Arc::from_raw(context.cast::<NodePool<T>>()) };
    unsafe { pool.release(object.cast::<Node<T>>()) };
}
