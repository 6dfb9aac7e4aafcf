//! Michael–Scott FIFO queue on hazard-pointer reclamation.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use cairn::utils::CacheAligned;
use cairn::HazardArray;

use crate::pool::NodePool;

pub(crate) struct Node<T> {
    pub(crate) next: AtomicPtr<Node<T>>,
    // Vacant in the dummy node and in pooled free-list nodes; a node's
    // value is moved out before the node is retired.
    pub(crate) value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Node<T> {
    pub(crate) fn vacant() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// An unbounded lock-free MPMC FIFO queue.
///
/// The classic two-pointer design: `head` points at a dummy node whose
/// successor chain is the data sequence, `tail` trails the true tail by at
/// most one link and is helped forward by whichever operation notices the
/// lag. Dequeued nodes are reclaimed through hazard pointers, so a slow
/// reader that still sights an old head can never touch freed memory.
///
/// # Examples
///
/// ```ignore
/// use cairn_queue::Queue;
///
/// let q = Queue::new();
/// q.push(1);
/// q.push(2);
/// assert_eq!(q.pop(), Some(1));
/// assert_eq!(q.pop(), Some(2));
/// assert_eq!(q.pop(), None);
/// ```
pub struct Queue<T> {
    head: CacheAligned<AtomicPtr<Node<T>>>,
    tail: CacheAligned<AtomicPtr<Node<T>>>,
    pool: Option<Arc<NodePool<T>>>,
    _marker: PhantomData<T>,
}

// SAFETY: values are moved through the queue, never shared; nodes are
// reclaimed via the hazard protocol.
unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T: Send + 'static> Queue<T> {
    /// Creates an empty queue backed by plain `Box` allocation.
    pub fn new() -> Self {
        Self::with_node_source(None)
    }

    /// Creates an empty queue that recycles dequeued nodes through a
    /// lock-free free list instead of returning them to the allocator.
    pub fn with_pool() -> Self {
        Self::with_node_source(Some(Arc::new(NodePool::new())))
    }

    fn with_node_source(pool: Option<Arc<NodePool<T>>>) -> Self {
        let dummy = Box::into_raw(Box::new(Node::vacant()));
        Self {
            head: CacheAligned::new(AtomicPtr::new(dummy)),
            tail: CacheAligned::new(AtomicPtr::new(dummy)),
            pool,
            _marker: PhantomData,
        }
    }

    fn new_node(&self, value: T) -> *mut Node<T> {
        let node = match &self.pool {
            Some(pool) => pool.acquire(),
            None => Box::into_raw(Box::new(Node::vacant())),
        };
        // SAFETY: the node is not yet linked, so this thread has exclusive
        // access; pooled nodes come back with a vacant value.
        unsafe {
            (*node).next.store(ptr::null_mut(), Ordering::Relaxed);
            (*(*node).value.get()).write(value);
        }
        node
    }

    unsafe fn retire_node(&self, hp: &mut cairn::HazardPtr<'_, Node<T>>) {
        match &self.pool {
            // SAFETY: forwarded caller contract.
            Some(pool) => unsafe { pool.retire_into(hp) },
            None => unsafe { hp.retire() },
        }
    }

    /// Appends a value at the tail.
    pub fn push(&self, value: T) {
        let node = self.new_node(value);
        let array = HazardArray::<1>::new();
        let mut tail_hp = array.hazard_ptr::<Node<T>>();
        loop {
            let t = tail_hp.protect(&self.tail);
            // SAFETY: `t` is protected and tail is never null.
            let next = unsafe { &(*t).next }.load(Ordering::Acquire);
            if !next.is_null() {
                // Tail lags; help it forward and retry.
                let _ = self
                    .tail
                    .compare_exchange(t, next, Ordering::SeqCst, Ordering::SeqCst);
                continue;
            }
            if unsafe { &(*t).next }
                .compare_exchange(ptr::null_mut(), node, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                // Losing this CAS is benign: someone else helped.
                let _ = self
                    .tail
                    .compare_exchange(t, node, Ordering::SeqCst, Ordering::SeqCst);
                return;
            }
        }
    }

    /// Removes the value at the head, passing it to `receiver`.
    ///
    /// Returns false (without invoking `receiver`) when the queue is
    /// empty. `receiver` runs exactly once per successful pop, before the
    /// vacated node is handed to reclamation.
    pub fn pop_with<F: FnOnce(T)>(&self, receiver: F) -> bool {
        let array = HazardArray::<2>::new();
        let mut head_hp = array.hazard_ptr::<Node<T>>();
        let mut next_hp = array.hazard_ptr::<Node<T>>();
        loop {
            let h = head_hp.protect(&self.head);
            // SAFETY: `h` is protected and head is never null.
            let n = unsafe { &(*h).next }.load(Ordering::Acquire);
            if n.is_null() {
                return false;
            }
            let t = self.tail.load(Ordering::Relaxed);
            if h == t {
                let _ = self
                    .tail
                    .compare_exchange(t, n, Ordering::SeqCst, Ordering::SeqCst);
            }
            // Keep `n` protected across the head swing so the value read
            // below cannot race reclamation. `n` is still reachable from
            // the protected `h`, so no fence is needed here.
            next_hp.set_without_fence(n);
            if self
                .head
                .compare_exchange(h, n, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                // SAFETY: this CAS made `n` the new dummy; the old dummy's
                // successor value belongs to this thread alone now.
                let value = unsafe { (*(*n).value.get()).assume_init_read() };
                receiver(value);
                next_hp.clear();
                // SAFETY: the old dummy `h` is unlinked from the queue.
                unsafe { self.retire_node(&mut head_hp) };
                return true;
            }
        }
    }

    /// Removes and returns the value at the head, or `None` when empty.
    pub fn pop(&self) -> Option<T> {
        let mut out = None;
        if self.pop_with(|value| out = Some(value)) {
            out
        } else {
            None
        }
    }
}

impl<T: Send + 'static> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        // Exclusive access: free the chain directly. The first node is the
        // dummy and holds no value.
        let mut node = self.head.load(Ordering::Relaxed);
        let mut vacant = true;
        while !node.is_null() {
            // SAFETY: nothing else can reach the chain any more.
            unsafe {
                let next = (*node).next.load(Ordering::Relaxed);
                if !vacant {
                    (*(*node).value.get()).assume_init_drop();
                }
                drop(Box::from_raw(node));
                vacant = false;
                node = next;
            }
        }
    }
}
