//! Sorted singly-linked list map (Harris–Michael) on hazard-pointer
//! reclamation.

use std::ptr;
use std::sync::atomic::Ordering;

use cairn::{AtomicMarkedPtr, HazardArray, HazardPtr, MarkedPtr};

struct Node<K, V> {
    // The mark on `next` means this node is logically deleted.
    next: AtomicMarkedPtr<Node<K, V>>,
    key: K,
    value: V,
}

/// A lock-free map over an ascending singly-linked list.
///
/// Removal is two-phase: a CAS sets the mark bit on the victim's successor
/// pointer (the logical delete), and the physical unlink is completed by
/// whichever traversal next walks past the victim. Keys strictly increase
/// along the unmarked chain; operations are linearisable per key.
///
/// Lookup cost is linear in the key's position, which is the point: this
/// is the list layer a skip list would be built from, kept honest on its
/// own.
///
/// # Examples
///
/// ```ignore
/// use cairn_map::SortedListMap;
///
/// let map = SortedListMap::new();
/// assert_eq!(map.insert(3, "bar"), None);
/// assert_eq!(map.insert(3, "hoge"), Some("bar"));
/// assert_eq!(map.get(&3), Some("hoge"));
/// assert_eq!(map.remove(&3), Some("hoge"));
/// assert_eq!(map.get(&3), None);
/// ```
pub struct SortedListMap<K, V> {
    // The sentinel link: successor chain of the whole list. Never marked,
    // never retired.
    head: AtomicMarkedPtr<Node<K, V>>,
}

impl<K, V> SortedListMap<K, V> {
    /// Creates an empty map.
    pub const fn new() -> Self {
        Self {
            head: AtomicMarkedPtr::null(),
        }
    }
}

impl<K, V> Default for SortedListMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SortedListMap<K, V>
where
    K: Ord + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// The link that precedes the current position: the sentinel's when
    /// `prev` is null, otherwise `prev`'s successor link.
    fn prev_link(&self, prev: *mut Node<K, V>) -> &AtomicMarkedPtr<Node<K, V>> {
        if prev.is_null() {
            &self.head
        } else {
            // SAFETY: a non-null prev is held by the caller's hazard slot.
            unsafe { &(*prev).next }
        }
    }

    /// Walks towards `key` from the caller's position.
    ///
    /// Precondition: `prev_hp` holds the sentinel (null) or a node whose
    /// key is below `key`. Postcondition: `prev_hp` holds the last node
    /// below `key`, `curr_hp` the first node at or above it (null at the
    /// end of the list). Returns whether `curr`'s key equals `key`,
    /// together with the observed value of `curr`'s successor link.
    ///
    /// Marked nodes encountered on the way are unlinked and retired here;
    /// every traversal helps complete pending removals.
    fn search<'a>(
        &self,
        key: &K,
        prev_hp: &mut HazardPtr<'a, Node<K, V>>,
        curr_hp: &mut HazardPtr<'a, Node<K, V>>,
    ) -> (bool, MarkedPtr<Node<K, V>>) {
        'reload: loop {
            let mut prev_next = self.prev_link(prev_hp.get()).load(Ordering::Acquire);
            'recheck: loop {
                if prev_next.is_marked() {
                    // prev itself got deleted; restart from the sentinel.
                    prev_hp.set_sentinel(ptr::null_mut());
                    continue 'reload;
                }
                'advance: loop {
                    if prev_next.is_null() {
                        curr_hp.clear();
                        return (false, MarkedPtr::null());
                    }
                    curr_hp.set(prev_next.as_ptr());
                    // Publication re-read: only when the link still holds
                    // the same word is the hazard established.
                    let reread = self.prev_link(prev_hp.get()).load(Ordering::Acquire);
                    if prev_next != reread {
                        prev_next = reread;
                        continue 'recheck;
                    }

                    let curr = curr_hp.get();
                    // SAFETY: curr is protected and verified reachable.
                    let curr_next = unsafe { &(*curr).next }.load(Ordering::Acquire);
                    if curr_next.is_marked() {
                        // curr is logically deleted: unlink it, or start
                        // over if the unlink raced.
                        if self
                            .prev_link(prev_hp.get())
                            .compare_exchange(
                                prev_next,
                                curr_next.to_unmarked(),
                                Ordering::SeqCst,
                                Ordering::SeqCst,
                            )
                            .is_ok()
                        {
                            // SAFETY: the CAS removed curr from the chain.
                            unsafe { curr_hp.retire() };
                            prev_next = curr_next.to_unmarked();
                            continue 'advance;
                        }
                        continue 'reload;
                    }

                    // SAFETY: curr is protected; keys are immutable.
                    let curr_key = unsafe { &(*curr).key };
                    if curr_key < key {
                        prev_hp.swap(curr_hp);
                        prev_next = curr_next;
                        continue 'advance;
                    }
                    return (curr_key == key, curr_next);
                }
            }
        }
    }

    /// Deletes curr by routing `prev`'s link to `new_node`: curr's own
    /// successor for a plain removal, or a replacement node carrying the
    /// same key for an overwriting insert.
    ///
    /// On success returns curr's value; the marking CAS is the
    /// linearisation point, and whoever completes the physical unlink
    /// (here, or a later traversal) retires curr. On failure returns
    /// `None` with `curr_next` refreshed from the list.
    fn replace_curr(
        &self,
        prev_hp: &HazardPtr<'_, Node<K, V>>,
        curr_hp: &mut HazardPtr<'_, Node<K, V>>,
        curr_next: &mut MarkedPtr<Node<K, V>>,
        new_node: MarkedPtr<Node<K, V>>,
    ) -> Option<V> {
        debug_assert!(!curr_next.is_marked());
        debug_assert!(!new_node.is_marked());
        let curr = curr_hp.get();
        // SAFETY: curr is protected by curr_hp.
        let curr_link = unsafe { &(*curr).next };
        match curr_link.compare_exchange(
            *curr_next,
            new_node.to_marked(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {
                let unlinked = self
                    .prev_link(prev_hp.get())
                    .compare_exchange(
                        MarkedPtr::new(curr),
                        new_node,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok();
                // Once marked, curr's value can no longer change.
                // SAFETY: curr is still protected.
                let old = unsafe { (*curr).value.clone() };
                if unlinked {
                    // SAFETY: this thread completed the unlink; losers
                    // leave retirement to the traversal that finishes it.
                    unsafe { curr_hp.retire() };
                }
                Some(old)
            }
            Err(_) => {
                *curr_next = curr_link.load(Ordering::Acquire);
                None
            }
        }
    }

    /// Returns the value mapped to `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        let array = HazardArray::<2>::new();
        let mut prev_hp = array.hazard_ptr();
        let mut curr_hp = array.hazard_ptr();
        prev_hp.set_sentinel(ptr::null_mut());
        let (found, _) = self.search(key, &mut prev_hp, &mut curr_hp);
        if found {
            // SAFETY: curr is protected for the duration of the clone.
            Some(unsafe { (*curr_hp.get()).value.clone() })
        } else {
            None
        }
    }

    /// Maps `key` to `value`. Returns the previous value if the key was
    /// present (the old node is replaced by a fresh one), `None` if the
    /// key is new.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let node = Box::into_raw(Box::new(Node {
            next: AtomicMarkedPtr::null(),
            key,
            value,
        }));
        // SAFETY: the node stays unshared until a successful CAS links it,
        // and the key is immutable afterwards.
        let key_ref = unsafe { &(*node).key };

        let array = HazardArray::<2>::new();
        let mut prev_hp = array.hazard_ptr();
        let mut curr_hp = array.hazard_ptr();
        prev_hp.set_sentinel(ptr::null_mut());
        loop {
            let (found, mut curr_next) = self.search(key_ref, &mut prev_hp, &mut curr_hp);
            if found {
                loop {
                    // Splice the new node in over curr.
                    // SAFETY: node is still unshared here.
                    unsafe { (*node).next.store(curr_next, Ordering::Relaxed) };
                    if let Some(old) = self.replace_curr(
                        &prev_hp,
                        &mut curr_hp,
                        &mut curr_next,
                        MarkedPtr::new(node),
                    ) {
                        return Some(old);
                    }
                    if curr_next.is_marked() {
                        // Someone else deleted curr first; search again.
                        break;
                    }
                }
            } else {
                // Link between prev and curr.
                let prev_next = MarkedPtr::new(curr_hp.get());
                // SAFETY: node is still unshared here.
                unsafe { (*node).next.store(prev_next, Ordering::Relaxed) };
                if self
                    .prev_link(prev_hp.get())
                    .compare_exchange(
                        prev_next,
                        MarkedPtr::new(node),
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok()
                {
                    return None;
                }
            }
        }
    }

    /// Removes `key`, returning its value if it was present.
    pub fn remove(&self, key: &K) -> Option<V> {
        let array = HazardArray::<2>::new();
        let mut prev_hp = array.hazard_ptr();
        let mut curr_hp = array.hazard_ptr();
        prev_hp.set_sentinel(ptr::null_mut());
        loop {
            let (found, mut curr_next) = self.search(key, &mut prev_hp, &mut curr_hp);
            if !found {
                return None;
            }
            loop {
                let successor = curr_next;
                if let Some(old) =
                    self.replace_curr(&prev_hp, &mut curr_hp, &mut curr_next, successor)
                {
                    return Some(old);
                }
                if curr_next.is_marked() {
                    break;
                }
            }
        }
    }

    /// Visits every entry in ascending key order, concurrently with other
    /// operations.
    ///
    /// Not a snapshot: entries inserted or removed during the walk may or
    /// may not be seen. What is guaranteed: keys are delivered strictly
    /// increasing, no key twice, and every key that stays in the map for
    /// the whole walk is delivered. When a restart is forced by a deleted
    /// predecessor, the last delivered node is parked in a third hazard
    /// slot and delivery is suppressed up to its key.
    pub fn for_each<F: FnMut(&K, &V)>(&self, mut f: F) {
        let array = HazardArray::<3>::new();
        let mut prev_hp = array.hazard_ptr::<Node<K, V>>();
        let mut curr_hp = array.hazard_ptr::<Node<K, V>>();
        let mut skip_hp = array.hazard_ptr::<Node<K, V>>();

        'restart: loop {
            prev_hp.set_sentinel(ptr::null_mut());
            'reload: loop {
                let mut prev_next = self.prev_link(prev_hp.get()).load(Ordering::Acquire);
                'recheck: loop {
                    if prev_next.is_marked() {
                        // prev got deleted mid-walk; remember where
                        // delivery stopped and restart from the sentinel.
                        if skip_hp.is_null() {
                            skip_hp.swap(&mut prev_hp);
                        }
                        continue 'restart;
                    }
                    'advance: loop {
                        if prev_next.is_null() {
                            return;
                        }
                        curr_hp.set(prev_next.as_ptr());
                        let reread = self.prev_link(prev_hp.get()).load(Ordering::Acquire);
                        if prev_next != reread {
                            prev_next = reread;
                            continue 'recheck;
                        }

                        let curr = curr_hp.get();
                        // SAFETY: curr is protected and verified reachable.
                        let curr_next = unsafe { &(*curr).next }.load(Ordering::Acquire);
                        if curr_next.is_marked() {
                            if self
                                .prev_link(prev_hp.get())
                                .compare_exchange(
                                    prev_next,
                                    curr_next.to_unmarked(),
                                    Ordering::SeqCst,
                                    Ordering::SeqCst,
                                )
                                .is_ok()
                            {
                                // SAFETY: the CAS removed curr from the
                                // chain.
                                unsafe { curr_hp.retire() };
                                prev_next = curr_next.to_unmarked();
                                continue 'advance;
                            }
                            continue 'reload;
                        }

                        // SAFETY: skip and curr are both protected.
                        unsafe {
                            if !skip_hp.is_null() && (*skip_hp.get()).key < (*curr).key {
                                skip_hp.clear();
                            }
                            if skip_hp.is_null() {
                                let node = &*curr;
                                f(&node.key, &node.value);
                            }
                        }
                        prev_hp.swap(&mut curr_hp);
                        prev_next = curr_next;
                    }
                }
            }
        }
    }
}

impl<K, V> Drop for SortedListMap<K, V> {
    fn drop(&mut self) {
        // Exclusive access: free the chain, marks and all. Nodes already
        // handed to reclamation are not in the chain.
        let mut node = self.head.load(Ordering::Relaxed).as_ptr();
        while !node.is_null() {
            // SAFETY: nothing else can reach the chain any more.
            unsafe {
                let next = (*node).next.load(Ordering::Relaxed).to_unmarked().as_ptr();
                drop(Box::from_raw(node));
                node = next;
            }
        }
    }
}
