use cairn_queue::Queue;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
fn test_pooled_queue_simple() {
    let q = Queue::with_pool();
    q.push(1);
    q.push(2);
    q.push(3);
    assert_eq!(q.pop(), Some(1));
    assert_eq!(q.pop(), Some(2));
    assert_eq!(q.pop(), Some(3));
    assert_eq!(q.pop(), None);
}

#[test]
fn test_pooled_queue_recycles_under_churn() {
    // Single thread: every pop recycles a node that the next push reuses.
    let q = Queue::with_pool();
    for round in 0..1_000 {
        q.push(round);
        q.push(round + 1);
        assert_eq!(q.pop(), Some(round));
        assert_eq!(q.pop(), Some(round + 1));
    }
    assert_eq!(q.pop(), None);
}

/// Rapid free/reallocate cycles over the same small set of node addresses
/// must never corrupt values or crash: the hazard pointer on the pool's
/// top and on the queue's head close the ABA windows that address reuse
/// would otherwise open.
#[test]
#[cfg_attr(miri, ignore)]
fn test_pool_aba_stress() {
    const NUM_THREADS: usize = 8;
    const ITERATIONS: usize = 50_000;

    let q = Arc::new(Queue::<(usize, usize)>::with_pool());
    let popped = Arc::new(AtomicUsize::new(0));
    let pushed = Arc::new(AtomicUsize::new(0));
    let mut handles = vec![];

    for tid in 0..NUM_THREADS {
        let q = q.clone();
        let popped = popped.clone();
        let pushed = pushed.clone();
        handles.push(thread::spawn(move || {
            let mut rng = rand::thread_rng();
            let mut next_seq = 0;
            for _ in 0..ITERATIONS {
                if rng.gen_bool(0.5) {
                    q.push((tid, next_seq));
                    next_seq += 1;
                    pushed.fetch_add(1, Ordering::Relaxed);
                } else if let Some((vtid, vseq)) = q.pop() {
                    // A torn or recycled-too-early node would surface as
                    // an out-of-range pair here.
                    assert!(vtid < NUM_THREADS);
                    assert!(vseq < ITERATIONS);
                    popped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    // Drain the rest and balance the books.
    let mut drained = 0;
    while q.pop().is_some() {
        drained += 1;
    }
    assert_eq!(
        popped.load(Ordering::Relaxed) + drained,
        pushed.load(Ordering::Relaxed)
    );
}

struct CountDrops {
    live: Arc<AtomicUsize>,
}

impl CountDrops {
    fn new(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::Relaxed);
        Self { live: live.clone() }
    }
}

impl Drop for CountDrops {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Dropping a pooled queue releases every value, even with nodes cycling
/// through the free list.
#[test]
#[cfg_attr(miri, ignore)]
fn test_pooled_queue_value_accounting() {
    let live = Arc::new(AtomicUsize::new(0));
    {
        let q = Arc::new(Queue::with_pool());
        let mut handles = vec![];
        for _ in 0..4 {
            let q = q.clone();
            let live = live.clone();
            handles.push(thread::spawn(move || {
                for i in 0..5_000 {
                    q.push(CountDrops::new(&live));
                    if i % 3 == 0 {
                        drop(q.pop());
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
    assert_eq!(live.load(Ordering::Relaxed), 0);
}
