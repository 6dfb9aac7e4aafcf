//! Two threads ping-ponging values through one shared lock-free queue.
//!
//! Each thread repeatedly enqueues a locally incremented value and
//! dequeues one back. With a correct queue no dequeue ever comes up empty
//! here, and the final locals sum to threads × iterations.

use cairn_queue::Queue;
use std::sync::{Arc, Barrier};
use std::thread;

fn main() {
    env_logger::init();

    const NUM_THREADS: usize = 2;
    const NUM_LOOP: usize = 10_000_000;

    let queue = Arc::new(Queue::<usize>::with_pool());
    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    let mut handles = vec![];

    for _ in 0..NUM_THREADS {
        let queue = queue.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            let mut element: usize = 0;
            for _ in 0..NUM_LOOP {
                element += 1;
                queue.push(element);
                loop {
                    match queue.pop() {
                        Some(v) => {
                            element = v;
                            break;
                        }
                        None => println!("???"),
                    }
                }
            }
            element
        }));
    }

    let mut sum = 0;
    for (i, handle) in handles.into_iter().enumerate() {
        let element = handle.join().unwrap();
        println!("Thread {}: last dequeued = {}", i, element);
        sum += element;
    }

    println!("Sum: {}", sum);
    if sum == NUM_THREADS * NUM_LOOP {
        println!("OK!");
    }
}
