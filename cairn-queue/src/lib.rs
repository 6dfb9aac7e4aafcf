//! Lock-free FIFO queue for Cairn.
//!
//! ## Features
//!
//! - `Queue`: Unbounded MPMC queue (Michael–Scott, hazard-pointer backed).
//! - Optional node pool: recycles dequeued nodes through a lock-free free
//!   list (`Queue::with_pool`).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cairn_queue::Queue;
//!
//! let q = Queue::new();
//! q.push("job");
//! assert_eq!(q.pop(), Some("job"));
//! assert_eq!(q.pop(), None);
//! ```

#![warn(missing_docs)]

mod pool;
mod queue;

pub use queue::Queue;
