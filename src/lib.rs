//! Cairn: hazard-pointer based safe memory reclamation
//!
//! Cairn lets many threads traverse shared linked structures with plain
//! pointer loads while other threads unlink and free nodes from the same
//! structures, without ever freeing a node a reader still holds.
//!
//! # How it works
//!
//! - **Publish**: before dereferencing, a reader writes the pointer into
//!   one of its thread's hazard slots and re-verifies the source.
//! - **Retire**: an unlinker hands removed nodes to its thread's retirement
//!   queue instead of freeing them.
//! - **Scan**: once the queue crosses a threshold, the retiring thread
//!   scans every slot of every thread and frees exactly the retired nodes
//!   nobody published.
//!
//! Threads bind to a hazard record lazily and hand it back automatically
//! on exit; records themselves live for the whole process and are reused.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::atomic::{AtomicPtr, Ordering};
//! use cairn::HazardArray;
//!
//! let shared = AtomicPtr::new(Box::into_raw(Box::new(42u64)));
//!
//! let array = HazardArray::<1>::new();
//! let mut hp = array.hazard_ptr::<u64>();
//! let p = hp.protect(&shared);
//! // Safe: the object cannot be freed while the slot publishes it.
//! assert_eq!(unsafe { *p }, 42);
//!
//! // Unlink, then retire; destruction is deferred past every hazard.
//! shared.store(std::ptr::null_mut(), Ordering::SeqCst);
//! unsafe { hp.retire() };
//! ```

#![warn(missing_docs)]

mod guard;
mod marked;
mod record;
mod registry;
mod retired;
pub mod utils;

pub use guard::{HazardArray, HazardPtr};
pub use marked::{AtomicMarkedPtr, MarkedPtr};
pub use record::{FLUSH_THRESHOLD, SLOTS_PER_RECORD};
pub use retired::DeleterFn;
