//! Lock-free sorted list map for Cairn.
//!
//! ## Features
//!
//! - `SortedListMap`: ascending singly-linked list with lock-free
//!   `get`/`insert`/`remove` and a concurrent in-order `for_each`
//!   (Harris–Michael, hazard-pointer backed).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cairn_map::SortedListMap;
//!
//! let map = SortedListMap::new();
//! map.insert(7, "foo");
//! map.insert(3, "bar");
//! map.for_each(|k, v| println!("{k}: {v}")); // 3 first, then 7
//! ```

#![warn(missing_docs)]

mod list;

pub use list::SortedListMap;
