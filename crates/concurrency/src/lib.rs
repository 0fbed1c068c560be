//! Lock management for the chainstate engine
//!
//! Implements the parallel-readers/single-writer scheduling model:
//! every externally invoked engine operation runs inside
//! [`LockManager::with_read_lock`] or [`LockManager::with_write_lock`],
//! which bound acquisition with a timeout and retry budget.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod lock;

pub use lock::{LockManager, LockPolicy};
