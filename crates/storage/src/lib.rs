//! Cold storage for the chainstate engine
//!
//! The engine holds all live objects in memory; this crate supplies the
//! keyed byte store it evicts to and reloads from:
//! - [`ColdStore`]: the storage contract (point ops, range scans, and an
//!   atomic batch variant)
//! - [`MemoryStore`]: heap-backed implementation for tests and ephemeral
//!   engines
//! - [`SnapshotFile`]: file-backed implementation over
//!   `shared_memory.bin`, with an environment fingerprint in the header
//!   and a CRC per record
//! - lock-policy metadata persisted in `shared_memory.meta`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod fingerprint;
pub mod meta;
pub mod snapshot;
pub mod store;

pub use fingerprint::EnvironmentFingerprint;
pub use meta::{read_meta, write_meta, MetaRecord, SHARED_MEMORY_META};
pub use snapshot::{wipe_dir, SnapshotFile, SHARED_MEMORY_BIN};
pub use store::{BatchOp, ColdStore, MemoryStore};
