//! Lock-policy metadata persisted next to the object heap
//!
//! `shared_memory.meta` carries the lock-acquisition policy the writer
//! runs with, so cooperating read-only processes agree on timeouts and
//! the rotation knob. The writer rewrites the record on every open; the
//! same file doubles as the advisory-lock target that binds writer
//! uniqueness per data directory.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use chainstate_core::Result;

/// File name of the metadata record in the data directory.
pub const SHARED_MEMORY_META: &str = "shared_memory.meta";

/// Serialized lock policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRecord {
    /// Per-attempt read timeout in microseconds.
    pub read_timeout_micros: u64,
    /// Read retry budget.
    pub read_retries: u32,
    /// Per-attempt write timeout in microseconds.
    pub write_timeout_micros: u64,
    /// Write retry budget.
    pub write_retries: u32,
    /// Whether starved writers abandon readers.
    pub rotate_on_write_timeout: bool,
}

/// Write the metadata record to `dir/shared_memory.meta`.
pub fn write_meta(dir: &Path, record: &MetaRecord) -> Result<()> {
    let bytes = bincode::serialize(record)?;
    fs::write(dir.join(SHARED_MEMORY_META), bytes)?;
    Ok(())
}

/// Read the metadata record, if the file exists and decodes.
pub fn read_meta(dir: &Path) -> Result<Option<MetaRecord>> {
    let path = dir.join(SHARED_MEMORY_META);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    if bytes.is_empty() {
        // A writer may have created the file for locking before writing
        // the record.
        return Ok(None);
    }
    Ok(Some(bincode::deserialize(&bytes)?))
}
