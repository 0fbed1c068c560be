//! Process-wide registry of write-opened data directories
//!
//! The advisory file lock guards against other processes; this registry
//! guards against a second writer inside the same process, where taking
//! the same flock twice would silently succeed.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chainstate_core::{ChainstateError, Result};

static OPEN_DATABASES: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Claim a canonical data directory for writing.
pub(crate) fn acquire(path: &Path) -> Result<()> {
    let mut open = OPEN_DATABASES.lock();
    if !open.insert(path.to_path_buf()) {
        return Err(ChainstateError::open_failed(format!(
            "database at {} is already open for writing in this process",
            path.display()
        )));
    }
    Ok(())
}

/// Release a claim taken by [`acquire`].
pub(crate) fn release(path: &Path) {
    OPEN_DATABASES.lock().remove(path);
}
