//! File-backed cold store over `shared_memory.bin`
//!
//! Layout:
//!
//! ```text
//! magic            8 bytes, b"CSHEAP01"
//! fingerprint len  u32 LE
//! fingerprint      bincode(EnvironmentFingerprint)
//! record count     u64 LE
//! records          count x { id: u64 LE, len: u32 LE, crc: u32 LE, bytes }
//! zero padding     up to the size hint, ignored by readers
//! ```
//!
//! The whole data set is held in memory; the file is a snapshot of it.
//! Reads memory-map the file and verify one CRC per record. Writes
//! rewrite the snapshot through a temp file, sync it, and rename it into
//! place, so a crashed flush never leaves a half-written heap behind.

use memmap2::Mmap;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use chainstate_core::{ChainstateError, ObjectId, Result};

use crate::fingerprint::EnvironmentFingerprint;
use crate::meta::SHARED_MEMORY_META;
use crate::store::{BatchOp, ColdStore};

/// File name of the object heap in the data directory.
pub const SHARED_MEMORY_BIN: &str = "shared_memory.bin";

const MAGIC: &[u8; 8] = b"CSHEAP01";

/// File-backed [`ColdStore`] implementation.
#[derive(Debug)]
pub struct SnapshotFile {
    path: PathBuf,
    entries: BTreeMap<ObjectId, Vec<u8>>,
    size_hint: u64,
    read_only: bool,
    dirty: bool,
}

impl SnapshotFile {
    /// Open or create `dir/shared_memory.bin`.
    ///
    /// An existing file must carry the running build's environment
    /// fingerprint; a mismatch fails with `OpenFailed`. In read-only
    /// mode a missing file is `OpenFailed` as well. `size_hint`
    /// pre-allocates the file on the next flush.
    pub fn open(dir: &Path, size_hint: u64, read_only: bool) -> Result<Self> {
        let path = dir.join(SHARED_MEMORY_BIN);
        let mut snapshot = Self {
            path,
            entries: BTreeMap::new(),
            size_hint,
            read_only,
            dirty: false,
        };

        if snapshot.path.exists() {
            snapshot.load()?;
            if !read_only {
                let current_len = fs::metadata(&snapshot.path)?.len();
                if size_hint > current_len {
                    OpenOptions::new()
                        .write(true)
                        .open(&snapshot.path)?
                        .set_len(size_hint)?;
                }
            }
        } else if read_only {
            return Err(ChainstateError::open_failed(format!(
                "object heap not found at {}",
                snapshot.path.display()
            )));
        } else {
            // Materialize the header right away so a concurrent
            // read-only open sees a valid (empty) heap.
            snapshot.dirty = true;
            snapshot.flush_to_disk()?;
        }
        Ok(snapshot)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn load(&mut self) -> Result<()> {
        let file = File::open(&self.path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let buf: &[u8] = &mmap;

        let mut pos = 0usize;
        let magic = take(buf, &mut pos, MAGIC.len())?;
        if magic != MAGIC {
            return Err(ChainstateError::open_failed(format!(
                "{} is not an object heap",
                self.path.display()
            )));
        }

        let fp_len = read_u32(buf, &mut pos)? as usize;
        let fp_bytes = take(buf, &mut pos, fp_len)?;
        let fingerprint: EnvironmentFingerprint = bincode::deserialize(fp_bytes)
            .map_err(|e| ChainstateError::open_failed(format!("bad fingerprint record: {e}")))?;
        let current = EnvironmentFingerprint::current();
        if fingerprint != current {
            return Err(ChainstateError::open_failed(format!(
                "heap written by a different build: file [{fingerprint}], this build [{current}]"
            )));
        }

        let count = read_u64(buf, &mut pos)?;
        for _ in 0..count {
            let id = ObjectId::from_raw(read_u64(buf, &mut pos)?);
            let len = read_u32(buf, &mut pos)? as usize;
            let crc = read_u32(buf, &mut pos)?;
            let bytes = take(buf, &mut pos, len)?;
            if crc32fast::hash(bytes) != crc {
                return Err(ChainstateError::open_failed(format!(
                    "checksum mismatch on record {id}"
                )));
            }
            self.entries.insert(id, bytes.to_vec());
        }

        debug!(
            target: "chainstate::storage",
            path = %self.path.display(),
            records = count,
            "loaded object heap"
        );
        Ok(())
    }

    fn flush_to_disk(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let fp_bytes = bincode::serialize(&EnvironmentFingerprint::current())?;
        let mut out = Vec::with_capacity(64 + self.entries.len() * 32);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&(fp_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&fp_bytes);
        out.extend_from_slice(&(self.entries.len() as u64).to_le_bytes());
        for (id, bytes) in &self.entries {
            out.extend_from_slice(&id.raw().to_le_bytes());
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(&crc32fast::hash(bytes).to_le_bytes());
            out.extend_from_slice(bytes);
        }

        let tmp = self.path.with_extension("bin.tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&out)?;
        if self.size_hint > out.len() as u64 {
            file.set_len(self.size_hint)?;
        }
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;

        self.dirty = false;
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(ChainstateError::ReadOnly);
        }
        Ok(())
    }

    /// Change the pre-allocation hint. Takes effect on the next flush.
    pub fn set_size_hint(&mut self, size_hint: u64) -> Result<()> {
        self.ensure_writable()?;
        if size_hint != self.size_hint {
            self.size_hint = size_hint;
            self.dirty = true;
        }
        Ok(())
    }
}

impl ColdStore for SnapshotFile {
    fn get(&self, id: ObjectId) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(&id).cloned())
    }

    fn put(&mut self, id: ObjectId, bytes: Vec<u8>) -> Result<()> {
        self.ensure_writable()?;
        self.entries.insert(id, bytes);
        self.dirty = true;
        Ok(())
    }

    fn delete(&mut self, id: ObjectId) -> Result<()> {
        self.ensure_writable()?;
        if self.entries.remove(&id).is_some() {
            self.dirty = true;
        }
        Ok(())
    }

    fn iter_range(
        &self,
        lo: ObjectId,
        hi: ObjectId,
        visit: &mut dyn FnMut(ObjectId, &[u8]) -> Result<()>,
    ) -> Result<()> {
        for (id, bytes) in self.entries.range(lo..=hi) {
            visit(*id, bytes)?;
        }
        Ok(())
    }

    fn apply_batch(&mut self, ops: Vec<BatchOp>) -> Result<()> {
        self.ensure_writable()?;
        // Stage in memory first; the snapshot becomes visible to other
        // processes only through the rename in flush_to_disk, which is
        // all-or-nothing.
        for op in ops {
            match op {
                BatchOp::Put(id, bytes) => {
                    self.entries.insert(id, bytes);
                }
                BatchOp::Delete(id) => {
                    self.entries.remove(&id);
                }
            }
        }
        self.dirty = true;
        self.flush_to_disk()
    }

    fn flush(&mut self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.flush_to_disk()
    }
}

/// Delete the heap and metadata files of a data directory.
pub fn wipe_dir(dir: &Path) -> Result<()> {
    for name in [SHARED_MEMORY_BIN, SHARED_MEMORY_META] {
        let path = dir.join(name);
        if path.exists() {
            fs::remove_file(path)?;
        }
    }
    Ok(())
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = pos
        .checked_add(len)
        .filter(|&end| end <= buf.len())
        .ok_or_else(|| ChainstateError::open_failed("truncated object heap"))?;
    let slice = &buf[*pos..end];
    *pos = end;
    Ok(slice)
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32> {
    let bytes = take(buf, pos, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_u64(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let bytes = take(buf, pos, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id(instance: u64) -> ObjectId {
        ObjectId::new(1, 1, instance)
    }

    #[test]
    fn create_flush_reopen_round_trip() {
        let dir = TempDir::new().unwrap();
        {
            let mut snap = SnapshotFile::open(dir.path(), 0, false).unwrap();
            snap.put(id(0), b"alpha".to_vec()).unwrap();
            snap.put(id(1), b"beta".to_vec()).unwrap();
            snap.flush().unwrap();
        }
        let snap = SnapshotFile::open(dir.path(), 0, false).unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.get(id(0)).unwrap(), Some(b"alpha".to_vec()));
        assert_eq!(snap.get(id(1)).unwrap(), Some(b"beta".to_vec()));
    }

    #[test]
    fn read_only_requires_existing_heap() {
        let dir = TempDir::new().unwrap();
        let err = SnapshotFile::open(dir.path(), 0, true).unwrap_err();
        assert!(matches!(err, ChainstateError::OpenFailed { .. }));
    }

    #[test]
    fn read_only_rejects_writes() {
        let dir = TempDir::new().unwrap();
        SnapshotFile::open(dir.path(), 0, false).unwrap();
        let mut snap = SnapshotFile::open(dir.path(), 0, true).unwrap();
        assert!(matches!(
            snap.put(id(0), vec![1]),
            Err(ChainstateError::ReadOnly)
        ));
        assert!(matches!(snap.delete(id(0)), Err(ChainstateError::ReadOnly)));
        // flush on a read-only handle is a no-op, not an error
        snap.flush().unwrap();
    }

    #[test]
    fn fingerprint_mismatch_fails_open() {
        let dir = TempDir::new().unwrap();
        {
            let mut snap = SnapshotFile::open(dir.path(), 0, false).unwrap();
            snap.put(id(0), b"x".to_vec()).unwrap();
            snap.flush().unwrap();
        }

        // Rewrite the header with a foreign fingerprint.
        let mut foreign = EnvironmentFingerprint::current();
        foreign.package_version = "0.0.0-other".to_string();
        let fp_bytes = bincode::serialize(&foreign).unwrap();
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&(fp_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&fp_bytes);
        out.extend_from_slice(&0u64.to_le_bytes());
        fs::write(dir.path().join(SHARED_MEMORY_BIN), out).unwrap();

        let err = SnapshotFile::open(dir.path(), 0, false).unwrap_err();
        match err {
            ChainstateError::OpenFailed { reason } => {
                assert!(reason.contains("different build"), "{reason}");
            }
            other => panic!("expected OpenFailed, got {other}"),
        }
    }

    #[test]
    fn corrupted_record_fails_open() {
        let dir = TempDir::new().unwrap();
        {
            let mut snap = SnapshotFile::open(dir.path(), 0, false).unwrap();
            snap.put(id(0), b"payload-bytes".to_vec()).unwrap();
            snap.flush().unwrap();
        }
        let path = dir.path().join(SHARED_MEMORY_BIN);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let err = SnapshotFile::open(dir.path(), 0, false).unwrap_err();
        match err {
            ChainstateError::OpenFailed { reason } => {
                assert!(reason.contains("checksum"), "{reason}");
            }
            other => panic!("expected OpenFailed, got {other}"),
        }
    }

    #[test]
    fn garbage_file_fails_open() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(SHARED_MEMORY_BIN), b"not a heap").unwrap();
        assert!(matches!(
            SnapshotFile::open(dir.path(), 0, false),
            Err(ChainstateError::OpenFailed { .. })
        ));
    }

    #[test]
    fn size_hint_preallocates() {
        let dir = TempDir::new().unwrap();
        {
            let mut snap = SnapshotFile::open(dir.path(), 4096, false).unwrap();
            snap.put(id(0), b"tiny".to_vec()).unwrap();
            snap.flush().unwrap();
        }
        let len = fs::metadata(dir.path().join(SHARED_MEMORY_BIN))
            .unwrap()
            .len();
        assert_eq!(len, 4096);
        // Trailing padding does not confuse the reader.
        let snap = SnapshotFile::open(dir.path(), 0, false).unwrap();
        assert_eq!(snap.get(id(0)).unwrap(), Some(b"tiny".to_vec()));
    }

    #[test]
    fn wipe_removes_data_files() {
        let dir = TempDir::new().unwrap();
        SnapshotFile::open(dir.path(), 0, false).unwrap();
        fs::write(dir.path().join(SHARED_MEMORY_META), b"meta").unwrap();
        wipe_dir(dir.path()).unwrap();
        assert!(!dir.path().join(SHARED_MEMORY_BIN).exists());
        assert!(!dir.path().join(SHARED_MEMORY_META).exists());
        // Wiping an already-clean directory is fine.
        wipe_dir(dir.path()).unwrap();
    }
}
