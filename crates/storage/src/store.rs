//! The cold-store contract and the in-memory implementation

use std::collections::BTreeMap;

use chainstate_core::{ObjectId, Result};

/// One operation of an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite the value under `id`.
    Put(ObjectId, Vec<u8>),
    /// Remove the value under `id`, if present.
    Delete(ObjectId),
}

/// Keyed byte store used for cold storage of serialized objects.
///
/// Keys are primary identifiers; values are opaque serialized objects.
/// The engine invokes this only at open, flush, wipe, and when the undo
/// stack bound forces eviction of its oldest level.
pub trait ColdStore: Send + Sync {
    /// Point lookup. `Ok(None)` when the key is absent.
    fn get(&self, id: ObjectId) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite one value.
    fn put(&mut self, id: ObjectId, bytes: Vec<u8>) -> Result<()>;

    /// Remove one value. Removing an absent key is not an error.
    fn delete(&mut self, id: ObjectId) -> Result<()>;

    /// Visit every entry with `lo <= id <= hi` in ascending id order.
    fn iter_range(
        &self,
        lo: ObjectId,
        hi: ObjectId,
        visit: &mut dyn FnMut(ObjectId, &[u8]) -> Result<()>,
    ) -> Result<()>;

    /// Apply a batch of operations atomically: either every operation
    /// becomes visible or none does.
    fn apply_batch(&mut self, ops: Vec<BatchOp>) -> Result<()>;

    /// Make all applied operations durable.
    fn flush(&mut self) -> Result<()>;
}

/// Heap-backed [`ColdStore`] with no durability, for tests and
/// ephemeral engines.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<ObjectId, Vec<u8>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ColdStore for MemoryStore {
    fn get(&self, id: ObjectId) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(&id).cloned())
    }

    fn put(&mut self, id: ObjectId, bytes: Vec<u8>) -> Result<()> {
        self.entries.insert(id, bytes);
        Ok(())
    }

    fn delete(&mut self, id: ObjectId) -> Result<()> {
        self.entries.remove(&id);
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
        // In-memory application cannot fail partway, so sequential
        // application is already atomic.
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
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
