//! The engine facade
//!
//! A [`Database`] owns one [`TypedContainer`] per registered object
//! type, dispatches every operation to the container of the object's
//! (space, type), and fans session transitions across all containers in
//! registration order.
//!
//! ## Scheduling
//!
//! Parallel readers, single writer: queries take the read lock,
//! everything that mutates takes the write lock, and lock acquisition is
//! the only suspension point. Once a lock is held the operation runs to
//! completion.
//!
//! ## Failure model
//!
//! A failed reversal (undo or squash that cannot complete) marks the
//! engine non-operational: every subsequent operation fails with
//! `InvariantViolation` and only `close` and `wipe` remain useful.

use fs2::FileExt;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

use chainstate_concurrency::LockManager;
use chainstate_core::{ChainstateError, ObjectId, ObjectType, Result};
use chainstate_storage::{
    write_meta, BatchOp, ColdStore, MemoryStore, MetaRecord, SnapshotFile, SHARED_MEMORY_META,
};

use crate::config::{Config, OpenMode};
use crate::container::{AnyContainer, TypedContainer};
use crate::registry;
use crate::session::{Session, SessionLevel};

/// Engine state guarded by the lock manager.
pub(crate) struct EngineInner {
    /// Containers in registration order; composite operations fan out
    /// over this list.
    pub(crate) containers: Vec<Box<dyn AnyContainer>>,
    /// Dispatch map from the 16-bit (space, type) key to a slot above.
    pub(crate) slots: HashMap<u16, usize>,
    pub(crate) store: Box<dyn ColdStore>,
    /// Open composite session handles.
    pub(crate) active_sessions: usize,
}

impl EngineInner {
    pub(crate) fn container_at(&mut self, slot: usize) -> &mut dyn AnyContainer {
        self.containers[slot].as_mut()
    }

    fn slot_of(&self, space_type: u16) -> Result<usize> {
        self.slots
            .get(&space_type)
            .copied()
            .ok_or(ChainstateError::UnknownType { space_type })
    }

    fn typed<T: ObjectType>(&self) -> Result<&TypedContainer<T>> {
        let slot = self.slot_of(T::space_type())?;
        self.containers[slot]
            .as_any()
            .downcast_ref::<TypedContainer<T>>()
            .ok_or_else(|| ChainstateError::invariant("container registered under a foreign type"))
    }

    fn typed_mut<T: ObjectType>(&mut self) -> Result<&mut TypedContainer<T>> {
        let slot = self.slot_of(T::space_type())?;
        self.containers[slot]
            .as_any_mut()
            .downcast_mut::<TypedContainer<T>>()
            .ok_or_else(|| ChainstateError::invariant("container registered under a foreign type"))
    }

    fn any_undo_state(&self) -> bool {
        self.containers.iter().any(|c| c.stack_depth() > 0)
    }

    /// Write every live object, each container's `next_id`, and clear
    /// stale records of the registered partitions, as one batch.
    fn flush_store(&mut self) -> Result<()> {
        if self.containers.is_empty() {
            return self.store.flush();
        }

        let mut ops = Vec::new();
        let mut live: BTreeSet<ObjectId> = BTreeSet::new();
        let mut next_ids: BTreeMap<u16, u64> = match self.store.get(ObjectId::NULL)? {
            Some(bytes) => bincode::deserialize(&bytes)?,
            None => BTreeMap::new(),
        };
        for container in &self.containers {
            container.export_to(&mut ops)?;
            container.collect_ids(&mut live);
            next_ids.insert(container.space_type(), container.next_id().raw());
        }
        ops.push(BatchOp::Put(ObjectId::NULL, bincode::serialize(&next_ids)?));

        // Objects removed since the last flush leave stale records
        // behind; sweep only the partitions this engine owns.
        let mut stale = Vec::new();
        for container in &self.containers {
            let (lo, hi) = ObjectId::partition(container.space_type());
            self.store.iter_range(lo, hi, &mut |id, _| {
                if !live.contains(&id) {
                    stale.push(id);
                }
                Ok(())
            })?;
        }
        ops.extend(stale.into_iter().map(BatchOp::Delete));

        self.store.apply_batch(ops)?;
        self.store.flush()
    }
}

/// In-memory, typed, multi-index object store with a stackable undo
/// history.
pub struct Database {
    pub(crate) state: LockManager<EngineInner>,
    poisoned: AtomicBool,
    mode: OpenMode,
    config: Config,
    data_dir: Option<PathBuf>,
    registered_path: Option<PathBuf>,
    _lock_file: Option<File>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open the store under `dir` with the default configuration.
    ///
    /// `size_hint` pre-allocates the backing heap file. Fails with
    /// `OpenFailed` when the directory is absent in read-only mode,
    /// when the heap's environment fingerprint does not match this
    /// build, or when another writer holds the directory.
    pub fn open(dir: impl AsRef<Path>, mode: OpenMode, size_hint: u64) -> Result<Self> {
        Self::open_with_config(dir, mode, size_hint, Config::default())
    }

    /// [`Database::open`] with explicit tunables.
    pub fn open_with_config(
        dir: impl AsRef<Path>,
        mode: OpenMode,
        size_hint: u64,
        config: Config,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.exists() {
            if mode == OpenMode::ReadOnly {
                return Err(ChainstateError::open_failed(format!(
                    "data directory {} not found",
                    dir.display()
                )));
            }
            fs::create_dir_all(dir)?;
        }
        let canonical = dir.canonicalize()?;

        let registered = mode == OpenMode::ReadWrite;
        if registered {
            registry::acquire(&canonical)?;
        }

        match Self::open_store(&canonical, mode, size_hint, &config) {
            Ok((store, lock_file)) => {
                info!(
                    target: "chainstate::db",
                    path = %canonical.display(),
                    mode = ?mode,
                    "opened object database"
                );
                Ok(Self {
                    state: LockManager::new(
                        EngineInner {
                            containers: Vec::new(),
                            slots: HashMap::new(),
                            store,
                            active_sessions: 0,
                        },
                        config.lock_policy,
                    ),
                    poisoned: AtomicBool::new(false),
                    mode,
                    config,
                    data_dir: Some(canonical.clone()),
                    registered_path: registered.then_some(canonical),
                    _lock_file: lock_file,
                })
            }
            Err(e) => {
                if registered {
                    registry::release(&canonical);
                }
                Err(e)
            }
        }
    }

    fn open_store(
        dir: &Path,
        mode: OpenMode,
        size_hint: u64,
        config: &Config,
    ) -> Result<(Box<dyn ColdStore>, Option<File>)> {
        // The metadata file doubles as the advisory-lock target that
        // binds writer uniqueness per data directory.
        let lock_file = if mode == OpenMode::ReadWrite {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(dir.join(SHARED_MEMORY_META))?;
            file.try_lock_exclusive().map_err(|_| {
                ChainstateError::open_failed(format!(
                    "data directory {} is locked by another process",
                    dir.display()
                ))
            })?;
            Some(file)
        } else {
            None
        };

        let store = SnapshotFile::open(dir, size_hint, mode == OpenMode::ReadOnly)?;

        if mode == OpenMode::ReadWrite {
            let policy = config.lock_policy;
            write_meta(
                dir,
                &MetaRecord {
                    read_timeout_micros: policy.read_timeout.as_micros() as u64,
                    read_retries: policy.read_retries,
                    write_timeout_micros: policy.write_timeout.as_micros() as u64,
                    write_retries: policy.write_retries,
                    rotate_on_write_timeout: policy.rotate_on_write_timeout,
                },
            )?;
        }

        Ok((Box::new(store), lock_file))
    }

    /// An engine with no backing files. State is lost on drop.
    pub fn open_ephemeral() -> Self {
        Self::open_ephemeral_with_config(Config::default())
    }

    /// [`Database::open_ephemeral`] with explicit tunables.
    pub fn open_ephemeral_with_config(config: Config) -> Self {
        Self {
            state: LockManager::new(
                EngineInner {
                    containers: Vec::new(),
                    slots: HashMap::new(),
                    store: Box::new(MemoryStore::new()),
                    active_sessions: 0,
                },
                config.lock_policy,
            ),
            poisoned: AtomicBool::new(false),
            mode: OpenMode::ReadWrite,
            config,
            data_dir: None,
            registered_path: None,
            _lock_file: None,
        }
    }

    // ------------------------------------------------------------------
    // Registration and dispatch
    // ------------------------------------------------------------------

    /// Allocate the container for `T` and load any persisted objects of
    /// its partition from the backing store.
    ///
    /// Fails with `DuplicateType` when the (space, type) pair is
    /// already in use, and with `InvariantViolation` while undo
    /// sessions are open.
    pub fn register_type<T: ObjectType>(&self) -> Result<()> {
        self.ensure_operational()?;
        let max_depth = self.config.max_undo_depth;
        self.state.with_write_lock(|inner| {
            if inner.active_sessions > 0 || inner.any_undo_state() {
                return Err(ChainstateError::invariant(
                    "cannot register a type while undo sessions are open",
                ));
            }
            let space_type = T::space_type();
            if space_type == 0 {
                return Err(ChainstateError::invariant(
                    "space 0, type 0 is reserved for the null identifier",
                ));
            }
            if inner.slots.contains_key(&space_type) {
                return Err(ChainstateError::DuplicateType {
                    space: T::SPACE_ID,
                    type_id: T::TYPE_ID,
                });
            }

            let mut container = TypedContainer::<T>::new(max_depth);
            // Late registrations join at the engine's current revision
            // so every container stays in lockstep.
            if let Some(first) = inner.containers.first() {
                container.set_revision(first.revision() as u64)?;
            }
            container.load_from(inner.store.as_ref())?;
            if let Some(bytes) = inner.store.get(ObjectId::NULL)? {
                let next_ids: BTreeMap<u16, u64> = bincode::deserialize(&bytes)?;
                if let Some(raw) = next_ids.get(&space_type) {
                    container.restore_next_id(ObjectId::from_raw(*raw))?;
                }
            }

            let slot = inner.containers.len();
            inner.containers.push(Box::new(container));
            inner.slots.insert(space_type, slot);
            Ok(())
        })
    }

    /// Whether `T` has been registered.
    pub fn has_type<T: ObjectType>(&self) -> Result<bool> {
        self.ensure_operational()?;
        self.state
            .with_read_lock(|inner| Ok(inner.slots.contains_key(&T::space_type())))
    }

    // ------------------------------------------------------------------
    // Mutation API
    // ------------------------------------------------------------------

    /// Build a new object under the next free identifier of `T`'s
    /// partition and return a copy of it.
    pub fn create<T: ObjectType>(&self, build: impl FnOnce(&mut T)) -> Result<T> {
        self.ensure_operational()?;
        self.ensure_writable()?;
        self.state
            .with_write_lock(|inner| inner.typed_mut::<T>()?.emplace(build).map(T::clone))
    }

    /// Mutate the object under `id` in place.
    ///
    /// A [`chainstate_core::TypedId`] converts via
    /// [`chainstate_core::TypedId::object_id`].
    pub fn modify<T: ObjectType>(
        &self,
        id: ObjectId,
        mutate: impl FnOnce(&mut T),
    ) -> Result<()> {
        self.ensure_operational()?;
        self.ensure_writable()?;
        if id.space_type() != T::space_type() {
            return Err(ChainstateError::not_found(id));
        }
        self.state
            .with_write_lock(|inner| inner.typed_mut::<T>()?.modify(id, mutate))
    }

    /// Remove the object under `id`.
    pub fn remove<T: ObjectType>(&self, id: ObjectId) -> Result<()> {
        self.ensure_operational()?;
        self.ensure_writable()?;
        if id.space_type() != T::space_type() {
            return Err(ChainstateError::not_found(id));
        }
        self.state
            .with_write_lock(|inner| inner.typed_mut::<T>()?.remove(id))
    }

    /// Remove by untyped identifier, dispatching on its (space, type).
    pub fn remove_by_id(&self, id: ObjectId) -> Result<()> {
        self.ensure_operational()?;
        self.ensure_writable()?;
        self.state.with_write_lock(|inner| {
            let slot = inner.slot_of(id.space_type())?;
            inner.container_at(slot).remove_by_id(id)
        })
    }

    // ------------------------------------------------------------------
    // Query API
    // ------------------------------------------------------------------

    /// Copy of the object under `id`, or `None` when absent. An id
    /// whose (space, type) tag differs from `T`'s is absent by
    /// definition.
    pub fn find<T: ObjectType>(&self, id: ObjectId) -> Result<Option<T>> {
        self.ensure_operational()?;
        if id.space_type() != T::space_type() {
            return Ok(None);
        }
        self.state
            .with_read_lock(|inner| Ok(inner.typed::<T>()?.find(id).cloned()))
    }

    /// Copy of the object under `id`, failing with `NotFound` when
    /// absent or when the id does not carry `T`'s tag.
    pub fn get<T: ObjectType>(&self, id: ObjectId) -> Result<T> {
        self.ensure_operational()?;
        if id.space_type() != T::space_type() {
            return Err(ChainstateError::not_found(id));
        }
        self.state
            .with_read_lock(|inner| inner.typed::<T>()?.get(id).map(T::clone))
    }

    /// Copy of the object under a secondary unique key.
    pub fn find_by_key<T: ObjectType>(&self, key: &T::Key) -> Result<Option<T>> {
        self.ensure_operational()?;
        self.state
            .with_read_lock(|inner| Ok(inner.typed::<T>()?.find_by_key(key).cloned()))
    }

    /// Like [`Database::find_by_key`], failing with `NotFound` when
    /// absent.
    pub fn get_by_key<T: ObjectType>(&self, key: &T::Key) -> Result<T> {
        self.ensure_operational()?;
        self.state
            .with_read_lock(|inner| inner.typed::<T>()?.get_by_key(key).map(T::clone))
    }

    /// Visit every live object of `T` in ascending id order.
    pub fn inspect<T: ObjectType>(&self, visitor: impl FnMut(&T)) -> Result<()> {
        self.ensure_operational()?;
        self.state.with_read_lock(|inner| {
            inner.typed::<T>()?.inspect(visitor);
            Ok(())
        })
    }

    /// The identifier the next `create` of a `T` will assign.
    pub fn next_id<T: ObjectType>(&self) -> Result<ObjectId> {
        self.ensure_operational()?;
        self.state
            .with_read_lock(|inner| Ok(inner.typed::<T>()?.next_id()))
    }

    // ------------------------------------------------------------------
    // Sessions and global control
    // ------------------------------------------------------------------

    /// Open a composite session covering every registered container.
    pub fn start_session(&self) -> Result<Session<'_>> {
        self.start_session_with(true)
    }

    /// Open a composite session, or an inert handle when `enabled` is
    /// false (every transition a no-op; mutations are untracked).
    pub fn start_session_with(&self, enabled: bool) -> Result<Session<'_>> {
        self.ensure_operational()?;
        self.ensure_writable()?;
        if !enabled {
            return Ok(Session::inert(self));
        }
        let (levels, revision) = self.state.with_write_lock(|inner| {
            // Evictions are the only fallible part of opening a level;
            // run them all before any stack grows, so a failure leaves
            // every container exactly as it was.
            for container in inner.containers.iter_mut() {
                container.evict_for_new_level(Some(inner.store.as_mut()))?;
            }

            let mut levels = Vec::with_capacity(inner.containers.len());
            let mut revision = -1i64;
            for (slot, container) in inner.containers.iter_mut().enumerate() {
                let rev = container.begin_level();
                debug_assert!(revision == -1 || revision == rev);
                if revision == -1 {
                    revision = rev;
                }
                levels.push(SessionLevel { slot, apply: true });
            }
            inner.active_sessions += 1;
            Ok((levels, revision))
        })?;
        Ok(Session::new(self, levels, revision))
    }

    /// Reverse the top undo level of every container.
    pub fn undo(&self) -> Result<()> {
        self.ensure_operational()?;
        self.ensure_writable()?;
        self.fan_out_mut(|container| container.undo())
    }

    /// Merge the top undo level of every container into its parent.
    pub fn squash(&self) -> Result<()> {
        self.ensure_operational()?;
        self.ensure_writable()?;
        self.fan_out_mut(|container| container.squash())
    }

    /// Discard reversibility of every level with revision at or below
    /// the given value.
    pub fn commit(&self, revision: i64) -> Result<()> {
        self.ensure_operational()?;
        self.ensure_writable()?;
        self.state.with_write_lock(|inner| {
            for container in inner.containers.iter_mut() {
                container.commit_through(revision);
            }
            Ok(())
        })
    }

    /// Reverse every open undo level everywhere.
    pub fn undo_all(&self) -> Result<()> {
        self.ensure_operational()?;
        self.ensure_writable()?;
        self.fan_out_mut(|container| container.undo_all())
    }

    /// The current revision: that of the first registered container,
    /// or -1 when no type is registered.
    pub fn revision(&self) -> Result<i64> {
        self.ensure_operational()?;
        self.state.with_read_lock(|inner| {
            Ok(inner
                .containers
                .first()
                .map(|c| c.revision())
                .unwrap_or(-1))
        })
    }

    /// Set the revision counter of every container. Forbidden while
    /// any undo state exists.
    pub fn set_revision(&self, revision: u64) -> Result<()> {
        self.ensure_operational()?;
        self.ensure_writable()?;
        self.state.with_write_lock(|inner| {
            if inner.any_undo_state() {
                return Err(ChainstateError::invariant(
                    "cannot set revision while an undo stack exists",
                ));
            }
            for container in inner.containers.iter_mut() {
                container.set_revision(revision)?;
            }
            Ok(())
        })
    }

    /// Number of open composite session handles.
    pub fn session_depth(&self) -> Result<usize> {
        self.ensure_operational()?;
        self.state.with_read_lock(|inner| Ok(inner.active_sessions))
    }

    /// Deepest undo stack across all containers.
    pub fn undo_stack_depth(&self) -> Result<usize> {
        self.ensure_operational()?;
        self.state.with_read_lock(|inner| {
            Ok(inner
                .containers
                .iter()
                .map(|c| c.stack_depth())
                .max()
                .unwrap_or(0))
        })
    }

    fn fan_out_mut(&self, op: impl Fn(&mut dyn AnyContainer) -> Result<()>) -> Result<()> {
        self.state.with_write_lock(|inner| {
            let mut first_err = None;
            for container in inner.containers.iter_mut() {
                if let Err(e) = op(container.as_mut()) {
                    // Keep going: stopping here would leave the
                    // remaining containers one level deeper than the
                    // ones already reversed.
                    self.poison();
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
            match first_err {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Persist every live object and each container's `next_id` to the
    /// backing store. A no-op for read-only handles.
    pub fn flush(&self) -> Result<()> {
        self.ensure_operational()?;
        if self.mode == OpenMode::ReadOnly {
            return Ok(());
        }
        self.state.with_write_lock(|inner| inner.flush_store())
    }

    /// Flush and release the store. A poisoned engine skips the flush:
    /// its in-memory state is not trustworthy.
    pub fn close(mut self) -> Result<()> {
        let flush_result = if self.is_poisoned() || self.mode == OpenMode::ReadOnly {
            Ok(())
        } else {
            self.flush()
        };
        self.release_registration();
        if let Some(dir) = &self.data_dir {
            info!(target: "chainstate::db", path = %dir.display(), "closed object database");
        }
        flush_result
    }

    /// Delete the backing files of a data directory. The store must
    /// not be open.
    pub fn wipe(dir: impl AsRef<Path>) -> Result<()> {
        chainstate_storage::wipe_dir(dir.as_ref())?;
        info!(
            target: "chainstate::db",
            path = %dir.as_ref().display(),
            "wiped object database"
        );
        Ok(())
    }

    /// Reopen the backing heap with a new pre-allocation size.
    /// Rejected with `ResizeBlocked` while any session is open.
    pub fn resize(&self, new_size: u64) -> Result<()> {
        self.ensure_operational()?;
        self.ensure_writable()?;
        let dir = self
            .data_dir
            .clone()
            .ok_or_else(|| ChainstateError::invariant("ephemeral database has no backing file"))?;
        self.state.with_write_lock(|inner| {
            if inner.active_sessions > 0 || inner.any_undo_state() {
                return Err(ChainstateError::ResizeBlocked);
            }
            inner.flush_store()?;
            inner.store = Box::new(SnapshotFile::open(&dir, new_size, false)?);
            info!(
                target: "chainstate::db",
                path = %dir.display(),
                new_size,
                "resized backing store"
            );
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Failure state
    // ------------------------------------------------------------------

    /// Whether a failed reversal has made the engine non-operational.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    pub(crate) fn poison(&self) {
        if !self.poisoned.swap(true, Ordering::AcqRel) {
            error!(
                target: "chainstate::db",
                "engine entered the non-operational state"
            );
        }
    }

    fn ensure_operational(&self) -> Result<()> {
        if self.is_poisoned() {
            return Err(ChainstateError::invariant(
                "engine is non-operational after a failed reversal",
            ));
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(ChainstateError::ReadOnly);
        }
        Ok(())
    }

    fn release_registration(&mut self) {
        if let Some(path) = self.registered_path.take() {
            registry::release(&path);
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.release_registration();
    }
}
