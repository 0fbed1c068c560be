//! Typed object containers
//!
//! A [`TypedContainer`] holds every live object of one (space, type)
//! pair, uniquely indexed by primary id and, when the type declares one,
//! by a secondary unique key. The container also owns that type's undo
//! stack: every mutation made while a session level is open records the
//! reverse operation into the top level.
//!
//! The engine stores containers behind the object-safe [`AnyContainer`]
//! seam so that session transitions and lifecycle operations fan out
//! over heterogeneous types in registration order.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

use chainstate_core::{ChainstateError, ObjectId, ObjectType, Result};
use chainstate_storage::{BatchOp, ColdStore};

use crate::session::ContainerSession;
use crate::undo::UndoState;

/// Unique-by-id collection of one object type, with its undo stack.
pub struct TypedContainer<T: ObjectType> {
    objects: BTreeMap<ObjectId, T>,
    by_key: BTreeMap<T::Key, ObjectId>,
    next_id: ObjectId,
    stack: VecDeque<UndoState<T>>,
    revision: i64,
    max_undo_depth: usize,
}

impl<T: ObjectType> TypedContainer<T> {
    /// An empty container. `max_undo_depth` bounds the undo stack;
    /// zero means unbounded.
    pub fn new(max_undo_depth: usize) -> Self {
        Self {
            objects: BTreeMap::new(),
            by_key: BTreeMap::new(),
            next_id: T::first_id(),
            stack: VecDeque::new(),
            revision: 0,
            max_undo_depth,
        }
    }

    /// Allocate `next_id`, run `build` to populate the remaining
    /// fields, and insert under the uniqueness checks.
    ///
    /// On `UniquenessViolation` neither `next_id` nor the undo state is
    /// touched.
    pub fn emplace(&mut self, build: impl FnOnce(&mut T)) -> Result<&T> {
        let id = self.next_id;
        let mut obj = T::default();
        obj.assign_id(id);
        build(&mut obj);
        if obj.id() != id {
            return Err(ChainstateError::invariant(format!(
                "builder reassigned id {id} to {}",
                obj.id()
            )));
        }
        if self.objects.contains_key(&id) {
            return Err(ChainstateError::uniqueness(id, "primary id already present"));
        }
        let key = obj.unique_key();
        if let Some(k) = &key {
            if let Some(owner) = self.by_key.get(k) {
                return Err(ChainstateError::uniqueness(
                    id,
                    format!("key {k:?} already owned by {owner}"),
                ));
            }
        }
        let next = id.next()?;

        if let Some(head) = self.stack.back_mut() {
            head.new_ids.insert(id);
        }
        if let Some(k) = key {
            self.by_key.insert(k, id);
        }
        self.objects.insert(id, obj);
        self.next_id = next;
        self.objects
            .get(&id)
            .ok_or_else(|| ChainstateError::invariant("freshly inserted object vanished"))
    }

    /// Apply `mutate` to the object under `id`.
    ///
    /// The pre-image is snapshotted into the open session level first
    /// (unless the object was created or already snapshotted at this
    /// level). The mutation runs on a copy: if the result would violate
    /// a uniqueness constraint the container is left untouched, and the
    /// retained snapshot still equals the live value.
    pub fn modify(&mut self, id: ObjectId, mutate: impl FnOnce(&mut T)) -> Result<()> {
        let current = self
            .objects
            .get(&id)
            .cloned()
            .ok_or_else(|| ChainstateError::not_found(id))?;

        if let Some(head) = self.stack.back_mut() {
            if !head.new_ids.contains(&id) && !head.old_values.contains_key(&id) {
                head.old_values.insert(id, current.clone());
            }
        }

        let mut updated = current.clone();
        mutate(&mut updated);
        if updated.id() != id {
            return Err(ChainstateError::invariant(format!(
                "mutation changed id {id} to {}",
                updated.id()
            )));
        }

        let old_key = current.unique_key();
        let new_key = updated.unique_key();
        if let Some(k) = &new_key {
            if let Some(owner) = self.by_key.get(k) {
                if *owner != id {
                    return Err(ChainstateError::uniqueness(
                        id,
                        format!("key {k:?} already owned by {owner}"),
                    ));
                }
            }
        }

        if old_key != new_key {
            if let Some(k) = &old_key {
                self.by_key.remove(k);
            }
            if let Some(k) = new_key {
                self.by_key.insert(k, id);
            }
        }
        self.objects.insert(id, updated);
        Ok(())
    }

    /// Erase the object under `id`, recording enough to restore it.
    ///
    /// Removing an object created at the current level nets out: the id
    /// simply leaves `new_ids` and no snapshot is kept.
    pub fn remove(&mut self, id: ObjectId) -> Result<()> {
        let obj = self
            .objects
            .remove(&id)
            .ok_or_else(|| ChainstateError::not_found(id))?;
        if let Some(k) = obj.unique_key() {
            self.by_key.remove(&k);
        }
        if let Some(head) = self.stack.back_mut() {
            if head.new_ids.remove(&id) {
                // created and destroyed within the level
            } else if let Some(snapshot) = head.old_values.remove(&id) {
                head.removed.insert(id, snapshot);
            } else if !head.removed.contains_key(&id) {
                head.removed.insert(id, obj);
            }
        }
        Ok(())
    }

    /// Point lookup by primary id.
    pub fn find(&self, id: ObjectId) -> Option<&T> {
        self.objects.get(&id)
    }

    /// Point lookup by primary id, failing when absent.
    pub fn get(&self, id: ObjectId) -> Result<&T> {
        self.find(id).ok_or_else(|| ChainstateError::not_found(id))
    }

    /// Point lookup by secondary unique key.
    pub fn find_by_key(&self, key: &T::Key) -> Option<&T> {
        self.by_key.get(key).and_then(|id| self.objects.get(id))
    }

    /// Point lookup by secondary unique key, failing when absent.
    pub fn get_by_key(&self, key: &T::Key) -> Result<&T> {
        self.find_by_key(key)
            .ok_or_else(|| ChainstateError::not_found_key(key))
    }

    /// Visit every live object in ascending id order.
    pub fn inspect(&self, mut visitor: impl FnMut(&T)) {
        for obj in self.objects.values() {
            visitor(obj);
        }
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the container holds no live objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// The identifier the next `emplace` will assign.
    pub fn next_id(&self) -> ObjectId {
        self.next_id
    }

    /// Current revision. Incremented per opened level, decremented per
    /// undo or squash.
    pub fn revision(&self) -> i64 {
        self.revision
    }

    /// Number of open undo levels.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Open a scoped session on this container alone. With
    /// `enabled = false` the handle is inert and every transition is a
    /// no-op.
    pub fn start_undo_session(&mut self, enabled: bool) -> ContainerSession<'_, T> {
        if !enabled {
            return ContainerSession::inert(self);
        }
        if self.at_bound() {
            // Oldest level falls off: its reversibility is gone, which
            // is an implicit commit of that level.
            self.stack.pop_front();
        }
        self.push_new_level();
        let revision = self.revision;
        ContainerSession::active(self, revision)
    }

    fn at_bound(&self) -> bool {
        self.max_undo_depth > 0 && self.stack.len() >= self.max_undo_depth
    }

    fn push_new_level(&mut self) {
        self.revision += 1;
        self.stack
            .push_back(UndoState::new(self.next_id, self.revision));
    }

    /// Reverse and discard the top undo level. A no-op when no level is
    /// open. Any failure partway leaves the container in an unspecified
    /// state; the caller must treat it as fatal.
    pub fn undo(&mut self) -> Result<()> {
        let Some(state) = self.stack.pop_back() else {
            return Ok(());
        };

        // Unhook the secondary keys of every object this level touched
        // before restoring anything. A restored key may still be held
        // by another touched object (legal when a key migrated between
        // objects during the session), so repairing the index entry by
        // entry would see collisions that are not corruption.
        for id in state.old_values.keys().chain(state.new_ids.iter()) {
            let live = self.objects.get(id).ok_or_else(|| {
                ChainstateError::invariant(format!("undo log references missing object {id}"))
            })?;
            if let Some(k) = live.unique_key() {
                self.by_key.remove(&k);
            }
        }

        let restored: Vec<ObjectId> = state.old_values.keys().copied().collect();
        for (id, snapshot) in state.old_values {
            self.objects.insert(id, snapshot);
        }

        for id in state.new_ids {
            if self.objects.remove(&id).is_none() {
                return Err(ChainstateError::invariant(format!(
                    "undo log references missing creation {id}"
                )));
            }
        }

        self.next_id = state.old_next_id;

        let mut reinserted = Vec::with_capacity(state.removed.len());
        for (id, snapshot) in state.removed {
            if self.objects.insert(id, snapshot).is_some() {
                return Err(ChainstateError::invariant(format!(
                    "undo reinsertion of {id} collides with a live object"
                )));
            }
            reinserted.push(id);
        }

        // With every object back in place, reindex the restored set. A
        // collision now is real corruption: two objects carried the
        // same key before the level opened.
        for id in restored.into_iter().chain(reinserted) {
            let obj = self.objects.get(&id).ok_or_else(|| {
                ChainstateError::invariant(format!("restored object {id} vanished"))
            })?;
            if let Some(k) = obj.unique_key() {
                if self.by_key.get(&k).is_some_and(|owner| *owner != id) {
                    return Err(ChainstateError::invariant(format!(
                        "undo restored a duplicate key {k:?} for {id}"
                    )));
                }
                self.by_key.insert(k, id);
            }
        }

        self.revision -= 1;
        Ok(())
    }

    /// Merge the top undo level into its parent and discard it. With a
    /// single open level this commits that level; with none it is a
    /// no-op.
    pub fn squash(&mut self) -> Result<()> {
        let Some(top) = self.stack.pop_back() else {
            return Ok(());
        };
        if let Some(parent) = self.stack.back_mut() {
            top.merge_into(parent)?;
        }
        self.revision -= 1;
        Ok(())
    }

    /// Discard reversibility of the top level: pop it without applying.
    /// The revision is not lowered; the level's changes remain part of
    /// the committed history.
    pub fn commit(&mut self) {
        self.stack.pop_back();
    }

    /// Discard reversibility of every level with `revision <= given`,
    /// oldest first.
    pub fn commit_through(&mut self, revision: i64) {
        while self
            .stack
            .front()
            .is_some_and(|level| level.revision <= revision)
        {
            self.stack.pop_front();
        }
    }

    /// Reverse every open level, newest first.
    pub fn undo_all(&mut self) -> Result<()> {
        while !self.stack.is_empty() {
            self.undo()?;
        }
        Ok(())
    }

    /// Set the revision counter. Forbidden while any undo level exists.
    pub fn set_revision(&mut self, revision: u64) -> Result<()> {
        if !self.stack.is_empty() {
            return Err(ChainstateError::invariant(
                "cannot set revision while an undo stack exists",
            ));
        }
        self.revision = revision as i64;
        Ok(())
    }

    /// Insert an object deserialized from cold storage. Keeps
    /// `next_id` above every loaded instance; records nothing in the
    /// undo log.
    pub(crate) fn insert_loaded(&mut self, obj: T) -> Result<()> {
        let id = obj.id();
        if id.space_type() != T::space_type() {
            return Err(ChainstateError::invariant(format!(
                "loaded object {id} does not belong to this container"
            )));
        }
        if self.objects.contains_key(&id) {
            return Err(ChainstateError::uniqueness(id, "primary id already present"));
        }
        if let Some(k) = obj.unique_key() {
            if let Some(owner) = self.by_key.get(&k) {
                return Err(ChainstateError::uniqueness(
                    id,
                    format!("key {k:?} already owned by {owner}"),
                ));
            }
            self.by_key.insert(k, id);
        }
        if id >= self.next_id {
            self.next_id = id.next()?;
        }
        self.objects.insert(id, obj);
        Ok(())
    }

    /// Raise `next_id` to a persisted value. Lowering is rejected: the
    /// allocator never goes backwards except through undo.
    pub(crate) fn restore_next_id(&mut self, id: ObjectId) -> Result<()> {
        if id.space_type() != T::space_type() {
            return Err(ChainstateError::invariant(format!(
                "persisted next_id {id} does not belong to this container"
            )));
        }
        if id > self.next_id {
            self.next_id = id;
        }
        Ok(())
    }
}

/// Object-safe view of a [`TypedContainer`], used by the engine to fan
/// operations across heterogeneous containers in registration order.
pub(crate) trait AnyContainer: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn space_type(&self) -> u16;
    /// Flush the net effect of the oldest level to the cold store when
    /// the next [`AnyContainer::begin_level`] would discard it. Touches
    /// no in-memory state, so a failure leaves the stack as it was.
    fn evict_for_new_level(&mut self, store: Option<&mut dyn ColdStore>) -> Result<()>;
    /// Push a fresh undo level, discarding the oldest level when the
    /// stack is at its bound. Returns the new revision.
    fn begin_level(&mut self) -> i64;
    fn undo(&mut self) -> Result<()>;
    fn squash(&mut self) -> Result<()>;
    fn commit_through(&mut self, revision: i64);
    fn undo_all(&mut self) -> Result<()>;
    fn revision(&self) -> i64;
    fn set_revision(&mut self, revision: u64) -> Result<()>;
    fn stack_depth(&self) -> usize;
    fn next_id(&self) -> ObjectId;
    fn remove_by_id(&mut self, id: ObjectId) -> Result<()>;
    fn load_from(&mut self, store: &dyn ColdStore) -> Result<()>;
    fn restore_next_id(&mut self, id: ObjectId) -> Result<()>;
    fn export_to(&self, out: &mut Vec<BatchOp>) -> Result<()>;
    fn collect_ids(&self, out: &mut BTreeSet<ObjectId>);
}

impl<T: ObjectType> AnyContainer for TypedContainer<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn space_type(&self) -> u16 {
        T::space_type()
    }

    fn evict_for_new_level(&mut self, store: Option<&mut dyn ColdStore>) -> Result<()> {
        if !self.at_bound() {
            return Ok(());
        }
        let (Some(store), Some(oldest)) = (store, self.stack.front()) else {
            return Ok(());
        };
        // The level about to fall off becomes permanent; flush its net
        // effect so the cold store stays a superset of what is no
        // longer reversible.
        let mut ops = Vec::new();
        for id in oldest.touched_ids() {
            match self.objects.get(&id) {
                Some(obj) => ops.push(BatchOp::Put(id, bincode::serialize(obj)?)),
                None => ops.push(BatchOp::Delete(id)),
            }
        }
        if !ops.is_empty() {
            store.apply_batch(ops)?;
        }
        debug!(
            target: "chainstate::engine",
            space_type = T::space_type(),
            revision = oldest.revision,
            "undo stack at bound, flushed oldest level to the cold store"
        );
        Ok(())
    }

    fn begin_level(&mut self) -> i64 {
        if self.at_bound() {
            self.stack.pop_front();
        }
        self.push_new_level();
        self.revision
    }

    fn undo(&mut self) -> Result<()> {
        TypedContainer::undo(self)
    }

    fn squash(&mut self) -> Result<()> {
        TypedContainer::squash(self)
    }

    fn commit_through(&mut self, revision: i64) {
        TypedContainer::commit_through(self, revision)
    }

    fn undo_all(&mut self) -> Result<()> {
        TypedContainer::undo_all(self)
    }

    fn revision(&self) -> i64 {
        TypedContainer::revision(self)
    }

    fn set_revision(&mut self, revision: u64) -> Result<()> {
        TypedContainer::set_revision(self, revision)
    }

    fn stack_depth(&self) -> usize {
        TypedContainer::stack_depth(self)
    }

    fn next_id(&self) -> ObjectId {
        TypedContainer::next_id(self)
    }

    fn remove_by_id(&mut self, id: ObjectId) -> Result<()> {
        TypedContainer::remove(self, id)
    }

    fn load_from(&mut self, store: &dyn ColdStore) -> Result<()> {
        let (lo, hi) = ObjectId::partition(T::space_type());
        let mut loaded = 0usize;
        store.iter_range(lo, hi, &mut |id, bytes| {
            let obj: T = bincode::deserialize(bytes)?;
            if obj.id() != id {
                return Err(ChainstateError::invariant(format!(
                    "object stored under {id} decodes with id {}",
                    obj.id()
                )));
            }
            self.insert_loaded(obj)?;
            loaded += 1;
            Ok(())
        })?;
        if loaded > 0 {
            debug!(
                target: "chainstate::engine",
                space_type = T::space_type(),
                loaded,
                "loaded container from cold store"
            );
        }
        Ok(())
    }

    fn restore_next_id(&mut self, id: ObjectId) -> Result<()> {
        TypedContainer::restore_next_id(self, id)
    }

    fn export_to(&self, out: &mut Vec<BatchOp>) -> Result<()> {
        for (id, obj) in &self.objects {
            out.push(BatchOp::Put(*id, bincode::serialize(obj)?));
        }
        Ok(())
    }

    fn collect_ids(&self, out: &mut BTreeSet<ObjectId>) {
        out.extend(self.objects.keys().copied());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: ObjectId,
        name: String,
        balance: i64,
    }

    impl ObjectType for Account {
        const SPACE_ID: u8 = 1;
        const TYPE_ID: u8 = 1;
        type Key = String;

        fn id(&self) -> ObjectId {
            self.id
        }

        fn assign_id(&mut self, id: ObjectId) {
            self.id = id;
        }

        fn unique_key(&self) -> Option<String> {
            Some(self.name.clone())
        }
    }

    fn oid(instance: u64) -> ObjectId {
        ObjectId::new(1, 1, instance)
    }

    fn fresh() -> TypedContainer<Account> {
        TypedContainer::new(0)
    }

    fn create(container: &mut TypedContainer<Account>, name: &str, balance: i64) -> ObjectId {
        container
            .emplace(|a| {
                a.name = name.to_string();
                a.balance = balance;
            })
            .unwrap()
            .id()
    }

    #[test]
    fn emplace_assigns_sequential_ids() {
        let mut c = fresh();
        assert_eq!(create(&mut c, "a", 1), oid(0));
        assert_eq!(create(&mut c, "b", 2), oid(1));
        assert_eq!(c.next_id(), oid(2));
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn emplace_duplicate_key_leaves_next_id_alone() {
        let mut c = fresh();
        create(&mut c, "a", 1);
        let err = c
            .emplace(|acct| {
                acct.name = "a".to_string();
            })
            .unwrap_err();
        assert!(matches!(err, ChainstateError::UniquenessViolation { .. }));
        assert_eq!(c.next_id(), oid(1));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn lookups_by_id_and_key() {
        let mut c = fresh();
        let id = create(&mut c, "alice", 7);
        assert_eq!(c.get(id).unwrap().balance, 7);
        assert_eq!(c.find_by_key(&"alice".to_string()).unwrap().id(), id);
        assert!(c.find(oid(99)).is_none());
        assert!(c.get_by_key(&"bob".to_string()).is_err());
    }

    #[test]
    fn modify_reindexes_changed_keys() {
        let mut c = fresh();
        let id = create(&mut c, "alice", 7);
        c.modify(id, |a| a.name = "carol".to_string()).unwrap();
        assert!(c.find_by_key(&"alice".to_string()).is_none());
        assert_eq!(c.find_by_key(&"carol".to_string()).unwrap().id(), id);
    }

    #[test]
    fn modify_uniqueness_failure_reverts() {
        let mut c = fresh();
        create(&mut c, "alice", 1);
        let bob = create(&mut c, "bob", 2);
        let err = c
            .modify(bob, |a| a.name = "alice".to_string())
            .unwrap_err();
        assert!(matches!(err, ChainstateError::UniquenessViolation { .. }));
        assert_eq!(c.get(bob).unwrap().name, "bob");
        assert_eq!(c.find_by_key(&"bob".to_string()).unwrap().id(), bob);
    }

    #[test]
    fn undo_restores_modified_and_removed_objects() {
        let mut c = fresh();
        let a = create(&mut c, "alice", 10);
        let b = create(&mut c, "bob", 20);

        let session = c.start_undo_session(true);
        session.push();
        c.modify(a, |acct| acct.balance = 99).unwrap();
        c.remove(b).unwrap();
        let d = create(&mut c, "dora", 30);
        assert_eq!(d, oid(2));

        c.undo().unwrap();
        assert_eq!(c.get(a).unwrap().balance, 10);
        assert_eq!(c.get(b).unwrap().name, "bob");
        assert!(c.find(d).is_none());
        assert_eq!(c.next_id(), oid(2));
        assert_eq!(c.stack_depth(), 0);
    }

    #[test]
    fn undo_restores_a_key_that_migrated_between_objects() {
        let mut c = fresh();
        let a = create(&mut c, "x", 1);
        let b = create(&mut c, "y", 2);

        let session = c.start_undo_session(true);
        session.push();
        c.modify(a, |acct| acct.name = "z".to_string()).unwrap();
        // "x" was vacated above, so b may legally take it.
        c.modify(b, |acct| acct.name = "x".to_string()).unwrap();

        c.undo().unwrap();
        assert_eq!(c.get(a).unwrap().name, "x");
        assert_eq!(c.get(b).unwrap().name, "y");
        assert_eq!(c.find_by_key(&"x".to_string()).unwrap().id(), a);
        assert_eq!(c.find_by_key(&"y".to_string()).unwrap().id(), b);
        assert!(c.find_by_key(&"z".to_string()).is_none());
    }

    #[test]
    fn undo_restores_a_key_taken_from_a_removed_object() {
        let mut c = fresh();
        let a = create(&mut c, "x", 1);
        let b = create(&mut c, "y", 2);

        let session = c.start_undo_session(true);
        session.push();
        c.remove(a).unwrap();
        c.modify(b, |acct| acct.name = "x".to_string()).unwrap();

        c.undo().unwrap();
        assert_eq!(c.get(a).unwrap().name, "x");
        assert_eq!(c.get(b).unwrap().name, "y");
        assert_eq!(c.find_by_key(&"x".to_string()).unwrap().id(), a);
    }

    #[test]
    fn create_then_remove_in_one_level_nets_out() {
        let mut c = fresh();
        let session = c.start_undo_session(true);
        session.push();
        let id = create(&mut c, "temp", 1);
        c.remove(id).unwrap();
        c.undo().unwrap();
        assert!(c.is_empty());
        assert_eq!(c.next_id(), oid(0));
    }

    #[test]
    fn remove_after_modify_restores_pre_image() {
        let mut c = fresh();
        let id = create(&mut c, "alice", 10);
        let session = c.start_undo_session(true);
        session.push();
        c.modify(id, |a| a.balance = 50).unwrap();
        c.remove(id).unwrap();
        c.undo().unwrap();
        assert_eq!(c.get(id).unwrap().balance, 10);
    }

    #[test]
    fn session_drop_rolls_back() {
        let mut c = fresh();
        {
            let mut session = c.start_undo_session(true);
            session
                .container()
                .emplace(|a| {
                    a.name = "ghost".to_string();
                })
                .unwrap();
        }
        assert!(c.is_empty());
        assert_eq!(c.next_id(), oid(0));
        assert_eq!(c.revision(), 0);
    }

    #[test]
    fn revision_tracks_levels() {
        let mut c = fresh();
        assert_eq!(c.revision(), 0);
        c.start_undo_session(true).push();
        assert_eq!(c.revision(), 1);
        c.start_undo_session(true).push();
        assert_eq!(c.revision(), 2);
        c.undo().unwrap();
        assert_eq!(c.revision(), 1);
        c.squash().unwrap();
        assert_eq!(c.revision(), 0);
        assert_eq!(c.stack_depth(), 0);
    }

    #[test]
    fn squash_merges_into_parent() {
        let mut c = fresh();
        let a = create(&mut c, "alice", 10);

        c.start_undo_session(true).push();
        c.modify(a, |acct| acct.balance = 20).unwrap();
        c.start_undo_session(true).push();
        c.modify(a, |acct| acct.balance = 30).unwrap();

        c.squash().unwrap();
        assert_eq!(c.stack_depth(), 1);
        // one undo now reverses both modifications
        c.undo().unwrap();
        assert_eq!(c.get(a).unwrap().balance, 10);
    }

    #[test]
    fn commit_pops_the_top_level_without_applying() {
        let mut c = fresh();
        c.start_undo_session(true).push();
        let id = create(&mut c, "a", 1);
        c.commit();
        assert_eq!(c.stack_depth(), 0);
        assert_eq!(c.revision(), 1);
        // nothing left to reverse
        c.undo().unwrap();
        assert_eq!(c.get(id).unwrap().balance, 1);
    }

    #[test]
    fn commit_through_discards_oldest_levels() {
        let mut c = fresh();
        c.start_undo_session(true).push(); // revision 1
        create(&mut c, "a", 1);
        c.start_undo_session(true).push(); // revision 2
        create(&mut c, "b", 2);

        c.commit_through(1);
        assert_eq!(c.stack_depth(), 1);
        // the remaining level still reverses the second create
        c.undo().unwrap();
        assert_eq!(c.len(), 1);
        assert!(c.find_by_key(&"a".to_string()).is_some());
    }

    #[test]
    fn undo_all_unwinds_everything() {
        let mut c = fresh();
        c.start_undo_session(true).push();
        create(&mut c, "a", 1);
        c.start_undo_session(true).push();
        create(&mut c, "b", 2);
        c.undo_all().unwrap();
        assert!(c.is_empty());
        assert_eq!(c.next_id(), oid(0));
        assert_eq!(c.stack_depth(), 0);
    }

    #[test]
    fn set_revision_requires_empty_stack() {
        let mut c = fresh();
        c.start_undo_session(true).push();
        assert!(c.set_revision(5).is_err());
        c.undo().unwrap();
        c.set_revision(5).unwrap();
        assert_eq!(c.revision(), 5);
    }

    #[test]
    fn bounded_stack_discards_oldest() {
        let mut c: TypedContainer<Account> = TypedContainer::new(2);
        c.start_undo_session(true).push();
        create(&mut c, "a", 1);
        c.start_undo_session(true).push();
        create(&mut c, "b", 2);
        c.start_undo_session(true).push(); // evicts the first level
        create(&mut c, "c", 3);
        assert_eq!(c.stack_depth(), 2);

        c.undo_all().unwrap();
        // the first create is no longer reversible
        assert_eq!(c.len(), 1);
        assert!(c.find_by_key(&"a".to_string()).is_some());
    }

    #[test]
    fn disabled_session_tracks_nothing() {
        let mut c = fresh();
        {
            let mut session = c.start_undo_session(false);
            assert_eq!(session.revision(), -1);
            session
                .container()
                .emplace(|a| {
                    a.name = "kept".to_string();
                })
                .unwrap();
        }
        assert_eq!(c.len(), 1);
        assert_eq!(c.stack_depth(), 0);
    }

    #[test]
    fn mutations_without_any_session_are_permanent() {
        let mut c = fresh();
        let id = create(&mut c, "a", 1);
        c.modify(id, |a| a.balance = 2).unwrap();
        assert_eq!(c.stack_depth(), 0);
        // undo with no open level is a no-op
        c.undo().unwrap();
        assert_eq!(c.get(id).unwrap().balance, 2);
    }
}
