//! Per-session change-sets
//!
//! Each open session level is one `UndoState`: enough information to
//! reverse every mutation made through the container while the level was
//! on top of the stack. An object's relationship to a level is one of:
//!
//! - in `new_ids`: created at this level
//! - in `old_values` (was=X): updated at this level, pre-image X
//! - in `removed` (was=X): deleted at this level, last value X
//! - in none of them: untouched
//!
//! The three sets are pairwise disjoint by construction.

use std::collections::{BTreeMap, BTreeSet};

use chainstate_core::{ChainstateError, ObjectId, ObjectType, Result};

pub(crate) struct UndoState<T: ObjectType> {
    pub old_values: BTreeMap<ObjectId, T>,
    pub removed: BTreeMap<ObjectId, T>,
    pub new_ids: BTreeSet<ObjectId>,
    pub old_next_id: ObjectId,
    pub revision: i64,
}

impl<T: ObjectType> UndoState<T> {
    pub fn new(old_next_id: ObjectId, revision: i64) -> Self {
        Self {
            old_values: BTreeMap::new(),
            removed: BTreeMap::new(),
            new_ids: BTreeSet::new(),
            old_next_id,
            revision,
        }
    }

    /// Ids this level recorded anything about, in ascending order.
    pub fn touched_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        let mut ids: BTreeSet<ObjectId> = self.new_ids.clone();
        ids.extend(self.old_values.keys().copied());
        ids.extend(self.removed.keys().copied());
        ids.into_iter()
    }

    /// Merge this level (the top of the stack) into `parent`, the level
    /// directly beneath it. Composing the two must be equivalent to
    /// having performed both under a single session.
    ///
    /// When both levels record information for one id, the parent's
    /// record wins for `old_values` (it is the earlier pre-image) and
    /// the parent's create cancels against this level's delete. The
    /// causally impossible pairings (anything after a delete except
    /// reading nothing, a create over a live id) are fatal: they can
    /// only arise from a corrupted undo log.
    pub fn merge_into(self, parent: &mut UndoState<T>) -> Result<()> {
        for (id, old) in self.old_values {
            if parent.new_ids.contains(&id) {
                // new + upd -> new
                continue;
            }
            if parent.old_values.contains_key(&id) {
                // upd(was=X) + upd(was=Y) -> upd(was=X)
                continue;
            }
            if parent.removed.contains_key(&id) {
                return Err(ChainstateError::invariant(format!(
                    "undo log records an update of {id} after its deletion"
                )));
            }
            // nop + upd(was=Y) -> upd(was=Y)
            parent.old_values.insert(id, old);
        }

        for id in self.new_ids {
            if parent.new_ids.contains(&id)
                || parent.old_values.contains_key(&id)
                || parent.removed.contains_key(&id)
            {
                return Err(ChainstateError::invariant(format!(
                    "undo log records a creation of {id} over a live record"
                )));
            }
            // nop + new -> new
            parent.new_ids.insert(id);
        }

        for (id, snapshot) in self.removed {
            if parent.new_ids.remove(&id) {
                // new + del -> nop
                continue;
            }
            if let Some(pre_image) = parent.old_values.remove(&id) {
                // upd(was=X) + del(was=Y) -> del(was=X)
                parent.removed.insert(id, pre_image);
                continue;
            }
            if parent.removed.contains_key(&id) {
                return Err(ChainstateError::invariant(format!(
                    "undo log records a double deletion of {id}"
                )));
            }
            // nop + del(was=Y) -> del(was=Y)
            parent.removed.insert(id, snapshot);
        }

        // The parent opened first, so its captured next_id stays.
        parent.debug_assert_disjoint();
        Ok(())
    }

    /// The three sets must stay pairwise disjoint. Debug builds verify
    /// it after every merge.
    fn debug_assert_disjoint(&self) {
        debug_assert!(self
            .new_ids
            .iter()
            .all(|id| !self.old_values.contains_key(id) && !self.removed.contains_key(id)));
        debug_assert!(self
            .old_values
            .keys()
            .all(|id| !self.removed.contains_key(id)));
    }
}
