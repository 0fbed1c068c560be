//! Scoped speculative sessions
//!
//! A session is one level of speculative mutation. Exactly one of three
//! transitions may be taken on a handle:
//!
//! - `undo`: reverse the level and pop it
//! - `push`: keep the level on the stack but give up this handle's
//!   reversibility, leaving it for an outer session (or a later global
//!   `undo`) to reach
//! - `squash`: merge the level into its parent
//!
//! A handle dropped without a transition rolls its level back. Handles
//! are move-only; all three transitions consume them.

use tracing::error;

use chainstate_core::{ObjectType, Result};

use crate::container::TypedContainer;
use crate::database::Database;

/// Session over a single [`TypedContainer`], borrowing it exclusively.
///
/// Mutations go through [`ContainerSession::container`] while the
/// handle is alive. Obtained from
/// [`TypedContainer::start_undo_session`]; the engine-level
/// [`Session`] is the composite equivalent across all registered types.
pub struct ContainerSession<'a, T: ObjectType> {
    container: &'a mut TypedContainer<T>,
    apply: bool,
    revision: i64,
}

impl<'a, T: ObjectType> ContainerSession<'a, T> {
    pub(crate) fn active(container: &'a mut TypedContainer<T>, revision: i64) -> Self {
        Self {
            container,
            apply: true,
            revision,
        }
    }

    pub(crate) fn inert(container: &'a mut TypedContainer<T>) -> Self {
        Self {
            container,
            apply: false,
            revision: -1,
        }
    }

    /// The revision assigned to this level, or -1 for an inert handle.
    pub fn revision(&self) -> i64 {
        self.revision
    }

    /// Access the container to perform mutations under this session.
    pub fn container(&mut self) -> &mut TypedContainer<T> {
        self.container
    }

    /// Leave the undo level on the stack and give up reversibility.
    pub fn push(mut self) {
        self.apply = false;
    }

    /// Reverse the level and pop it.
    pub fn undo(mut self) -> Result<()> {
        if !self.apply {
            return Ok(());
        }
        self.apply = false;
        self.container.undo()
    }

    /// Merge the level into its parent.
    pub fn squash(mut self) -> Result<()> {
        if !self.apply {
            return Ok(());
        }
        self.apply = false;
        self.container.squash()
    }
}

impl<T: ObjectType> Drop for ContainerSession<'_, T> {
    fn drop(&mut self) {
        if !self.apply {
            return;
        }
        if let Err(e) = self.container.undo() {
            error!(
                target: "chainstate::engine",
                error = %e,
                "implicit rollback of a container session failed"
            );
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) enum TransitionKind {
    Undo,
    Push,
    Squash,
}

pub(crate) struct SessionLevel {
    pub slot: usize,
    pub apply: bool,
}

/// Composite session across every registered container.
///
/// Created by [`Database::start_session`]. Transitions fan out to all
/// containers in registration order; a failing container marks the
/// engine non-operational, but the remaining containers are still
/// visited so the engine does not end half rolled back when reversal is
/// still possible elsewhere.
pub struct Session<'db> {
    db: &'db Database,
    levels: Vec<SessionLevel>,
    revision: i64,
    counted: bool,
    done: bool,
}

impl<'db> Session<'db> {
    pub(crate) fn new(db: &'db Database, levels: Vec<SessionLevel>, revision: i64) -> Self {
        Self {
            db,
            levels,
            revision,
            counted: true,
            done: false,
        }
    }

    pub(crate) fn inert(db: &'db Database) -> Self {
        Self {
            db,
            levels: Vec::new(),
            revision: -1,
            counted: false,
            done: false,
        }
    }

    /// The revision shared by every per-container level of this
    /// session, or -1 for an inert handle.
    pub fn revision(&self) -> i64 {
        self.revision
    }

    /// Reverse every level and pop them, newest speculation first in
    /// each container.
    pub fn undo(mut self) -> Result<()> {
        self.transition(TransitionKind::Undo)
    }

    /// Leave every level on its stack and give up reversibility.
    pub fn push(mut self) -> Result<()> {
        self.transition(TransitionKind::Push)
    }

    /// Merge every level into its parent.
    pub fn squash(mut self) -> Result<()> {
        self.transition(TransitionKind::Squash)
    }

    fn transition(&mut self, kind: TransitionKind) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        if self.levels.is_empty() && !self.counted {
            return Ok(());
        }

        let db = self.db;
        let counted = self.counted;
        let levels = &mut self.levels;
        db.state.with_write_lock(|inner| {
            if counted {
                inner.active_sessions = inner.active_sessions.saturating_sub(1);
            }
            let mut first_err = None;
            for level in levels.iter_mut() {
                if !level.apply {
                    continue;
                }
                level.apply = false;
                let result = match kind {
                    TransitionKind::Push => Ok(()),
                    TransitionKind::Undo => inner.container_at(level.slot).undo(),
                    TransitionKind::Squash => inner.container_at(level.slot).squash(),
                };
                if let Err(e) = result {
                    db.poison();
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
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Err(e) = self.transition(TransitionKind::Undo) {
            // A rollback that cannot run leaves unknowable state behind.
            self.db.poison();
            error!(
                target: "chainstate::engine",
                error = %e,
                "implicit session rollback failed"
            );
        }
    }
}
