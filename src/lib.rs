//! # chainstate
//!
//! An in-memory, typed, multi-index object store with a stackable
//! undo/redo history: the state engine of a blockchain-style system,
//! where each block is speculatively applied and then either committed
//! or unwound atomically.
//!
//! # Quick start
//!
//! ```
//! use chainstate::{Database, ObjectId, ObjectType};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! struct Account {
//!     id: ObjectId,
//!     name: String,
//!     balance: i64,
//! }
//!
//! impl ObjectType for Account {
//!     const SPACE_ID: u8 = 1;
//!     const TYPE_ID: u8 = 1;
//!     type Key = String;
//!
//!     fn id(&self) -> ObjectId {
//!         self.id
//!     }
//!
//!     fn assign_id(&mut self, id: ObjectId) {
//!         self.id = id;
//!     }
//!
//!     fn unique_key(&self) -> Option<String> {
//!         Some(self.name.clone())
//!     }
//! }
//!
//! fn main() -> chainstate::Result<()> {
//!     let db = Database::open_ephemeral();
//!     db.register_type::<Account>()?;
//!
//!     // Speculative block: roll it back unless explicitly kept.
//!     let session = db.start_session()?;
//!     let alice = db.create(|a: &mut Account| {
//!         a.name = "alice".into();
//!         a.balance = 100;
//!     })?;
//!     db.modify(alice.id, |a: &mut Account| a.balance += 20)?;
//!     session.undo()?;
//!
//!     assert!(db.find::<Account>(alice.id)?.is_none());
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The [`Database`] facade owns one typed container per registered
//! object type. Each container keeps a unique-by-id collection, a
//! monotonically increasing instance allocator, and its own undo stack;
//! a [`Session`] is one speculative level across all of them at once.
//! Sessions nest: an inner level can be rolled back ([`Session::undo`]),
//! merged into its parent ([`Session::squash`]), or left on the stack
//! for the parent to decide ([`Session::push`]).
//!
//! Internal crates (core, engine, storage, concurrency) are not meant
//! to be depended on directly; only the surface re-exported here is
//! stable.

pub use chainstate_core::{ChainstateError, ObjectId, ObjectType, Result, TypedId, MAX_INSTANCE};
pub use chainstate_engine::{Config, ContainerSession, Database, OpenMode, Session, TypedContainer};
pub use chainstate_storage::{BatchOp, ColdStore, MemoryStore};
