//! The contract stored object types implement
//!
//! Each object type registered with the engine supplies a small
//! behavioral descriptor: its compile-time (space, type) tag, access to
//! the mandatory `id` field, an optional secondary unique key, and the
//! clone/serialize capabilities the container and cold store need. All
//! of it is expressed through trait bounds rather than a descriptor
//! table, so one container struct is instantiated per object type.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

use crate::id::ObjectId;

/// Contract implemented by every storable object type.
///
/// Objects are plain owned values with a mandatory identifier field.
/// They must be cheap to clone (the undo log snapshots them) and
/// serde-serializable (the cold store holds them as opaque bytes).
/// Objects reference other objects only by identifier; the engine never
/// follows such references.
///
/// # Example
///
/// ```
/// use chainstate_core::{ObjectId, ObjectType};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// struct Account {
///     id: ObjectId,
///     name: String,
///     balance: i64,
/// }
///
/// impl ObjectType for Account {
///     const SPACE_ID: u8 = 1;
///     const TYPE_ID: u8 = 1;
///     type Key = String;
///
///     fn id(&self) -> ObjectId {
///         self.id
///     }
///
///     fn assign_id(&mut self, id: ObjectId) {
///         self.id = id;
///     }
///
///     fn unique_key(&self) -> Option<String> {
///         Some(self.name.clone())
///     }
/// }
/// ```
pub trait ObjectType:
    Clone + Default + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Space byte of this type's identifier partition.
    const SPACE_ID: u8;

    /// Type byte of this type's identifier partition.
    const TYPE_ID: u8;

    /// Secondary unique key type. Use `()` for types whose only
    /// uniqueness constraint is the primary identifier.
    type Key: Ord + Clone + fmt::Debug + Send + Sync + 'static;

    /// The object's identifier. Invariant: `id().space_type()` equals
    /// [`ObjectType::space_type`] for every object in a container.
    fn id(&self) -> ObjectId;

    /// Install the identifier. Called exactly once, at creation.
    fn assign_id(&mut self, id: ObjectId);

    /// Extract the secondary unique key, if this type carries one.
    ///
    /// When `Some`, the container maintains a unique index over the key
    /// and rejects inserts and modifications that would duplicate it.
    fn unique_key(&self) -> Option<Self::Key> {
        None
    }

    /// Combined 16-bit (space, type) dispatch key.
    fn space_type() -> u16 {
        (Self::SPACE_ID as u16) << 8 | Self::TYPE_ID as u16
    }

    /// First identifier of this type's partition; the initial `next_id`
    /// of a freshly allocated container.
    fn first_id() -> ObjectId {
        ObjectId::new(Self::SPACE_ID, Self::TYPE_ID, 0)
    }
}
