//! Object identifiers
//!
//! Every object in the store is addressed by an [`ObjectId`], a 64-bit
//! value packed as `[space:8 | type:8 | instance:48]`. The space and type
//! bytes partition the identifier universe into per-type containers; the
//! instance is a serial number allocated by the owning container.
//!
//! [`TypedId`] carries the same instance number together with its
//! (space, type) tag at the type level, so mismatched lookups are caught
//! at compile time wherever the object type is statically known.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;

use crate::error::{ChainstateError, Result};
use crate::object::ObjectType;

/// Largest instance number representable in the 48-bit instance field.
pub const MAX_INSTANCE: u64 = (1 << 48) - 1;

/// Packed object identifier: `[space:8 | type:8 | instance:48]`.
///
/// The zero value is reserved as the null identifier and never assigned
/// to an object. Ordering is numeric on the packed value, which coincides
/// with lexicographic ordering on (space, type, instance): ids of one
/// container form a contiguous range, so range scans over a backing store
/// enumerate exactly one type.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    /// The reserved null identifier.
    pub const NULL: ObjectId = ObjectId(0);

    /// Pack (space, type, instance) into an identifier.
    ///
    /// Instance overflow is a programming error; this constructor checks
    /// it only in debug builds. Use [`ObjectId::checked`] on untrusted
    /// input.
    pub fn new(space: u8, type_id: u8, instance: u64) -> Self {
        debug_assert!(instance <= MAX_INSTANCE, "instance overflow: {instance}");
        Self((space as u64) << 56 | (type_id as u64) << 48 | (instance & MAX_INSTANCE))
    }

    /// Pack (space, type, instance), rejecting instances above 48 bits.
    pub fn checked(space: u8, type_id: u8, instance: u64) -> Result<Self> {
        if instance > MAX_INSTANCE {
            return Err(ChainstateError::invariant(format!(
                "instance {instance} overflows the 48-bit instance field"
            )));
        }
        Ok(Self::new(space, type_id, instance))
    }

    /// Reinterpret a raw 64-bit value as an identifier.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The packed 64-bit representation.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Space byte (plugin domain).
    pub fn space(self) -> u8 {
        (self.0 >> 56) as u8
    }

    /// Type byte (object kind within a space).
    pub fn type_id(self) -> u8 {
        (self.0 >> 48) as u8
    }

    /// Combined 16-bit (space, type) key used for container dispatch.
    pub fn space_type(self) -> u16 {
        (self.0 >> 48) as u16
    }

    /// Instance serial number within the (space, type) partition.
    pub fn instance(self) -> u64 {
        self.0 & MAX_INSTANCE
    }

    /// Whether this is the reserved null identifier.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The successor identifier within the same partition.
    pub fn next(self) -> Result<Self> {
        Self::checked(self.space(), self.type_id(), self.instance() + 1)
    }

    /// Inclusive identifier bounds of one (space, type) partition.
    pub fn partition(space_type: u16) -> (Self, Self) {
        let lo = (space_type as u64) << 48;
        (Self(lo), Self(lo | MAX_INSTANCE))
    }
}

impl Default for ObjectId {
    /// The null identifier.
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.space(), self.type_id(), self.instance())
    }
}

// Debug renders like Display so ids read as `1.2.42` in logs and test
// failures instead of a packed integer.
impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({self})")
    }
}

/// Instance number tagged with its object type.
///
/// Converts losslessly to [`ObjectId`] via the type's compile-time
/// (space, type) tag. Converting back from an untyped id is fallible and
/// verifies the tag.
pub struct TypedId<T> {
    instance: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ObjectType> TypedId<T> {
    /// Wrap an instance number.
    pub fn new(instance: u64) -> Self {
        debug_assert!(instance <= MAX_INSTANCE, "instance overflow: {instance}");
        Self {
            instance,
            _marker: PhantomData,
        }
    }

    /// The instance serial number.
    pub fn instance(self) -> u64 {
        self.instance
    }

    /// The equivalent untyped identifier.
    pub fn object_id(self) -> ObjectId {
        ObjectId::new(T::SPACE_ID, T::TYPE_ID, self.instance)
    }
}

impl<T: ObjectType> From<TypedId<T>> for ObjectId {
    fn from(id: TypedId<T>) -> Self {
        id.object_id()
    }
}

impl<T: ObjectType> TryFrom<ObjectId> for TypedId<T> {
    type Error = ChainstateError;

    fn try_from(id: ObjectId) -> Result<Self> {
        if id.space_type() != T::space_type() {
            return Err(ChainstateError::invariant(format!(
                "id {id} does not belong to type {}.{}",
                T::SPACE_ID,
                T::TYPE_ID
            )));
        }
        Ok(Self::new(id.instance()))
    }
}

// Manual impls: the type parameter is phantom, so none of these should
// require bounds on T beyond ObjectType.

impl<T> Clone for TypedId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TypedId<T> {}

impl<T> PartialEq for TypedId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.instance == other.instance
    }
}

impl<T> Eq for TypedId<T> {}

impl<T> PartialOrd for TypedId<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for TypedId<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.instance.cmp(&other.instance)
    }
}

impl<T> std::hash::Hash for TypedId<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.instance.hash(state);
    }
}

impl<T: ObjectType> fmt::Display for TypedId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.object_id())
    }
}

impl<T: ObjectType> fmt::Debug for TypedId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypedId({})", self.object_id())
    }
}

impl<T: ObjectType> Serialize for TypedId<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.instance.serialize(serializer)
    }
}

impl<'de, T: ObjectType> Deserialize<'de> for TypedId<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let instance = u64::deserialize(deserializer)?;
        if instance > MAX_INSTANCE {
            return Err(serde::de::Error::custom("instance overflows 48 bits"));
        }
        Ok(Self::new(instance))
    }
}
