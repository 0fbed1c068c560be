//! Error types for the chainstate object store
//!
//! `ChainstateError` is the unified error type for all chainstate APIs.
//! Variants fall into four classes with distinct recovery contracts:
//!
//! - **Precondition errors** (`NotFound`, `UnknownType`, `DuplicateType`,
//!   `ReadOnly`): reported without any state change.
//! - **Constraint violations** (`UniquenessViolation`): the offending
//!   operation is undone locally before returning; the container is left
//!   exactly as it was at entry.
//! - **Contention** (`LockTimeout`): no state change; the caller retries
//!   at its own discretion.
//! - **Invariant failures** (`InvariantViolation`, corruption detected
//!   during reversal): the engine transitions to a non-operational state
//!   in which only `close` and `wipe` remain valid.

use std::fmt;
use std::io;
use thiserror::Error;

use crate::id::ObjectId;

/// Result type alias for chainstate operations.
pub type Result<T> = std::result::Result<T, ChainstateError>;

/// Unified error type for all chainstate operations.
#[derive(Debug, Error)]
pub enum ChainstateError {
    /// The referenced object (or key) does not exist.
    #[error("not found: {entity}")]
    NotFound {
        /// Description of the missing entity.
        entity: String,
    },

    /// An insert or modification would duplicate a unique key.
    #[error("uniqueness constraint violated on {id}: {detail}")]
    UniquenessViolation {
        /// Identifier of the offending object.
        id: ObjectId,
        /// Which constraint was violated.
        detail: String,
    },

    /// A (space, type) pair was registered twice.
    #[error("type {space}.{type_id} is already registered")]
    DuplicateType {
        /// Space byte of the duplicate registration.
        space: u8,
        /// Type byte of the duplicate registration.
        type_id: u8,
    },

    /// An identifier was dispatched to an unregistered (space, type).
    #[error("no container registered for type key {space_type:#06x}")]
    UnknownType {
        /// The unregistered 16-bit (space, type) key.
        space_type: u16,
    },

    /// A lock could not be acquired within its retry budget.
    #[error("could not acquire {kind} lock after {attempts} attempts")]
    LockTimeout {
        /// `"read"` or `"write"`.
        kind: &'static str,
        /// Number of acquisition attempts made.
        attempts: u32,
    },

    /// An internal invariant no longer holds. The engine is
    /// non-operational once this surfaces from a reversal path.
    #[error("invariant violation: {reason}")]
    InvariantViolation {
        /// What went wrong.
        reason: String,
    },

    /// The store could not be opened.
    #[error("open failed: {reason}")]
    OpenFailed {
        /// Why the open was rejected.
        reason: String,
    },

    /// Resize was requested while undo sessions are active.
    #[error("cannot resize while undo sessions are active")]
    ResizeBlocked,

    /// A mutation was attempted through a read-only handle.
    #[error("database is read-only")]
    ReadOnly,

    /// I/O failure in the storage layer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An object or record could not be encoded or decoded.
    #[error("serialization error: {detail}")]
    Serialization {
        /// What failed to round-trip.
        detail: String,
    },
}

impl From<bincode::Error> for ChainstateError {
    fn from(e: bincode::Error) -> Self {
        ChainstateError::Serialization {
            detail: e.to_string(),
        }
    }
}

impl ChainstateError {
    /// `NotFound` for a primary-id lookup.
    pub fn not_found(id: ObjectId) -> Self {
        ChainstateError::NotFound {
            entity: format!("object {id}"),
        }
    }

    /// `NotFound` for a secondary-key lookup.
    pub fn not_found_key<K: fmt::Debug>(key: &K) -> Self {
        ChainstateError::NotFound {
            entity: format!("key {key:?}"),
        }
    }

    /// `UniquenessViolation` constructor.
    pub fn uniqueness(id: ObjectId, detail: impl Into<String>) -> Self {
        ChainstateError::UniquenessViolation {
            id,
            detail: detail.into(),
        }
    }

    /// `InvariantViolation` constructor.
    pub fn invariant(reason: impl Into<String>) -> Self {
        ChainstateError::InvariantViolation {
            reason: reason.into(),
        }
    }

    /// `OpenFailed` constructor.
    pub fn open_failed(reason: impl Into<String>) -> Self {
        ChainstateError::OpenFailed {
            reason: reason.into(),
        }
    }

    /// `Serialization` constructor.
    pub fn serialization(detail: impl Into<String>) -> Self {
        ChainstateError::Serialization {
            detail: detail.into(),
        }
    }

    /// Precondition errors report a rejected request; no state changed.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ChainstateError::NotFound { .. }
                | ChainstateError::UnknownType { .. }
                | ChainstateError::DuplicateType { .. }
                | ChainstateError::ReadOnly
                | ChainstateError::ResizeBlocked
        )
    }

    /// Retryable errors may succeed on a later attempt with no input
    /// change. Only lock contention qualifies.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainstateError::LockTimeout { .. })
    }

    /// Fatal errors indicate a broken invariant; the engine refuses
    /// further work after surfacing one from a reversal path.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChainstateError::InvariantViolation { .. })
    }
}
