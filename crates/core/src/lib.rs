//! Core types for the chainstate object store
//!
//! This crate defines the foundational types used throughout the system:
//! - ObjectId: packed (space, type, instance) identifier
//! - TypedId: compile-time-tagged instance number
//! - ObjectType: the contract every stored object type implements
//! - ChainstateError: the unified error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod id;
pub mod object;

pub use error::{ChainstateError, Result};
pub use id::{ObjectId, TypedId, MAX_INSTANCE};
pub use object::ObjectType;
