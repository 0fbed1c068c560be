//! The chainstate engine
//!
//! This crate implements the transactional state engine:
//! - [`TypedContainer`]: one unique-by-id collection per object type,
//!   with a monotonic instance allocator and a per-type undo stack
//! - [`Session`] / [`ContainerSession`]: scoped speculative levels that
//!   roll back on drop unless pushed, squashed, or undone explicitly
//! - [`Database`]: the facade that owns all containers, dispatches by
//!   identifier, and fans session transitions across every registered
//!   type in registration order

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod container;
pub mod database;
mod registry;
pub mod session;
mod undo;

pub use config::{Config, OpenMode};
pub use container::TypedContainer;
pub use database::Database;
pub use session::{ContainerSession, Session};
