//! In-memory collaborator implementations.
//!
//! [`MemoryRelationalStore`] and [`MemoryObjectStore`] are intended for
//! tests and local development. They enforce the same constraints and
//! locking the production stores are expected to provide, so sagas running
//! against them exercise the real failure modes.

mod object;
mod relational;

pub use object::MemoryObjectStore;
pub use relational::MemoryRelationalStore;
