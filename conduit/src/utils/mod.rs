//! Utilities for memory-efficient data structures.
//!
//! This module exposes the generational [`Slab`] that backs the connection
//! registry, and the [`Key`] type used both as registry handle and as
//! poller token.

mod slab;

pub use slab::Key;
pub(crate) use slab::Slab;
