//! The CONNECT tunnel itself.
//!
//! Connection state, request parsing, outgoing buffers and the pairing of
//! clients with their destinations. The reactor drives all of it.

pub(crate) mod buffer;
pub(crate) mod connection;
pub(crate) mod dialer;
pub(crate) mod registry;

pub mod parser;
pub mod resolver;
