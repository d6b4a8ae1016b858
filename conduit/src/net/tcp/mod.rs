//! TCP networking implementation.
//!
//! It is split into:
//! - [`listener`]: the bound, non-blocking listening socket,
//! - [`stream`]: accepted and dialed connection sockets.

pub(crate) mod listener;
pub(crate) mod stream;
