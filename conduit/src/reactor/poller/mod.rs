//! Platform-specific I/O poller abstraction.
//!
//! The poller is used by the reactor to:
//! - wait for I/O readiness events,
//! - wake the reactor when commands arrive from other threads,
//! - register, modify, and remove descriptor interest.
//!
//! Only the Linux `epoll` backend is provided; the raw socket syscalls the
//! reactor and the dialer rely on live in [`unix`].

pub(crate) mod common;

pub(crate) use common::{Interest, Waker};

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "linux")]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;
