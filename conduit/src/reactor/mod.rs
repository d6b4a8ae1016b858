//! Reactor core and event handling.
//!
//! This module implements the proxy's event loop.
//! The reactor is responsible for:
//! - accepting clients and dialing their destinations,
//! - driving socket readiness for every connection,
//! - applying results handed back by resolver workers.
//!
//! Everything runs on the thread calling [`Reactor::run`]; other threads
//! only talk to it through a [`ReactorHandle`].

mod core;

pub(crate) mod command;
pub(crate) mod event;
pub(crate) mod poller;

pub use self::core::{Reactor, ReactorHandle};
