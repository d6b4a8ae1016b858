//! # Conduit
//!
//! **Conduit** is a small HTTP `CONNECT` tunnel proxy for the **Nebula**
//! ecosystem.
//!
//! A client opens a TCP connection, sends `CONNECT host:port HTTP/1.1`, and
//! once Conduit has reached the destination it answers
//! `HTTP/1.1 200 Connection Established`. From then on bytes are relayed
//! verbatim in both directions until either side closes.
//!
//! Everything runs on a single thread around an `epoll` reactor:
//!
//! - sockets are non-blocking and level-triggered,
//! - writes that do not fit are buffered per connection and flushed on
//!   writability,
//! - closing one side of a tunnel closes the other,
//! - destination names are resolved on a small worker pool so lookups do
//!   not stall the loop.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use conduit::{ProxyBuilder, Reactor};
//!
//! fn main() -> conduit::Result<()> {
//!     let config = ProxyBuilder::new()
//!         .listen_addr("127.0.0.1:8080".parse().unwrap())
//!         .build()?;
//!
//!     let mut reactor = Reactor::new(config)?;
//!     reactor.run()
//! }
//! ```
//!
//! ## Modules
//!
//! - [`parser`] - `CONNECT` request line parsing
//! - [`resolver`] - destination name resolution

mod config;
mod error;
mod net;
mod proxy;
mod reactor;
mod utils;

pub use config::{DEFAULT_PORT, ProxyBuilder, ProxyConfig};
pub use error::{Error, Result};
pub use proxy::{parser, resolver};
pub use proxy::parser::{HeadScanner, HostPort, ParseError, parse_connect};
pub use proxy::resolver::{Resolve, SystemResolver};
pub use reactor::{Reactor, ReactorHandle};
