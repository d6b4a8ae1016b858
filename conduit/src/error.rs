//! Error types for conduit.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

use crate::proxy::parser::ParseError;

/// Result type alias using conduit's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the proxy.
///
/// Startup errors (`Bind`, `Poller`) are fatal and returned from
/// [`Reactor::new`](crate::Reactor::new). The per-connection variants never
/// escape the event loop; they are logged and turn into a connection
/// teardown.
#[derive(Error, Debug)]
pub enum Error {
    // Startup errors
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to initialise the poller: {0}")]
    Poller(#[source] io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    // Per-connection errors
    #[error("malformed CONNECT request: {0}")]
    Parse(#[from] ParseError),

    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("resolver for {host}:{port} panicked")]
    ResolverPanicked { host: String, port: u16 },

    #[error("no resolver workers left")]
    ResolverUnavailable,

    #[error("no addresses found for {host}:{port}")]
    NoAddress { host: String, port: u16 },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
