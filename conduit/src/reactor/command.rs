use crate::error::Result;
use crate::proxy::parser::HostPort;
use crate::utils::Key;

use std::net::SocketAddr;

/// Messages delivered to the reactor from other threads.
pub(crate) enum Command {
    /// A resolver worker finished looking up `target` for client `key`.
    Resolved {
        key: Key,
        target: HostPort,
        result: Result<SocketAddr>,
    },

    /// Stop the event loop; `run` returns after the current batch.
    Shutdown,
}
