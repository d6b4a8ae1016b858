use super::parser::HostPort;
use super::resolver::Resolve;
use crate::error::{Error, Result};
use crate::net::TcpStream;

use std::net::SocketAddr;

/// How far a dial got synchronously.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DialStatus {
    /// The connection is established.
    Connected,
    /// The connect is in flight; wait for writability, then [`finish`].
    Pending,
}

/// Starts a non-blocking connection to `addr`.
///
/// An `Err` is a failed dial.
pub(crate) fn dial(addr: SocketAddr) -> Result<(TcpStream, DialStatus)> {
    let (stream, connected) =
        TcpStream::connect(&addr).map_err(|source| Error::Connect { addr, source })?;

    let status = if connected {
        DialStatus::Connected
    } else {
        DialStatus::Pending
    };

    Ok((stream, status))
}

/// Resolves `target` and dials the first address.
///
/// Resolution blocks the calling thread.
pub(crate) fn dial_target(
    resolver: &dyn Resolve,
    target: &HostPort,
) -> Result<(TcpStream, SocketAddr, DialStatus)> {
    let addr = resolver.resolve(target)?;
    let (stream, status) = dial(addr)?;

    Ok((stream, addr, status))
}

/// Confirms a pending dial once its socket reported readiness.
///
/// A zero `SO_ERROR` means the connection is up; anything else, including
/// failing to read the status, is a failed dial.
pub(crate) fn finish(stream: &TcpStream, addr: SocketAddr) -> Result<()> {
    stream
        .take_error()
        .map_err(|source| Error::Connect { addr, source })
}
