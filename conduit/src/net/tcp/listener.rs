use super::stream::TcpStream;
use crate::reactor::poller::platform::{
    sys_accept, sys_bind, sys_close, sys_ipv6_is_necessary, sys_listen, sys_set_reuseaddr,
    sys_socket, sys_sockname,
};

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};

/// A non-blocking TCP listener.
///
/// Accepting never blocks: when no connection is pending, [`accept`]
/// reports [`io::ErrorKind::WouldBlock`].
///
/// [`accept`]: TcpListener::accept
pub(crate) struct TcpListener {
    /// File descriptor of the listening socket.
    fd: RawFd,
}

impl TcpListener {
    /// Binds a TCP listener to the given address.
    ///
    /// This function:
    /// - creates a non-blocking socket,
    /// - enables `SO_REUSEADDR`,
    /// - configures IPv6 dual-stack if applicable,
    /// - binds and starts listening.
    pub(crate) fn bind(address: SocketAddr) -> io::Result<Self> {
        let fd = sys_socket(&address)?;
        // Owned from here on so every early return closes the socket.
        let listener = Self { fd };

        sys_set_reuseaddr(fd)?;
        sys_ipv6_is_necessary(fd, &address)?;
        sys_bind(fd, &address)?;
        sys_listen(fd)?;

        Ok(listener)
    }

    /// Accepts one pending connection.
    pub(crate) fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (fd, address) = sys_accept(self.fd)?;

        Ok((TcpStream::from_raw(fd), address))
    }

    /// Returns the local socket address of this listener.
    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        sys_sockname(self.fd)
    }
}

impl AsRawFd for TcpListener {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for TcpListener {
    /// Closes the listening socket.
    fn drop(&mut self) {
        sys_close(self.fd);
    }
}
