use crate::reactor::poller::platform::{
    sys_close, sys_connect, sys_get_socket_error, sys_read, sys_socket, sys_write,
};

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};

/// A non-blocking TCP connection socket.
///
/// Reads and writes go straight to the kernel and report
/// [`io::ErrorKind::WouldBlock`] instead of waiting. The descriptor is
/// closed when the stream is dropped.
#[derive(Debug)]
pub(crate) struct TcpStream {
    fd: RawFd,
}

impl TcpStream {
    /// Takes ownership of an already non-blocking socket descriptor.
    pub(crate) fn from_raw(fd: RawFd) -> Self {
        Self { fd }
    }

    /// Creates a socket and starts connecting it to `address`.
    ///
    /// Returns the stream together with `true` if the connection completed
    /// synchronously, or `false` if it is still in progress and must be
    /// confirmed with [`take_error`](Self::take_error) once writable.
    pub(crate) fn connect(address: &SocketAddr) -> io::Result<(Self, bool)> {
        let stream = Self::from_raw(sys_socket(address)?);

        match sys_connect(stream.fd, address) {
            Ok(()) => Ok((stream, true)),
            Err(err) if err.raw_os_error() == Some(libc::EINPROGRESS) => Ok((stream, false)),
            Err(err) => Err(err),
        }
    }

    /// Returns the pending socket error, if any (`SO_ERROR`).
    pub(crate) fn take_error(&self) -> io::Result<()> {
        sys_get_socket_error(self.fd)
    }
}

impl io::Read for TcpStream {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        (&*self).read(buffer)
    }
}

impl io::Read for &TcpStream {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        sys_read(self.fd, buffer)
    }
}

impl io::Write for TcpStream {
    fn write(&mut self, buffer: &[u8]) -> io::Result<usize> {
        (&*self).write(buffer)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Write for &TcpStream {
    fn write(&mut self, buffer: &[u8]) -> io::Result<usize> {
        sys_write(self.fd, buffer)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsRawFd for TcpStream {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for TcpStream {
    /// Closes the socket.
    fn drop(&mut self) {
        sys_close(self.fd);
    }
}
