use super::buffer::WriteBuffer;
use super::parser::HeadScanner;
use crate::net::TcpStream;
use crate::reactor::poller::Interest;
use crate::utils::Key;

use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};

/// Which side of a tunnel a connection is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Accepted from the listening socket.
    Client,
    /// Dialed by the proxy on behalf of a client.
    Destination,
}

/// Lifecycle state of a connection.
///
/// Clients move `AwaitingTarget → Dialing → Tunnel`; destinations are
/// created in `Dialing` (or straight in `Tunnel` when the connect completes
/// synchronously). Any state can move to `Closing`, which is terminal: the
/// connection is torn down at the end of the dispatch that set it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    AwaitingTarget,
    Dialing,
    Tunnel,
    Closing,
}

/// One proxied socket and everything the reactor tracks about it.
pub(crate) struct Connection {
    pub(crate) stream: TcpStream,

    /// Remote address: the client's address or the dialed destination.
    pub(crate) addr: SocketAddr,

    pub(crate) role: Role,
    pub(crate) state: State,

    /// Bytes waiting to be written to `stream`.
    pub(crate) pending: WriteBuffer,

    /// The other side of the tunnel.
    ///
    /// Only [`Registry`](super::registry::Registry) writes this field, which
    /// keeps the relation symmetric.
    pub(crate) peer: Option<Key>,

    /// Interest currently registered with the poller.
    pub(crate) interest: Interest,

    /// An outbound connect has been issued and not yet confirmed.
    pub(crate) connect_pending: bool,

    /// Client bytes received before the destination connection existed.
    pub(crate) early: WriteBuffer,

    /// Set while the end of a client's request head has not been seen yet.
    pub(crate) head: Option<HeadScanner>,

    /// Close once `pending` has been flushed (error responses).
    pub(crate) linger: bool,
}

impl Connection {
    /// A freshly accepted client, waiting for its `CONNECT` request.
    pub(crate) fn client(stream: TcpStream, addr: SocketAddr) -> Self {
        Self::new(stream, addr, Role::Client, State::AwaitingTarget, false)
    }

    /// A dialed destination.
    ///
    /// `connected` tells whether the connect already completed; if not, the
    /// connection waits in `Dialing` with write interest armed.
    pub(crate) fn destination(stream: TcpStream, addr: SocketAddr, connected: bool) -> Self {
        let state = if connected {
            State::Tunnel
        } else {
            State::Dialing
        };

        Self::new(stream, addr, Role::Destination, state, !connected)
    }

    fn new(
        stream: TcpStream,
        addr: SocketAddr,
        role: Role,
        state: State,
        connect_pending: bool,
    ) -> Self {
        let mut conn = Self {
            stream,
            addr,
            role,
            state,
            pending: WriteBuffer::new(),
            peer: None,
            interest: Interest::READ,
            connect_pending,
            early: WriteBuffer::new(),
            head: None,
            linger: false,
        };
        conn.interest = conn.desired_interest();
        conn
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.state == State::Closing
    }

    pub(crate) fn mark_closing(&mut self) {
        self.state = State::Closing;
    }

    /// Write interest is wanted while bytes are queued or a connect is
    /// outstanding.
    pub(crate) fn desired_interest(&self) -> Interest {
        if self.connect_pending || !self.pending.is_empty() {
            Interest::READ_WRITE
        } else {
            Interest::READ
        }
    }

    /// Records the interest the connection now needs.
    ///
    /// Returns the new interest only if it differs from what is registered,
    /// so the poller is touched once per transition. Closing connections
    /// are about to be deregistered and never report a change.
    pub(crate) fn refresh_interest(&mut self) -> Option<Interest> {
        if self.is_closing() {
            return None;
        }

        let desired = self.desired_interest();
        if desired == self.interest {
            return None;
        }

        self.interest = desired;
        Some(desired)
    }

    /// Returns the part of `bytes` that follows the client's request head.
    ///
    /// While the head terminator has not been seen, bytes are swallowed.
    pub(crate) fn strip_head<'a>(&mut self, bytes: &'a [u8]) -> &'a [u8] {
        let Some(scanner) = self.head.as_mut() else {
            return bytes;
        };

        match scanner.scan(bytes) {
            Some(end) => {
                self.head = None;
                &bytes[end..]
            }
            None => &[],
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::proxy::buffer::tests::Throttled;

    use std::os::fd::IntoRawFd;
    use std::os::unix::net::UnixStream;

    /// Builds a connection over one end of a socket pair.
    pub(crate) fn connection(role: Role) -> Connection {
        let (a, _b) = UnixStream::pair().unwrap();
        let stream = TcpStream::from_raw(a.into_raw_fd());
        let addr = "127.0.0.1:9".parse().unwrap();

        match role {
            Role::Client => Connection::client(stream, addr),
            Role::Destination => Connection::destination(stream, addr, false),
        }
    }

    #[test]
    fn client_starts_awaiting_target_with_read_interest() {
        let conn = connection(Role::Client);

        assert_eq!(conn.state, State::AwaitingTarget);
        assert_eq!(conn.interest, Interest::READ);
        assert!(conn.peer.is_none());
    }

    #[test]
    fn pending_destination_arms_write_interest() {
        let mut conn = connection(Role::Destination);

        assert_eq!(conn.state, State::Dialing);
        assert_eq!(conn.interest, Interest::READ_WRITE);
        assert_eq!(conn.refresh_interest(), None);

        conn.connect_pending = false;
        assert_eq!(conn.refresh_interest(), Some(Interest::READ));
    }

    #[test]
    fn write_interest_disarmed_exactly_once_after_full_drain() {
        let mut conn = connection(Role::Client);

        conn.pending.enqueue(b"payload");
        assert_eq!(conn.refresh_interest(), Some(Interest::READ_WRITE));
        assert_eq!(conn.refresh_interest(), None);

        let mut sink = Throttled::new(3, 3);
        conn.pending.drain(&mut sink);
        assert_eq!(conn.refresh_interest(), None);

        sink.budget = usize::MAX;
        conn.pending.drain(&mut sink);
        assert_eq!(conn.refresh_interest(), Some(Interest::READ));
        assert_eq!(conn.refresh_interest(), None);
        assert_eq!(sink.accepted, b"payload");
    }

    #[test]
    fn closing_connection_never_reports_interest_change() {
        let mut conn = connection(Role::Client);

        conn.pending.enqueue(b"x");
        conn.mark_closing();
        assert_eq!(conn.refresh_interest(), None);
    }

    #[test]
    fn strip_head_swallows_headers_across_reads() {
        let mut conn = connection(Role::Client);
        conn.head = Some(HeadScanner::new());

        assert_eq!(conn.strip_head(b"Host: a\r\n"), b"");
        assert_eq!(conn.strip_head(b"\r\nhello"), b"hello");
        assert_eq!(conn.strip_head(b"world"), b"world");
    }
}
