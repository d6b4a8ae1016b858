use super::command::Command;
use super::event::Event;
use super::poller::{Interest, Poller, Waker};
use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use crate::net::{TcpListener, TcpStream};
use crate::proxy::buffer::Drain;
use crate::proxy::connection::{Connection, State};
use crate::proxy::dialer::{self, DialStatus};
use crate::proxy::parser::{HeadScanner, HostPort, parse_connect};
use crate::proxy::registry::Registry;
use crate::proxy::resolver::{Resolve, ResolverPool, SystemResolver};
use crate::utils::Key;

use std::io::{self, Read};
use std::mem;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, SendError, Sender, channel};

use tracing::{debug, info, trace, warn};

/// Poller token of the listening socket.
const LISTENER_TOKEN: u64 = u64::MAX - 1;

/// Sent to a client once its destination is connected.
pub(crate) const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Sent to a client whose request could not be parsed (if enabled).
pub(crate) const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";

/// Sent to a client whose destination could not be reached (if enabled).
pub(crate) const BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\n\r\n";

/// Where destination names get resolved.
enum Resolution {
    /// On the reactor thread, blocking the loop.
    Inline(Arc<dyn Resolve>),
    /// On background workers reporting through the command channel.
    Pool(ResolverPool),
}

/// The proxy's event loop.
///
/// A single thread owns the listener, the poller and every connection. Each
/// readiness event is handled to completion (until the socket would block)
/// before the next one; connections marked `Closing` are torn down at the
/// end of the dispatch that marked them.
pub struct Reactor {
    config: ProxyConfig,

    /// Platform-specific poller (epoll).
    poller: Poller,

    listener: TcpListener,

    /// Every live connection, keyed by poller token.
    registry: Registry,

    /// Buffer used to collect I/O events from the poller.
    events: Vec<Event>,

    /// Scratch buffer for reads.
    read_buffer: Vec<u8>,

    /// Commands from resolver workers and shutdown requests.
    receiver: Receiver<Command>,

    handle: ReactorHandle,

    resolution: Resolution,

    /// Connections touched by the current dispatch, to be reaped or have
    /// their interest updated once it ends.
    touched: Vec<Key>,
}

/// A handle used to talk to a running reactor from other threads.
#[derive(Clone)]
pub struct ReactorHandle {
    /// Sender side of the command channel.
    sender: Sender<Command>,

    /// Waker used to interrupt the poller.
    waker: Arc<Waker>,
}

impl ReactorHandle {
    /// Sends a command to the reactor and wakes it.
    pub(crate) fn send(&self, cmd: Command) -> std::result::Result<(), SendError<Command>> {
        let result = self.sender.send(cmd);
        self.waker.wake();
        result
    }

    /// Asks the reactor to stop; [`Reactor::run`] then returns `Ok(())`.
    pub fn shutdown(&self) {
        let _ = self.send(Command::Shutdown);
    }
}

impl Reactor {
    /// Binds the listener and prepares the event loop, resolving with the
    /// system resolver.
    pub fn new(config: ProxyConfig) -> Result<Self> {
        Self::with_resolver(config, Arc::new(SystemResolver))
    }

    /// Like [`new`](Self::new) with a custom resolver.
    pub fn with_resolver(config: ProxyConfig, resolver: Arc<dyn Resolve>) -> Result<Self> {
        let addr = config.listen_addr;
        let listener = TcpListener::bind(addr).map_err(|source| Error::Bind { addr, source })?;

        let poller = Poller::new(config.max_events).map_err(Error::Poller)?;
        poller
            .register(listener.as_raw_fd(), LISTENER_TOKEN, Interest::READ)
            .map_err(Error::Poller)?;

        let (sender, receiver) = channel();
        let handle = ReactorHandle {
            sender,
            waker: poller.waker(),
        };

        let resolution = if config.resolver_threads == 0 {
            warn!("resolving destinations inline; lookups block the event loop");
            Resolution::Inline(resolver)
        } else {
            let pool = ResolverPool::new(config.resolver_threads, resolver, handle.clone())?;
            Resolution::Pool(pool)
        };

        Ok(Self {
            events: Vec::with_capacity(config.max_events),
            read_buffer: vec![0; config.read_buffer_size],
            registry: Registry::new(64),
            touched: Vec::new(),
            config,
            poller,
            listener,
            receiver,
            handle,
            resolution,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Returns a handle for stopping the loop from another thread.
    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    /// Number of open client and destination connections.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Runs the event loop until [`ReactorHandle::shutdown`] is called.
    ///
    /// Only a failing `epoll_wait` makes this return an error; per-connection
    /// failures are handled by closing the connections involved.
    pub fn run(&mut self) -> Result<()> {
        info!(addr = %self.local_addr()?, "listening for CONNECT requests");

        loop {
            self.poller.poll(&mut self.events).map_err(Error::Poller)?;

            let events = mem::take(&mut self.events);
            for event in &events {
                self.dispatch(*event);
                self.settle();
            }
            self.events = events;

            if self.process_commands() {
                info!("shutting down");
                return Ok(());
            }
        }
    }

    /// Applies queued commands. Returns `true` on shutdown.
    fn process_commands(&mut self) -> bool {
        while let Ok(cmd) = self.receiver.try_recv() {
            match cmd {
                Command::Resolved {
                    key,
                    target,
                    result,
                } => {
                    self.on_resolved(key, &target, result);
                    self.settle();
                }
                Command::Shutdown => return true,
            }
        }

        false
    }

    fn dispatch(&mut self, event: Event) {
        if event.token == LISTENER_TOKEN {
            self.accept_all();
            return;
        }

        let key = Key::from_token(event.token);
        let Some(conn) = self.registry.get(key) else {
            trace!(%key, "event for a connection already closed");
            return;
        };

        // Readiness of any kind on a connecting socket settles the connect;
        // errors surface as readable (EPOLLERR/EPOLLHUP).
        if conn.connect_pending {
            self.complete_dial(key);
        }

        if event.writable && self.is_open(key) {
            self.flush(key);
        }

        if event.readable && self.is_open(key) {
            self.read_from(key);
        }
    }

    fn is_open(&self, key: Key) -> bool {
        self.registry
            .get(key)
            .is_some_and(|conn| !conn.is_closing())
    }

    /// Accepts every pending client.
    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let conn = Connection::client(stream, addr);
                    let fd = conn.fd();
                    let interest = conn.interest;
                    let key = self.registry.insert(conn);

                    if let Err(err) = self.poller.register(fd, key.to_token(), interest) {
                        warn!(%addr, error = %err, "failed to watch accepted client");
                        self.registry.remove(key);
                        continue;
                    }

                    debug!(%key, %addr, "accepted client");
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    break;
                }
            }
        }
    }

    /// Reads until the socket would block, closes, or fails.
    fn read_from(&mut self, key: Key) {
        let mut buffer = mem::take(&mut self.read_buffer);

        loop {
            let Some(conn) = self.registry.get_mut(key) else {
                break;
            };

            match conn.stream.read(&mut buffer) {
                Ok(0) => {
                    debug!(%key, role = ?conn.role, "peer closed");
                    self.close_pair(key);
                    break;
                }
                Ok(n) => {
                    self.on_data(key, &buffer[..n]);
                    if !self.is_open(key) {
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(%key, error = %err, "read failed");
                    self.close_pair(key);
                    break;
                }
            }
        }

        self.read_buffer = buffer;
    }

    fn on_data(&mut self, key: Key, bytes: &[u8]) {
        let Some(conn) = self.registry.get_mut(key) else {
            return;
        };

        if conn.linger {
            // Waiting for an error response to drain; input is discarded.
            return;
        }

        match conn.state {
            State::AwaitingTarget => self.on_request(key, bytes),
            State::Dialing => {
                let payload = conn.strip_head(bytes);

                // Held until the destination's connect is confirmed.
                if conn.peer.is_none() {
                    conn.early.enqueue(payload);
                } else if let Some((_, dest)) = self.registry.with_peer_mut(key) {
                    dest.pending.enqueue(payload);
                }
            }
            State::Tunnel => {
                let Some((from, to)) = self.registry.with_peer_mut(key) else {
                    return;
                };

                let payload = from.strip_head(bytes);
                trace!(%key, bytes = payload.len(), "relaying");
                to.pending.enqueue(payload);

                let peer = from.peer;
                self.touched.extend(peer);
            }
            State::Closing => {}
        }
    }

    /// Handles the first read of a client.
    fn on_request(&mut self, key: Key, bytes: &[u8]) {
        let target = match parse_connect(bytes) {
            Ok(target) => target,
            Err(err) => {
                debug!(%key, error = %err, "rejecting request");
                self.reject(key, BAD_REQUEST);
                return;
            }
        };

        let Some(conn) = self.registry.get_mut(key) else {
            return;
        };

        conn.state = State::Dialing;

        let mut scanner = HeadScanner::new();
        match scanner.scan(bytes) {
            Some(end) => {
                conn.early.enqueue(&bytes[end..]);
            }
            None => conn.head = Some(scanner),
        }

        info!(%key, client = %conn.addr, %target, "CONNECT");

        let dialed = match &self.resolution {
            Resolution::Pool(pool) => match pool.submit(key, target.clone()) {
                Ok(()) => return,
                Err(err) => Err(err),
            },
            Resolution::Inline(resolver) => dialer::dial_target(resolver.as_ref(), &target),
        };

        match dialed {
            Ok((stream, addr, status)) => self.attach_destination(key, stream, addr, status),
            Err(err) => {
                warn!(%key, %target, error = %err, "dial failed");
                self.fail_dial(key);
            }
        }
    }

    /// Applies a resolution result from the pool.
    fn on_resolved(&mut self, key: Key, target: &HostPort, result: Result<SocketAddr>) {
        let Some(conn) = self.registry.get(key) else {
            debug!(%key, %target, "client went away while resolving");
            return;
        };

        if conn.state != State::Dialing || conn.peer.is_some() {
            return;
        }

        let dialed = result.and_then(|addr| {
            let (stream, status) = dialer::dial(addr)?;
            Ok((stream, addr, status))
        });

        match dialed {
            Ok((stream, addr, status)) => self.attach_destination(key, stream, addr, status),
            Err(err) => {
                warn!(%key, %target, error = %err, "dial failed");
                self.fail_dial(key);
            }
        }
    }

    /// Registers a freshly dialed destination and pairs it with its client.
    fn attach_destination(
        &mut self,
        client: Key,
        stream: TcpStream,
        addr: SocketAddr,
        status: DialStatus,
    ) {
        let Some(conn) = self.registry.get_mut(client) else {
            return;
        };
        let early = conn.early.take();

        let mut dest = Connection::destination(stream, addr, status == DialStatus::Connected);
        dest.pending.enqueue(&early);
        dest.interest = dest.desired_interest();

        let fd = dest.fd();
        let interest = dest.interest;
        let dest_key = self.registry.insert(dest);
        self.registry.pair(client, dest_key);

        if let Err(err) = self.poller.register(fd, dest_key.to_token(), interest) {
            warn!(%client, %addr, error = %err, "failed to watch destination");
            self.fail_dial(client);
            return;
        }

        debug!(%client, destination = %dest_key, %addr, ?status, "dialing");

        if status == DialStatus::Connected {
            self.establish(dest_key);
        }
    }

    /// Checks the outcome of an in-flight connect.
    fn complete_dial(&mut self, key: Key) {
        let Some(conn) = self.registry.get(key) else {
            return;
        };

        let client = conn.peer;
        let outcome = dialer::finish(&conn.stream, conn.addr);

        match outcome {
            Ok(()) => self.establish(key),
            Err(err) => {
                warn!(destination = %key, error = %err, "dial failed");

                match client {
                    Some(client) => self.fail_dial(client),
                    None => self.mark_closing(key),
                }
            }
        }
    }

    /// Moves a connected destination and its client into the tunnel.
    fn establish(&mut self, dest_key: Key) {
        let Some((dest, client)) = self.registry.with_peer_mut(dest_key) else {
            return;
        };

        dest.state = State::Tunnel;
        dest.connect_pending = false;

        client.state = State::Tunnel;
        client.pending.enqueue(CONNECTION_ESTABLISHED);

        info!(
            client = %client.addr,
            destination = %dest.addr,
            "tunnel established"
        );

        let client_key = dest.peer;
        self.touched.push(dest_key);
        self.touched.extend(client_key);
    }

    /// Writes as much pending data as the socket accepts.
    fn flush(&mut self, key: Key) {
        let Some(conn) = self.registry.get_mut(key) else {
            return;
        };

        // Never write to a destination before its connect is confirmed.
        if conn.connect_pending {
            return;
        }

        let mut writer = &conn.stream;
        match conn.pending.drain(&mut writer) {
            Drain::Flushed => {
                if conn.linger {
                    conn.mark_closing();
                }
            }
            Drain::Partial(n) => trace!(%key, written = n, left = conn.pending.len(), "short write"),
            Drain::Blocked => {}
            Drain::Failed(err) => {
                debug!(%key, error = %err, "write failed");
                self.close_pair(key);
            }
        }

        self.touched.push(key);
    }

    /// Drops the destination of a client whose dial failed and closes the
    /// client, optionally after a `502`.
    fn fail_dial(&mut self, client: Key) {
        if let Some(dest) = self.registry.unpair(client) {
            self.mark_closing(dest);
        }

        self.reject(client, BAD_GATEWAY);
    }

    /// Closes an unpaired client, answering with `response` first when
    /// error responses are enabled.
    fn reject(&mut self, key: Key, response: &[u8]) {
        if !self.config.error_responses {
            self.close_pair(key);
            return;
        }

        let Some(conn) = self.registry.get_mut(key) else {
            return;
        };

        conn.early.take();
        conn.head = None;
        conn.pending.enqueue(response);
        conn.linger = true;
        self.touched.push(key);
    }

    fn mark_closing(&mut self, key: Key) {
        if let Some(conn) = self.registry.get_mut(key) {
            conn.mark_closing();
            self.touched.push(key);
        }
    }

    /// Marks a connection and its peer for teardown.
    fn close_pair(&mut self, key: Key) {
        let peer = self.registry.peer_of(key);

        self.mark_closing(key);
        if let Some(peer) = peer {
            self.mark_closing(peer);
        }
    }

    /// Ends a dispatch: tears down closing connections and updates the
    /// interest of the others.
    fn settle(&mut self) {
        let mut touched = mem::take(&mut self.touched);

        for key in touched.drain(..) {
            let Some(conn) = self.registry.get_mut(key) else {
                continue;
            };

            if conn.is_closing() {
                self.teardown(key);
                continue;
            }

            if let Some(interest) = conn.refresh_interest() {
                let fd = conn.fd();

                if let Err(err) = self.poller.reregister(fd, key.to_token(), interest) {
                    warn!(%key, error = %err, "failed to update interest");
                    self.close_pair(key);
                    // Reaped on the next settle.
                    continue;
                }
            }
        }

        // Reuse the allocation; anything pushed meanwhile is kept.
        touched.append(&mut self.touched);
        self.touched = touched;

        if !self.touched.is_empty() {
            self.settle();
        }
    }

    /// Removes a connection: stop watching it, unlink its peer, close it.
    fn teardown(&mut self, key: Key) {
        let Some(conn) = self.registry.remove(key) else {
            return;
        };

        if let Err(err) = self.poller.deregister(conn.fd()) {
            trace!(%key, error = %err, "deregister failed");
        }

        debug!(%key, addr = %conn.addr, role = ?conn.role, "closed");
    }
}
