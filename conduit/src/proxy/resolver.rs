//! Destination name resolution.
//!
//! Resolution is a blocking call. It either runs on the reactor thread
//! (stalling every other connection for its duration) or on a small pool of
//! worker threads that hand results back to the reactor through its command
//! channel.

use super::parser::HostPort;
use crate::error::{Error, Result};
use crate::reactor::command::Command;
use crate::reactor::ReactorHandle;
use crate::utils::Key;

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

/// Turns a requested destination into an address to dial.
pub trait Resolve: Send + Sync + 'static {
    fn resolve(&self, target: &HostPort) -> Result<SocketAddr>;
}

/// Resolver backed by the system's `getaddrinfo`, via [`ToSocketAddrs`].
///
/// The first address returned is used.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve(&self, target: &HostPort) -> Result<SocketAddr> {
        let mut addrs = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(|source| Error::Resolve {
                host: target.host.clone(),
                port: target.port,
                source,
            })?;

        addrs.next().ok_or_else(|| Error::NoAddress {
            host: target.host.clone(),
            port: target.port,
        })
    }
}

struct Job {
    key: Key,
    target: HostPort,
}

/// Fixed set of threads resolving names off the reactor thread.
///
/// Each result is sent back as [`Command::Resolved`] and the reactor is
/// woken to apply it, so connection state is still only touched by the
/// reactor.
pub(crate) struct ResolverPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ResolverPool {
    pub(crate) fn new(
        threads: usize,
        resolver: Arc<dyn Resolve>,
        reactor: ReactorHandle,
    ) -> io::Result<Self> {
        let (sender, receiver) = channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(threads);

        for id in 0..threads {
            let receiver = receiver.clone();
            let resolver = resolver.clone();
            let reactor = reactor.clone();

            let worker = thread::Builder::new()
                .name(format!("conduit-resolver-{id}"))
                .spawn(move || run_worker(receiver, resolver, reactor))?;

            workers.push(worker);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Queues `target` for resolution on behalf of connection `key`.
    ///
    /// Fails once every worker has exited; the job is then dropped and no
    /// result will ever arrive for `key`.
    pub(crate) fn submit(&self, key: Key, target: HostPort) -> Result<()> {
        let sender = self.sender.as_ref().ok_or(Error::ResolverUnavailable)?;

        sender
            .send(Job { key, target })
            .map_err(|_| Error::ResolverUnavailable)
    }
}

fn run_worker(receiver: Arc<Mutex<Receiver<Job>>>, resolver: Arc<dyn Resolve>, reactor: ReactorHandle) {
    loop {
        let job = {
            let Ok(receiver) = receiver.lock() else {
                return;
            };
            match receiver.recv() {
                Ok(job) => job,
                Err(_) => return,
            }
        };

        trace!(key = %job.key, target = %job.target, "resolving");

        // A panicking resolver fails this lookup only; the worker keeps going.
        let result = panic::catch_unwind(AssertUnwindSafe(|| resolver.resolve(&job.target)))
            .unwrap_or_else(|_| {
                warn!(target = %job.target, "resolver panicked");
                Err(Error::ResolverPanicked {
                    host: job.target.host.clone(),
                    port: job.target.port,
                })
            });

        let command = Command::Resolved {
            key: job.key,
            target: job.target,
            result,
        };

        if reactor.send(command).is_err() {
            debug!("reactor gone, resolver worker exiting");
            return;
        }
    }
}

impl Drop for ResolverPool {
    /// Closes the job queue and waits for the workers to finish their
    /// current lookup.
    fn drop(&mut self) {
        self.sender.take();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
