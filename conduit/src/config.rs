//! Proxy configuration.

use crate::error::{Error, Result};

use std::net::{Ipv4Addr, SocketAddr};

/// Port the proxy listens on when none is configured.
pub const DEFAULT_PORT: u16 = 8080;

/// Settings consumed by [`Reactor::new`](crate::Reactor::new).
///
/// Build one with [`ProxyBuilder`]; the defaults listen on `0.0.0.0:8080`,
/// resolve destinations on four background threads, and close failed
/// connections silently.
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// Address the listening socket binds to.
    pub(crate) listen_addr: SocketAddr,

    /// Maximum readiness events handled per poll.
    pub(crate) max_events: usize,

    /// Size of the scratch buffer used for each `read(2)`.
    pub(crate) read_buffer_size: usize,

    /// Resolver worker threads; `0` resolves inline on the reactor thread.
    pub(crate) resolver_threads: usize,

    /// Whether to answer failed requests with `400`/`502` before closing.
    pub(crate) error_responses: bool,
}

impl ProxyConfig {
    /// Address the listening socket binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Number of resolver worker threads (`0` means inline resolution).
    pub fn resolver_threads(&self) -> usize {
        self.resolver_threads
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_events: 64,
            read_buffer_size: 4096,
            resolver_threads: 4,
            error_responses: false,
        }
    }
}

/// Builder for configuring a proxy before binding it.
///
/// # Examples
///
/// ```rust,ignore
/// let config = ProxyBuilder::new()
///     .listen_addr("127.0.0.1:3128".parse()?)
///     .resolver_threads(0)
///     .build()?;
/// ```
#[derive(Debug, Default)]
pub struct ProxyBuilder {
    config: ProxyConfig,
}

impl ProxyBuilder {
    /// Creates a builder holding the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the address to listen on.
    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.config.listen_addr = addr;
        self
    }

    /// Sets the maximum number of readiness events handled per poll.
    pub fn max_events(mut self, n: usize) -> Self {
        self.config.max_events = n;
        self
    }

    /// Sets the size of the per-read scratch buffer.
    pub fn read_buffer_size(mut self, n: usize) -> Self {
        self.config.read_buffer_size = n;
        self
    }

    /// Sets the number of resolver worker threads.
    ///
    /// With `0`, destination names are resolved on the reactor thread and
    /// every lookup stalls all other connections until it returns.
    pub fn resolver_threads(mut self, n: usize) -> Self {
        self.config.resolver_threads = n;
        self
    }

    /// Answers parse failures with `400` and dial failures with `502`.
    pub fn error_responses(mut self, enabled: bool) -> Self {
        self.config.error_responses = enabled;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<ProxyConfig> {
        if self.config.max_events == 0 {
            return Err(Error::Config("max_events must be > 0".into()));
        }
        if self.config.read_buffer_size == 0 {
            return Err(Error::Config("read_buffer_size must be > 0".into()));
        }

        Ok(self.config)
    }
}
