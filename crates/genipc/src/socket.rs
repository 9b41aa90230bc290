use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::{AsFd, OwnedFd};

use tracing::{debug, info};

use crate::config::SocketConfig;
use crate::error::{IpcError, Result};
use crate::stream::StreamEndpoint;
use crate::sys;

enum FactoryState {
    Unbound,
    Listening { fd: OwnedFd, local: SocketAddrV4 },
    Closed,
}

/// IPv4 TCP listener and connector.
///
/// A factory starts unbound. [`bind`](Self::bind) moves it into the listening
/// state, after which [`accept`](Self::accept) can be called any number of
/// times. [`connect`](Self::connect) never touches the factory's own
/// descriptor: the connecting socket is created for that call and moved into
/// the returned [`StreamEndpoint`].
///
/// All calls block the current thread. There are no timeouts.
pub struct SocketFactory {
    state: FactoryState,
    port: u16,
    config: SocketConfig,
}

impl SocketFactory {
    /// Create an unbound factory with default configuration.
    pub fn new() -> Self {
        Self::with_config(SocketConfig::default())
    }

    /// Create an unbound factory with explicit configuration.
    pub fn with_config(config: SocketConfig) -> Self {
        Self {
            state: FactoryState::Unbound,
            port: 0,
            config,
        }
    }

    /// Connect to `host:port`, where `host` is a dotted-decimal IPv4 address.
    ///
    /// No name resolution is attempted. The endpoint reports `host` and `port`
    /// verbatim as its peer identity.
    pub fn connect(&self, host: &str, port: u16) -> Result<StreamEndpoint> {
        let ip: Ipv4Addr = host.parse().map_err(|_| IpcError::AddressFormat {
            host: host.to_string(),
        })?;
        let addr = SocketAddrV4::new(ip, port);

        let fd = sys::tcp_socket().map_err(IpcError::SocketCreation)?;
        sys::connect(fd.as_fd(), addr).map_err(|source| IpcError::Connect { addr, source })?;

        debug!(%addr, "connected");
        Ok(StreamEndpoint::new(fd, host.to_string(), port.to_string()))
    }

    /// Bind the wildcard address at `port` and start listening.
    ///
    /// Port `0` picks an ephemeral port; [`port`](Self::port) reports the one
    /// actually bound. A factory that is already listening closes its previous
    /// descriptor first. On failure the factory keeps whatever state it had
    /// before the call, except that a replaced listener stays closed.
    pub fn bind(&mut self, port: u16) -> Result<()> {
        let previous = match std::mem::replace(&mut self.state, FactoryState::Unbound) {
            FactoryState::Listening { local, .. } => {
                debug!(%local, "replacing listening socket");
                FactoryState::Unbound
            }
            other => other,
        };

        let (fd, local) = match self.open_listener(port) {
            Ok(listener) => listener,
            Err(err) => {
                self.state = previous;
                return Err(err);
            }
        };

        info!(%local, backlog = self.config.backlog, "listening on tcp socket");

        self.port = local.port();
        self.state = FactoryState::Listening { fd, local };
        Ok(())
    }

    fn open_listener(&self, port: u16) -> Result<(OwnedFd, SocketAddrV4)> {
        let fd = sys::tcp_socket().map_err(IpcError::SocketCreation)?;

        if self.config.reuse_address {
            sys::set_flag(fd.as_fd(), libc::SO_REUSEADDR, true).map_err(|source| {
                IpcError::SocketOption {
                    option: "SO_REUSEADDR",
                    source,
                }
            })?;
        }

        let requested = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        sys::bind(fd.as_fd(), requested).map_err(|source| IpcError::Bind { port, source })?;

        let backlog = self.config.backlog;
        sys::listen(fd.as_fd(), backlog).map_err(|source| IpcError::Listen {
            port,
            backlog,
            source,
        })?;

        let local =
            sys::local_addr(fd.as_fd()).map_err(|source| IpcError::Bind { port, source })?;
        Ok((fd, local))
    }

    /// Block until a peer connects and return its endpoint.
    ///
    /// The peer address is turned into host and service strings with
    /// `getnameinfo`; if that lookup fails the numeric form is used. The
    /// factory keeps listening afterwards.
    pub fn accept(&self) -> Result<StreamEndpoint> {
        let listener = match &self.state {
            FactoryState::Listening { fd, .. } => fd,
            FactoryState::Unbound => return Err(IpcError::NotListening),
            FactoryState::Closed => return Err(IpcError::Closed),
        };

        let (fd, peer) = sys::accept(listener.as_fd()).map_err(IpcError::Accept)?;

        let (host, serv) = match sys::name_info(peer, self.config.numeric_peer_names) {
            Ok(names) => names,
            Err(err) => {
                debug!(%peer, error = %err, "peer name lookup failed; using numeric form");
                (peer.ip().to_string(), peer.port().to_string())
            }
        };

        debug!(%peer, %host, %serv, "accepted connection");
        Ok(StreamEndpoint::new(fd, host, serv))
    }

    /// The local machine's hostname.
    pub fn hostname() -> Result<String> {
        sys::hostname().map_err(IpcError::Hostname)
    }

    /// Most recently bound port, or `0` if `bind` has never succeeded.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address of the listening socket, if listening.
    pub fn local_addr(&self) -> Option<SocketAddrV4> {
        match &self.state {
            FactoryState::Listening { local, .. } => Some(*local),
            _ => None,
        }
    }

    /// True while the factory holds a listening descriptor.
    pub fn is_listening(&self) -> bool {
        matches!(self.state, FactoryState::Listening { .. })
    }

    /// Close the listening descriptor. Calling this again is a no-op.
    ///
    /// A closed factory may be bound again.
    pub fn close(&mut self) {
        if let FactoryState::Listening { local, .. } =
            std::mem::replace(&mut self.state, FactoryState::Closed)
        {
            debug!(%local, "closed listening socket");
        }
    }

    /// Configuration used for new descriptors.
    pub fn config(&self) -> &SocketConfig {
        &self.config
    }
}

impl Default for SocketFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SocketFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            FactoryState::Unbound => "unbound",
            FactoryState::Listening { .. } => "listening",
            FactoryState::Closed => "closed",
        };
        f.debug_struct("SocketFactory")
            .field("state", &state)
            .field("port", &self.port)
            .field("config", &self.config)
            .finish()
    }
}
