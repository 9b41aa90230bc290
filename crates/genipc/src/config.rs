/// Default number of pending connections queued by a listening socket.
pub const DEFAULT_BACKLOG: i32 = 10;

/// Controls how a [`SocketFactory`](crate::SocketFactory) creates descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketConfig {
    /// Pending connection queue length passed to `listen`.
    pub backlog: i32,
    /// When true, `SO_REUSEADDR` is set before binding.
    pub reuse_address: bool,
    /// When true, accepted peers are reported as numeric host and port
    /// instead of going through reverse name lookup.
    pub numeric_peer_names: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            backlog: DEFAULT_BACKLOG,
            reuse_address: true,
            numeric_peer_names: false,
        }
    }
}
