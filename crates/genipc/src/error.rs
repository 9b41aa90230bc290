use std::net::SocketAddrV4;
use std::path::PathBuf;

/// Errors that can occur in socket and shared memory operations.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// The OS refused to allocate a socket descriptor.
    #[error("failed to create socket: {0}")]
    SocketCreation(std::io::Error),

    /// The host is not a dotted-decimal IPv4 address.
    #[error("invalid IPv4 address: {host:?}")]
    AddressFormat { host: String },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddrV4,
        source: std::io::Error,
    },

    /// Failed to bind to the specified port.
    #[error("failed to bind to port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },

    /// Failed to enter the listening state.
    #[error("failed to listen on port {port} (backlog {backlog}): {source}")]
    Listen {
        port: u16,
        backlog: i32,
        source: std::io::Error,
    },

    /// Failed to set a socket option.
    #[error("failed to set socket option {option}: {source}")]
    SocketOption {
        option: &'static str,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// `accept` was called before `bind`.
    #[error("socket factory is not listening")]
    NotListening,

    /// The descriptor has already been closed.
    #[error("descriptor already closed")]
    Closed,

    /// Failed to read the local hostname.
    #[error("failed to read hostname: {0}")]
    Hostname(std::io::Error),

    /// Segment ids must be in `1..=255`.
    #[error("invalid segment id {id} (must be 1..=255)")]
    InvalidSegmentId { id: u32 },

    /// The segment path does not exist or cannot be hashed into a key.
    #[error("invalid segment path {path}: {source}")]
    InvalidSegmentPath {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The OS declined to create or look up the segment.
    #[error("failed to create segment (key {key:#x}, {size} bytes): {source}")]
    SegmentCreation {
        key: i32,
        size: usize,
        source: std::io::Error,
    },

    /// The attached type does not fit in the segment.
    #[error("type of {needed} bytes does not fit in segment of {size} bytes")]
    SegmentTooSmall { needed: usize, size: usize },

    /// Failed to map the segment into the address space.
    #[error("failed to attach segment {shmid}: {source}")]
    Attach { shmid: i32, source: std::io::Error },

    /// A byte range falls outside the mapped segment.
    #[error("range {offset}..{end} out of bounds for segment of {size} bytes")]
    OutOfBounds {
        offset: usize,
        end: usize,
        size: usize,
    },

    /// An I/O error occurred on a connected stream.
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IpcError>;

impl From<IpcError> for std::io::Error {
    fn from(err: IpcError) -> Self {
        match err {
            IpcError::Io(io) => io,
            IpcError::Closed => std::io::Error::new(std::io::ErrorKind::NotConnected, IpcError::Closed),
            other => std::io::Error::other(other),
        }
    }
}
