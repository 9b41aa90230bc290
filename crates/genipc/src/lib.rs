//! Blocking TCP stream and System V shared memory primitives.
//!
//! genipc gives direct, minimal-overhead access to two transports, with no
//! framing or serialization layered on top:
//!
//! - [`SharedMemorySegment`]: a System V segment identified by a
//!   `(path, id)` pair, attached as typed [`Mapping`]s
//! - [`StreamEndpoint`]: one connected TCP stream with raw and typed
//!   send/receive
//! - [`SocketFactory`]: an IPv4 listener/connector producing endpoints
//!
//! Everything blocks the calling thread. Every failure is reported once as an
//! [`IpcError`]; retries are left to the caller.
//!
//! Typed transfers move the in-memory bytes of [`Plain`] values and are only
//! meaningful between peers that share the exact binary layout.

pub mod config;
pub mod error;
pub mod plain;

#[cfg(unix)]
pub mod shm;
#[cfg(unix)]
pub mod socket;
#[cfg(unix)]
pub mod stream;
#[cfg(unix)]
mod sys;

#[cfg(feature = "logging")]
pub mod logging;

pub use config::{SocketConfig, DEFAULT_BACKLOG};
pub use error::{IpcError, Result};
pub use plain::Plain;

#[cfg(unix)]
pub use shm::{Mapping, SegmentId, SharedMemorySegment, DEFAULT_SEGMENT_MODE};
#[cfg(unix)]
pub use socket::SocketFactory;
#[cfg(unix)]
pub use stream::{StreamEndpoint, TEXT_CHUNK_SIZE};
