use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddrV4};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use tracing::debug;

use crate::error::{IpcError, Result};
use crate::plain::{as_bytes, as_bytes_mut, Plain};
use crate::sys;

/// Size of the single buffer used by [`StreamEndpoint::recv_string`].
pub const TEXT_CHUNK_SIZE: usize = 1024;

/// One established TCP connection.
///
/// Produced only by [`SocketFactory::connect`](crate::SocketFactory::connect)
/// and [`SocketFactory::accept`](crate::SocketFactory::accept). The endpoint
/// exclusively owns its descriptor; [`close`](Self::close) is idempotent and
/// dropping an open endpoint closes it.
///
/// Every call is a single blocking `send`/`recv`. Nothing here frames
/// messages: partial writes and short reads are returned to the caller as-is.
/// Use the [`Read`]/[`Write`] implementations (`read_exact`, `write_all`) when
/// whole buffers must be transferred.
pub struct StreamEndpoint {
    fd: Option<OwnedFd>,
    host: String,
    serv: String,
}

impl StreamEndpoint {
    pub(crate) fn new(fd: OwnedFd, host: String, serv: String) -> Self {
        Self {
            fd: Some(fd),
            host,
            serv,
        }
    }

    fn fd(&self) -> Result<BorrowedFd<'_>> {
        self.fd.as_ref().map(AsFd::as_fd).ok_or(IpcError::Closed)
    }

    /// True while the endpoint still holds its descriptor.
    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    /// Send bytes with one `send` call; returns the number actually sent.
    pub fn send(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(sys::send(self.fd()?, buf)?)
    }

    /// Send the UTF-8 bytes of `text` with one `send` call.
    pub fn send_str(&mut self, text: &str) -> Result<usize> {
        self.send(text.as_bytes())
    }

    /// Send the raw in-memory bytes of `value`.
    ///
    /// The receiver must use an identical layout; see [`Plain`].
    pub fn send_value<T: Plain>(&mut self, value: &T) -> Result<usize> {
        self.send(as_bytes(std::slice::from_ref(value)))
    }

    /// Send the raw in-memory bytes of `values`.
    pub fn send_slice<T: Plain>(&mut self, values: &[T]) -> Result<usize> {
        self.send(as_bytes(values))
    }

    /// Receive into `buf` with one `recv` call.
    ///
    /// `Ok(0)` means the peer shut down its side of the connection.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(sys::recv(self.fd()?, buf)?)
    }

    /// Receive at most [`TEXT_CHUNK_SIZE`] bytes and replace `out` with them.
    ///
    /// Only one `recv` call is made, so longer messages are truncated to the
    /// first chunk and the rest stays queued on the socket. Invalid UTF-8 is
    /// replaced lossily. On end of stream `out` is left empty.
    pub fn recv_string(&mut self, out: &mut String) -> Result<usize> {
        let mut chunk = [0u8; TEXT_CHUNK_SIZE];
        let read = self.recv(&mut chunk)?;
        out.clear();
        out.push_str(&String::from_utf8_lossy(&chunk[..read]));
        Ok(read)
    }

    /// Receive raw bytes into `value`.
    ///
    /// A short read leaves the tail of `value` unchanged; compare the returned
    /// count against `size_of::<T>()`.
    pub fn recv_value<T: Plain>(&mut self, value: &mut T) -> Result<usize> {
        self.recv(as_bytes_mut(std::slice::from_mut(value)))
    }

    /// Receive raw bytes into `values`.
    pub fn recv_slice<T: Plain>(&mut self, values: &mut [T]) -> Result<usize> {
        self.recv(as_bytes_mut(values))
    }

    /// Peer host captured when the endpoint was created.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Peer service (port) captured when the endpoint was created.
    pub fn serv(&self) -> &str {
        &self.serv
    }

    /// Local address of the connection.
    pub fn local_addr(&self) -> Result<SocketAddrV4> {
        Ok(sys::local_addr(self.fd()?)?)
    }

    /// Remote address of the connection.
    pub fn peer_addr(&self) -> Result<SocketAddrV4> {
        Ok(sys::peer_addr(self.fd()?)?)
    }

    /// Shut down one or both halves without releasing the descriptor.
    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        Ok(sys::shutdown(self.fd()?, how)?)
    }

    /// Close the descriptor. Calling this again is a no-op.
    pub fn close(&mut self) {
        if let Some(fd) = self.fd.take() {
            debug!(host = %self.host, serv = %self.serv, "closing stream endpoint");
            drop(fd);
        }
    }
}

impl Read for StreamEndpoint {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.recv(buf).map_err(Into::into)
    }
}

impl Write for StreamEndpoint {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.send(buf).map_err(Into::into)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl AsRawFd for StreamEndpoint {
    /// Returns `-1` once the endpoint is closed.
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_ref().map_or(-1, AsRawFd::as_raw_fd)
    }
}

impl std::fmt::Debug for StreamEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEndpoint")
            .field("fd", &self.as_raw_fd())
            .field("host", &self.host)
            .field("serv", &self.serv)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Connected pair built directly from the libc helpers.
    fn pair() -> (StreamEndpoint, StreamEndpoint) {
        let listener = sys::tcp_socket().unwrap();
        sys::bind(
            listener.as_fd(),
            SocketAddrV4::new(std::net::Ipv4Addr::LOCALHOST, 0),
        )
        .unwrap();
        sys::listen(listener.as_fd(), 1).unwrap();
        let addr = sys::local_addr(listener.as_fd()).unwrap();

        let client = sys::tcp_socket().unwrap();
        sys::connect(client.as_fd(), addr).unwrap();
        let (server, peer) = sys::accept(listener.as_fd()).unwrap();

        (
            StreamEndpoint::new(client, "127.0.0.1".into(), addr.port().to_string()),
            StreamEndpoint::new(server, peer.ip().to_string(), peer.port().to_string()),
        )
    }

    #[test]
    fn send_and_recv_bytes() {
        let (mut client, mut server) = pair();
        assert_eq!(client.send(b"hello").unwrap(), 5);

        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn recv_string_replaces_previous_contents() {
        let (mut client, mut server) = pair();
        client.send_str("ping").unwrap();

        let mut text = String::from("stale contents");
        assert_eq!(server.recv_string(&mut text).unwrap(), 4);
        assert_eq!(text, "ping");
    }

    #[test]
    fn recv_returns_zero_after_peer_close() {
        let (mut client, mut server) = pair();
        client.close();

        let mut text = String::from("stale");
        assert_eq!(server.recv_string(&mut text).unwrap(), 0);
        assert!(text.is_empty());
    }

    #[test]
    fn close_is_idempotent() {
        let (mut client, _server) = pair();
        assert!(client.is_open());
        client.close();
        client.close();
        assert!(!client.is_open());
        assert_eq!(client.as_raw_fd(), -1);
    }

    #[test]
    fn operations_after_close_fail() {
        let (mut client, _server) = pair();
        client.close();

        assert!(matches!(client.send(b"x"), Err(IpcError::Closed)));
        let mut buf = [0u8; 1];
        assert!(matches!(client.recv(&mut buf), Err(IpcError::Closed)));
        assert!(matches!(client.local_addr(), Err(IpcError::Closed)));

        let err = client.write(b"x").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotConnected);
    }

    #[test]
    fn typed_values_round_trip() {
        let (mut client, mut server) = pair();
        let sent: u64 = 0x0102_0304_0506_0708;
        assert_eq!(client.send_value(&sent).unwrap(), 8);

        let mut received = 0u64;
        assert_eq!(server.recv_value(&mut received).unwrap(), 8);
        assert_eq!(received, sent);
    }

    #[test]
    fn shutdown_write_signals_end_of_stream() {
        let (client, mut server) = pair();
        client.shutdown(Shutdown::Write).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(server.recv(&mut buf).unwrap(), 0);
        assert!(client.is_open());
    }

    #[test]
    fn addresses_match_across_pair() {
        let (client, server) = pair();
        assert_eq!(client.local_addr().unwrap(), server.peer_addr().unwrap());
        assert_eq!(client.peer_addr().unwrap(), server.local_addr().unwrap());
    }
}
