//! TCP endpoint abstraction used by connection-initiation commands.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::download::DownloadError;

/// Socket lifecycle state.
///
/// A socket moves forward through these states only; a closed socket
/// is never reconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketState {
    /// Constructed, no OS connection yet
    #[default]
    Created,
    /// Connect in flight
    Connecting,
    /// Established and usable
    Connected,
    /// Torn down; reads and writes fail
    Closed,
}

/// Owned TCP connection to one remote endpoint.
///
/// Wraps the OS stream together with its lifecycle state so pooled and
/// in-flight sockets can be told apart without touching the fd.
#[derive(Debug, Default)]
pub struct Socket {
    state: SocketState,
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
}

impl Socket {
    /// Creates an unconnected socket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects to `addr:port`, failing after `timeout`.
    ///
    /// # Errors
    ///
    /// - `DownloadError::ConnectTimeout` - SYN deadline exceeded
    /// - `DownloadError::Network` - connection refused or other socket error
    pub async fn establish_connection(
        &mut self,
        addr: IpAddr,
        port: u16,
        timeout: Duration,
    ) -> Result<(), DownloadError> {
        let target = SocketAddr::new(addr, port);
        self.state = SocketState::Connecting;

        match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true).ok();
                self.stream = Some(stream);
                self.peer = Some(target);
                self.state = SocketState::Connected;
                Ok(())
            }
            Ok(Err(source)) => {
                self.state = SocketState::Closed;
                Err(DownloadError::Network(source))
            }
            Err(_) => {
                self.state = SocketState::Closed;
                Err(DownloadError::ConnectTimeout {
                    addr: target,
                    timeout,
                })
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Returns true once the connection is established.
    pub fn is_connected(&self) -> bool {
        self.state == SocketState::Connected
    }

    /// Remote endpoint, once connected.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Writes the whole buffer to the connection.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` - connection not established, reset, or closed by
    ///   the remote
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let stream = self.stream.as_mut().ok_or(io::ErrorKind::NotConnected)?;
        stream.write_all(buf).await
    }

    /// Reads available bytes into the buffer, returning the count.
    ///
    /// A return of 0 means the remote closed the connection.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` - connection not established or read failed
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let stream = self.stream.as_mut().ok_or(io::ErrorKind::NotConnected)?;
        stream.read(buf).await
    }

    /// Drops the OS connection and marks the socket closed.
    pub fn close(&mut self) {
        self.stream = None;
        self.state = SocketState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn test_new_socket_is_unconnected() {
        let socket = Socket::new();
        assert_eq!(socket.state(), SocketState::Created);
        assert!(!socket.is_connected());
        assert!(socket.peer_addr().is_none());
    }

    #[tokio::test]
    async fn test_connect_to_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut socket = Socket::new();
        socket
            .establish_connection(IpAddr::V4(Ipv4Addr::LOCALHOST), port, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(socket.is_connected());
        assert_eq!(socket.peer_addr().unwrap().port(), port);

        socket.close();
        assert_eq!(socket.state(), SocketState::Closed);
    }

    #[tokio::test]
    async fn test_connect_refused_reports_network_error() {
        // Port 1 is almost certainly closed locally
        let mut socket = Socket::new();
        let result = socket
            .establish_connection(IpAddr::V4(Ipv4Addr::LOCALHOST), 1, Duration::from_secs(5))
            .await;

        assert!(matches!(result, Err(DownloadError::Network(_))));
        assert_eq!(socket.state(), SocketState::Closed);
    }

    #[tokio::test]
    async fn test_write_without_connection_fails() {
        let mut socket = Socket::new();
        let result = socket.write_all(b"hello").await;
        assert!(result.is_err());
    }
}
