//! Keyed reuse of idle TCP connections.

use std::net::IpAddr;

use crate::network::Socket;

/// How far a pooled socket already got before it went idle.
///
/// A socket that traversed a CONNECT proxy is logically a pipe to the
/// origin; reusing it must not re-issue the tunnel handshake. The tag is
/// fixed at insertion so the invariant is checkable at every pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    /// Directly connected, or GET-forwarded through a proxy
    Plain,
    /// CONNECT handshake already completed; bytes reach the origin
    TunneledToOrigin,
}

/// An idle socket handed back by the pool.
#[derive(Debug)]
pub struct PooledSocket {
    /// The reusable connection
    pub socket: Socket,
    /// Tag recorded when the socket was donated
    pub kind: PoolKind,
}

#[derive(Debug)]
struct PoolEntry {
    host: String,
    addr: Option<IpAddr>,
    port: u16,
    socket: Socket,
    kind: PoolKind,
}

/// Cache of idle, reusable TCP connections keyed by endpoint.
///
/// At most one idle socket is kept per `(host, port)` key; popping
/// removes the entry. Lookups also match on the connection's resolved
/// address so a pooled socket can be found under any host alias.
#[derive(Debug, Default)]
pub struct SocketPool {
    entries: Vec<PoolEntry>,
}

impl SocketPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Donates an idle socket under the given endpoint key.
    ///
    /// Sockets that are no longer connected are discarded instead of
    /// pooled. A previous entry under the same key is replaced.
    pub fn push(&mut self, socket: Socket, host: &str, port: u16, kind: PoolKind) {
        if !socket.is_connected() {
            return;
        }
        self.entries
            .retain(|entry| !(entry.host == host && entry.port == port));
        self.entries.push(PoolEntry {
            host: host.to_string(),
            addr: socket.peer_addr().map(|peer| peer.ip()),
            port,
            socket,
            kind,
        });
    }

    /// Removes and returns the idle socket for `(host, port)`, if any.
    pub fn pop(&mut self, host: &str, port: u16) -> Option<PooledSocket> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.host == host && entry.port == port)?;
        let entry = self.entries.remove(index);
        Some(PooledSocket {
            socket: entry.socket,
            kind: entry.kind,
        })
    }

    /// Removes and returns an idle socket whose connection address matches
    /// any of `addrs` on the given port.
    pub fn pop_any(&mut self, addrs: &[IpAddr], port: u16) -> Option<PooledSocket> {
        let index = self.entries.iter().position(|entry| {
            entry.port == port && entry.addr.is_some_and(|addr| addrs.contains(&addr))
        })?;
        let entry = self.entries.remove(index);
        Some(PooledSocket {
            socket: entry.socket,
            kind: entry.kind,
        })
    }

    /// Number of idle sockets currently pooled.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no idle sockets are pooled.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use super::*;

    async fn connected_socket() -> (Socket, u16, tokio::net::TcpListener) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut socket = Socket::new();
        socket
            .establish_connection(IpAddr::V4(Ipv4Addr::LOCALHOST), port, Duration::from_secs(5))
            .await
            .unwrap();
        (socket, port, listener)
    }

    #[tokio::test]
    async fn test_pop_returns_pushed_socket_once() {
        let (socket, _, _listener) = connected_socket().await;
        let mut pool = SocketPool::new();

        pool.push(socket, "origin.example", 8080, PoolKind::Plain);
        assert_eq!(pool.len(), 1);

        let pooled = pool.pop("origin.example", 8080).unwrap();
        assert_eq!(pooled.kind, PoolKind::Plain);
        assert!(pool.is_empty());

        assert!(pool.pop("origin.example", 8080).is_none());
    }

    #[tokio::test]
    async fn test_pop_respects_port_in_key() {
        let (socket, _, _listener) = connected_socket().await;
        let mut pool = SocketPool::new();

        pool.push(socket, "origin.example", 8080, PoolKind::Plain);
        assert!(pool.pop("origin.example", 8081).is_none());
        assert!(pool.pop("other.example", 8080).is_none());
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_pop_any_matches_resolved_address() {
        let (socket, _, _listener) = connected_socket().await;
        let mut pool = SocketPool::new();
        pool.push(socket, "origin.example", 8080, PoolKind::Plain);

        let addrs = [
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
        ];
        assert!(pool.pop_any(&addrs, 8080).is_some());
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_tunneled_tag_survives_pooling() {
        let (socket, _, _listener) = connected_socket().await;
        let mut pool = SocketPool::new();

        pool.push(socket, "origin.example", 443, PoolKind::TunneledToOrigin);
        let pooled = pool.pop("origin.example", 443).unwrap();
        assert_eq!(pooled.kind, PoolKind::TunneledToOrigin);
    }

    #[test]
    fn test_disconnected_socket_is_not_pooled() {
        let mut pool = SocketPool::new();
        pool.push(Socket::new(), "origin.example", 8080, PoolKind::Plain);
        assert!(pool.is_empty());
    }
}
