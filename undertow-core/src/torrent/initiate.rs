//! TCP establishment toward a leased peer.

use std::rc::Rc;

use async_trait::async_trait;

use crate::download::{DownloadError, PieceStore, RequestGroup};
use crate::engine::{Command, CommandScope, Cuid, EngineContext, Execution};
use crate::network::Socket;
use crate::torrent::peer::{Peer, PeerStore};
use crate::torrent::runtime::BtRuntime;
use crate::torrent::BtContext;

enum Phase {
    Connect,
    Session { socket: Socket },
}

/// Opens the TCP connection to one leased peer and holds it for the
/// exchange layer.
///
/// Establishment failures are peer churn, not download failures: the
/// peer is released back to the store and the command ends quietly.
/// Once connected, the command parks as the connection's owner and
/// closes the socket cooperatively when the runtime halts; the piece
/// exchange itself happens outside this crate.
pub struct PeerInitiateConnectionCommand {
    cuid: Cuid,
    scope: CommandScope,
    peer: Rc<Peer>,
    bt: Rc<BtContext>,
    runtime: Rc<BtRuntime>,
    peer_store: Rc<PeerStore>,
    piece_store: Rc<PieceStore>,
    phase: Phase,
}

impl PeerInitiateConnectionCommand {
    /// Creates the command for a peer already leased under `cuid`.
    pub fn new(
        cuid: Cuid,
        group: Rc<RequestGroup>,
        peer: Rc<Peer>,
        bt: Rc<BtContext>,
        runtime: Rc<BtRuntime>,
        peer_store: Rc<PeerStore>,
        piece_store: Rc<PieceStore>,
    ) -> Self {
        Self {
            cuid,
            scope: CommandScope::attach(group),
            peer,
            bt,
            runtime,
            peer_store,
            piece_store,
            phase: Phase::Connect,
        }
    }

    fn disconnect(&mut self, socket: &mut Socket) {
        socket.close();
        self.runtime.decrease_connections();
        self.peer_store.return_peer(&self.peer);
    }
}

#[async_trait(?Send)]
impl Command for PeerInitiateConnectionCommand {
    fn cuid(&self) -> Cuid {
        self.cuid
    }

    async fn execute(&mut self, ctx: &mut EngineContext) -> Result<Execution, DownloadError> {
        match std::mem::replace(&mut self.phase, Phase::Connect) {
            Phase::Connect => {
                if self.runtime.is_halt() {
                    self.peer_store.return_peer(&self.peer);
                    return Ok(Execution::Done);
                }
                let address = self.peer.address();
                let timeout = ctx.config().bt.peer_connect_timeout;
                let mut socket = Socket::new();
                match socket
                    .establish_connection(address.ip(), address.port(), timeout)
                    .await
                {
                    Ok(()) => {
                        self.runtime.increase_connections();
                        tracing::info!(
                            "command {}: peer {} connected for {} ({} up)",
                            self.cuid,
                            address,
                            self.bt.info_hash().short_hex(),
                            self.runtime.connections()
                        );
                        self.phase = Phase::Session { socket };
                        Ok(Execution::Requeue)
                    }
                    Err(error) => {
                        tracing::debug!(
                            "command {}: peer {} unreachable: {}",
                            self.cuid,
                            address,
                            error
                        );
                        self.peer_store.return_peer(&self.peer);
                        Ok(Execution::Done)
                    }
                }
            }
            Phase::Session { mut socket } => {
                if self.runtime.is_halt() || self.piece_store.download_finished() {
                    self.disconnect(&mut socket);
                    return Ok(Execution::Done);
                }
                self.phase = Phase::Session { socket };
                Ok(Execution::Requeue)
            }
        }
    }

    fn request_group(&self) -> Option<&Rc<RequestGroup>> {
        Some(self.scope.group())
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use super::*;
    use crate::config::UndertowConfig;
    use crate::engine::DownloadEngine;
    use crate::torrent::InfoHash;

    struct Fixture {
        engine: DownloadEngine,
        command: PeerInitiateConnectionCommand,
        peer: Rc<Peer>,
        peer_store: Rc<PeerStore>,
        runtime: Rc<BtRuntime>,
    }

    fn fixture(address: SocketAddr) -> Fixture {
        let config = Rc::new(UndertowConfig::default());
        let mut engine = DownloadEngine::new(Rc::clone(&config));
        let group = Rc::new(RequestGroup::new(Rc::clone(&config), Vec::new()));
        let runtime = Rc::new(BtRuntime::new(55, 40));
        let peer_store = Rc::new(PeerStore::new());
        let peer = Rc::new(Peer::new(address));
        peer_store.add_peer(Rc::clone(&peer));
        let cuid = engine.context_mut().new_cuid();
        peer.set_used_by(cuid);
        let command = PeerInitiateConnectionCommand::new(
            cuid,
            group,
            Rc::clone(&peer),
            Rc::new(BtContext::new(InfoHash::new([3u8; 20]))),
            Rc::clone(&runtime),
            Rc::clone(&peer_store),
            Rc::new(PieceStore::new(16384, 1024 * 1024)),
        );
        Fixture {
            engine,
            command,
            peer,
            peer_store,
            runtime,
        }
    }

    #[tokio::test]
    async fn test_connect_success_counts_connection_and_holds() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let mut fixture = fixture(address);

        let execution = fixture
            .command
            .execute(fixture.engine.context_mut())
            .await
            .unwrap();

        assert_eq!(execution, Execution::Requeue);
        assert_eq!(fixture.runtime.connections(), 1);
        assert!(fixture.peer.is_in_use());
    }

    #[tokio::test]
    async fn test_connect_failure_returns_peer_quietly() {
        // Port 1 is almost certainly closed locally
        let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1);
        let mut fixture = fixture(address);

        let execution = fixture
            .command
            .execute(fixture.engine.context_mut())
            .await
            .unwrap();

        assert_eq!(execution, Execution::Done);
        assert_eq!(fixture.runtime.connections(), 0);
        assert!(!fixture.peer.is_in_use());
        assert!(fixture.peer_store.is_peer_available());
    }

    #[tokio::test]
    async fn test_halt_closes_held_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let mut fixture = fixture(address);

        fixture
            .command
            .execute(fixture.engine.context_mut())
            .await
            .unwrap();
        assert_eq!(fixture.runtime.connections(), 1);

        fixture.runtime.request_halt();
        let execution = fixture
            .command
            .execute(fixture.engine.context_mut())
            .await
            .unwrap();

        assert_eq!(execution, Execution::Done);
        assert_eq!(fixture.runtime.connections(), 0);
        assert!(!fixture.peer.is_in_use());
    }
}
