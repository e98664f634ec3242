//! Periodic admission control over the outbound peer-connection set.

use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::Checkpoint;
use crate::download::{DownloadError, PieceStore, RequestGroup};
use crate::engine::{Command, CommandScope, Cuid, EngineContext, Execution};
use crate::torrent::announce::{BtAnnounce, DEFAULT_ANNOUNCE_INTERVAL};
use crate::torrent::initiate::PeerInitiateConnectionCommand;
use crate::torrent::peer::{Peer, PeerStore};
use crate::torrent::runtime::BtRuntime;
use crate::torrent::BtContext;

/// Share of the upload cap a seeder may fill before it stops inviting
/// more peers.
const SEED_UPLOAD_HEADROOM: f64 = 0.8;

/// Periodic command that keeps enough peer connections open to sustain
/// the target throughput without exceeding the configured caps.
///
/// Every tick is independent: the command either terminates on halt,
/// waits for its check interval, or evaluates the seeder/leecher
/// admission rule and opens up to one batch of new connections.
pub struct ActivePeerConnectionCommand {
    cuid: Cuid,
    scope: CommandScope,
    bt: Rc<BtContext>,
    runtime: Rc<BtRuntime>,
    peer_store: Rc<PeerStore>,
    piece_store: Rc<PieceStore>,
    announce: Rc<BtAnnounce>,
    interval: Duration,
    checkpoint: Checkpoint,
    batch: usize,
}

impl ActivePeerConnectionCommand {
    /// Creates the controller for one swarm.
    ///
    /// The check interval and batch size come from the group's
    /// configuration snapshot.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cuid: Cuid,
        group: Rc<RequestGroup>,
        bt: Rc<BtContext>,
        runtime: Rc<BtRuntime>,
        peer_store: Rc<PeerStore>,
        piece_store: Rc<PieceStore>,
        announce: Rc<BtAnnounce>,
    ) -> Self {
        let interval = group.config().bt.check_interval;
        let batch = group.config().bt.new_connection_batch;
        Self {
            cuid,
            scope: CommandScope::attach(group),
            bt,
            runtime,
            peer_store,
            piece_store,
            announce,
            interval,
            checkpoint: Checkpoint::new(),
            batch,
        }
    }

    /// How many connections this tick may open.
    ///
    /// A seeder only grows up to the hard peer cap; a leecher always
    /// requests a full batch and relies on the cap being enforced at
    /// admission elsewhere.
    fn connection_budget(&self, finished: bool) -> usize {
        if finished {
            let connections = self.runtime.connections();
            let max = self.runtime.max_peers();
            if max > connections {
                self.batch.min((max - connections) as usize)
            } else {
                0
            }
        } else {
            self.batch
        }
    }

    /// Leases a fresh cuid to the peer and schedules its connection.
    fn connect_to_peer(&self, ctx: &mut EngineContext, peer: Rc<Peer>) {
        let peer_cuid = ctx.new_cuid();
        peer.set_used_by(peer_cuid);
        let command = PeerInitiateConnectionCommand::new(
            peer_cuid,
            Rc::clone(self.scope.group()),
            Rc::clone(&peer),
            Rc::clone(&self.bt),
            Rc::clone(&self.runtime),
            Rc::clone(&self.peer_store),
            Rc::clone(&self.piece_store),
        );
        ctx.enqueue(Box::new(command));
        tracing::info!("command {}: connecting to peer {}", self.cuid, peer.address());
    }
}

#[async_trait(?Send)]
impl Command for ActivePeerConnectionCommand {
    fn cuid(&self) -> Cuid {
        self.cuid
    }

    async fn execute(&mut self, ctx: &mut EngineContext) -> Result<Execution, DownloadError> {
        if self.runtime.is_halt() {
            tracing::debug!(
                "command {}: halt, stopping peer admission for {}",
                self.cuid,
                self.bt.info_hash().short_hex()
            );
            return Ok(Execution::Done);
        }
        if !self.checkpoint.elapsed(self.interval) {
            return Ok(Execution::Requeue);
        }
        self.checkpoint.reset();

        let group = self.scope.group();
        let tstat = group.calculate_stat();
        let max_download_limit = group.max_download_speed_limit();
        let max_upload_limit = group.max_upload_speed_limit();
        let mut threshold_speed = ctx.config().bt.request_peer_speed_limit;
        if max_download_limit > 0 {
            threshold_speed = threshold_speed.min(max_download_limit);
        }

        let finished = self.piece_store.download_finished();
        let seeding_wants_more = finished
            && self.runtime.less_than_max_peers()
            && (max_upload_limit == 0
                || (tstat.upload_speed as f64) < max_upload_limit as f64 * SEED_UPLOAD_HEADROOM);
        let leeching_wants_more = !finished
            && (tstat.download_speed < threshold_speed || self.runtime.less_than_min_peers());

        if seeding_wants_more || leeching_wants_more {
            let mut remaining = self.connection_budget(finished);
            while remaining > 0 && self.peer_store.is_peer_available() {
                if let Some(peer) = self.peer_store.unused_peer() {
                    self.connect_to_peer(ctx, peer);
                }
                remaining -= 1;
            }
            if self.runtime.connections() == 0 && !finished {
                self.announce.override_min_interval(DEFAULT_ANNOUNCE_INTERVAL);
            }
        }

        Ok(Execution::Requeue)
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

    struct Swarm {
        engine: DownloadEngine,
        controller: ActivePeerConnectionCommand,
        group: Rc<RequestGroup>,
        runtime: Rc<BtRuntime>,
        peer_store: Rc<PeerStore>,
        piece_store: Rc<PieceStore>,
        announce: Rc<BtAnnounce>,
    }

    fn swarm(config: UndertowConfig, peers: usize, finished: bool) -> Swarm {
        let config = Rc::new(config);
        let mut engine = DownloadEngine::new(Rc::clone(&config));
        let group = Rc::new(RequestGroup::new(Rc::clone(&config), Vec::new()));
        let runtime = Rc::new(BtRuntime::new(config.bt.max_peers, config.bt.min_peers));
        let peer_store = Rc::new(PeerStore::new());
        for index in 0..peers {
            peer_store.add_peer(Rc::new(Peer::new(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, index as u8 + 1)),
                6881,
            ))));
        }
        let piece_store = Rc::new(PieceStore::new(16384, 1024 * 1024));
        if finished {
            piece_store.mark_all_pieces_done();
        }
        let announce = Rc::new(BtAnnounce::new(Duration::from_secs(1800)));
        let cuid = engine.context_mut().new_cuid();
        let controller = ActivePeerConnectionCommand::new(
            cuid,
            Rc::clone(&group),
            Rc::new(BtContext::new(InfoHash::new([7u8; 20]))),
            Rc::clone(&runtime),
            Rc::clone(&peer_store),
            Rc::clone(&piece_store),
            Rc::clone(&announce),
        );
        Swarm {
            engine,
            controller,
            group,
            runtime,
            peer_store,
            piece_store,
            announce,
        }
    }

    fn eager_config() -> UndertowConfig {
        let mut config = UndertowConfig::default();
        // Zero interval so the first tick already evaluates
        config.bt.check_interval = Duration::ZERO;
        config.bt.request_peer_speed_limit = 1_000_000;
        config.bt.min_peers = 20;
        config
    }

    #[tokio::test]
    async fn test_leecher_opens_one_batch_and_nudges_announce() {
        let mut swarm = swarm(eager_config(), 10, false);

        let execution = swarm
            .controller
            .execute(swarm.engine.context_mut())
            .await
            .unwrap();

        assert_eq!(execution, Execution::Requeue);
        assert_eq!(swarm.engine.context_mut().pending_len(), 5);
        assert_eq!(swarm.peer_store.in_use_count(), 5);
        // No connections up: the next announce must come sooner
        assert_eq!(swarm.announce.min_interval(), DEFAULT_ANNOUNCE_INTERVAL);
    }

    #[tokio::test]
    async fn test_fast_leecher_with_enough_peers_opens_nothing() {
        let mut swarm = swarm(eager_config(), 10, false);
        for _ in 0..20 {
            swarm.runtime.increase_connections();
        }
        // Download speed above threshold and min peers satisfied
        for _ in 0..200 {
            swarm.group.record_download(100_000);
        }

        swarm
            .controller
            .execute(swarm.engine.context_mut())
            .await
            .unwrap();

        assert_eq!(swarm.engine.context_mut().pending_len(), 0);
        assert_eq!(swarm.peer_store.in_use_count(), 0);
    }

    #[tokio::test]
    async fn test_seeder_budget_is_capped_by_max_peers() {
        let mut config = eager_config();
        config.bt.max_peers = 10;
        let mut swarm = swarm(config, 10, true);
        for _ in 0..8 {
            swarm.runtime.increase_connections();
        }

        swarm
            .controller
            .execute(swarm.engine.context_mut())
            .await
            .unwrap();

        // Only two slots left under the cap
        assert_eq!(swarm.engine.context_mut().pending_len(), 2);
        // Announce nudge is a leecher-only affordance
        assert_ne!(swarm.announce.min_interval(), DEFAULT_ANNOUNCE_INTERVAL);
    }

    #[tokio::test]
    async fn test_seeder_backs_off_near_upload_cap() {
        let mut swarm = swarm(eager_config(), 10, true);
        swarm.group.set_max_upload_speed_limit(1000);
        for _ in 0..10 {
            swarm.group.record_upload(10_000);
        }

        swarm
            .controller
            .execute(swarm.engine.context_mut())
            .await
            .unwrap();

        assert_eq!(swarm.engine.context_mut().pending_len(), 0);
    }

    #[tokio::test]
    async fn test_halt_terminates_controller() {
        let mut swarm = swarm(eager_config(), 10, false);
        swarm.runtime.request_halt();

        let execution = swarm
            .controller
            .execute(swarm.engine.context_mut())
            .await
            .unwrap();

        assert_eq!(execution, Execution::Done);
        assert_eq!(swarm.engine.context_mut().pending_len(), 0);
    }

    #[tokio::test]
    async fn test_unelapsed_checkpoint_only_requeues() {
        let mut config = eager_config();
        config.bt.check_interval = Duration::from_secs(3600);
        let mut swarm = swarm(config, 10, false);

        let execution = swarm
            .controller
            .execute(swarm.engine.context_mut())
            .await
            .unwrap();

        assert_eq!(execution, Execution::Requeue);
        assert_eq!(swarm.engine.context_mut().pending_len(), 0);
        assert_eq!(swarm.peer_store.in_use_count(), 0);
    }

    #[tokio::test]
    async fn test_command_scope_releases_group_on_drop() {
        let swarm = swarm(eager_config(), 0, false);
        assert_eq!(swarm.group.num_command(), 1);

        drop(swarm.controller);
        assert_eq!(swarm.group.num_command(), 0);

        let _ = (&swarm.piece_store, &swarm.runtime);
    }
}
