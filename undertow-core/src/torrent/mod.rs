//! BitTorrent-side state: peers, runtime bounds, and announce scheduling.

pub mod active_peers;
pub mod announce;
pub mod initiate;
pub mod peer;
pub mod runtime;

use std::fmt;

pub use active_peers::ActivePeerConnectionCommand;
pub use announce::{BtAnnounce, DEFAULT_ANNOUNCE_INTERVAL};
pub use initiate::PeerInitiateConnectionCommand;
pub use peer::{Peer, PeerStore};
pub use runtime::BtRuntime;

/// Azureus-style client prefix carried in every peer id this engine
/// generates: dash, two-letter client code, four-digit version, dash.
const PEER_ID_PREFIX: &[u8; 8] = b"-UT0001-";

/// SHA-1 hash identifying a unique torrent.
///
/// 20-byte hash of the info dictionary; computed outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates an InfoHash from a 20-byte hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns a reference to the underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// First bytes of the hash, hex-encoded, for log lines.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Client identifier presented to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerId([u8; 20]);

impl PeerId {
    /// Creates a peer ID from a 20-byte array.
    pub fn new(id: [u8; 20]) -> Self {
        Self(id)
    }

    /// Returns the peer ID as a byte array reference.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Generates a fresh peer id: the client prefix followed by random
    /// suffix bytes, so concurrent swarm sessions stay distinguishable.
    pub fn generate() -> Self {
        use rand::Rng;

        let mut id = [0u8; 20];
        let (prefix, suffix) = id.split_at_mut(PEER_ID_PREFIX.len());
        prefix.copy_from_slice(PEER_ID_PREFIX);
        rand::thread_rng().fill(suffix);
        Self(id)
    }
}

/// Torrent-level metadata shared by the commands of one swarm.
#[derive(Debug, Clone)]
pub struct BtContext {
    info_hash: InfoHash,
    peer_id: PeerId,
}

impl BtContext {
    /// Creates a context for one torrent with a fresh local peer id.
    pub fn new(info_hash: InfoHash) -> Self {
        Self {
            info_hash,
            peer_id: PeerId::generate(),
        }
    }

    /// The torrent this context describes.
    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    /// Our identity in this swarm.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }
}
