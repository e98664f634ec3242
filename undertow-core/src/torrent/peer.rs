//! The pool of known peers and their lease state.

use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::rc::Rc;

use crate::engine::Cuid;
use crate::transfer::{TransferCounter, TransferStat};

/// A remote BitTorrent endpoint offering piece exchange.
///
/// A peer is in use exactly while `used_by` carries the cuid of the
/// command working it; clearing the lease returns the peer to the
/// unused pool.
#[derive(Debug)]
pub struct Peer {
    address: SocketAddr,
    used_by: Cell<Option<Cuid>>,
    stats: RefCell<TransferCounter>,
}

impl Peer {
    /// Creates an unleased peer.
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            used_by: Cell::new(None),
            stats: RefCell::new(TransferCounter::new()),
        }
    }

    /// Remote endpoint of this peer.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Cuid of the command currently working this peer, if any.
    pub fn used_by(&self) -> Option<Cuid> {
        self.used_by.get()
    }

    /// Leases the peer to the given command.
    pub fn set_used_by(&self, cuid: Cuid) {
        self.used_by.set(Some(cuid));
    }

    /// Clears the lease, returning the peer to the unused pool.
    pub fn release(&self) {
        self.used_by.set(None);
    }

    /// True while a command holds the lease.
    pub fn is_in_use(&self) -> bool {
        self.used_by.get().is_some()
    }

    /// Records bytes received from this peer.
    pub fn record_download(&self, bytes: u64) {
        self.stats.borrow_mut().record_download(bytes);
    }

    /// Records bytes sent to this peer.
    pub fn record_upload(&self, bytes: u64) {
        self.stats.borrow_mut().record_upload(bytes);
    }

    /// Point-in-time transfer statistics for this peer.
    pub fn stat(&self) -> TransferStat {
        self.stats.borrow_mut().stat()
    }
}

/// Pool of known peers, used and unused alike.
///
/// Leasing never removes a peer; it only marks it in use so the
/// admission controller skips it until the lease clears.
#[derive(Debug, Default)]
pub struct PeerStore {
    peers: RefCell<Vec<Rc<Peer>>>,
}

impl PeerStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a peer unless its address is already known.
    ///
    /// Returns true when the peer was added.
    pub fn add_peer(&self, peer: Rc<Peer>) -> bool {
        let mut peers = self.peers.borrow_mut();
        if peers.iter().any(|known| known.address() == peer.address()) {
            return false;
        }
        peers.push(peer);
        true
    }

    /// True while at least one unleased peer remains.
    pub fn is_peer_available(&self) -> bool {
        self.peers.borrow().iter().any(|peer| !peer.is_in_use())
    }

    /// Returns the first unleased peer, oldest first.
    ///
    /// The caller leases it by setting `used_by`; until then a repeated
    /// call would return the same peer, so lease immediately.
    pub fn unused_peer(&self) -> Option<Rc<Peer>> {
        self.peers
            .borrow()
            .iter()
            .find(|peer| !peer.is_in_use())
            .cloned()
    }

    /// Clears the lease on a peer so it may be handed out again.
    pub fn return_peer(&self, peer: &Peer) {
        peer.release();
    }

    /// Total number of known peers.
    pub fn len(&self) -> usize {
        self.peers.borrow().len()
    }

    /// True when no peers are known.
    pub fn is_empty(&self) -> bool {
        self.peers.borrow().is_empty()
    }

    /// Number of peers currently leased.
    pub fn in_use_count(&self) -> usize {
        self.peers.borrow().iter().filter(|peer| peer.is_in_use()).count()
    }
}
