//! Known peer nodes
//!
//! Peers are learned from `Hello`/`Announce` gossip and never expire. The
//! registry only answers "who can I pull rooms from".

use crate::storage::{RoomStore, StorageError};
use parking_lot::RwLock;
use room_gossip_core::NodeId;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Set of peer node identifiers, optionally persisted
pub struct PeerRegistry {
    peers: RwLock<BTreeSet<NodeId>>,
    store: Option<Arc<dyn RoomStore>>,
    /// Maximum number of peers (0 = unbounded)
    max_peers: usize,
}

impl PeerRegistry {
    /// Create an in-memory registry
    pub fn new(max_peers: usize) -> Self {
        Self {
            peers: RwLock::new(BTreeSet::new()),
            store: None,
            max_peers,
        }
    }

    /// Create a registry backed by `store`, loading the peers it remembers
    pub fn open(store: Arc<dyn RoomStore>, max_peers: usize) -> Result<Self, StorageError> {
        let peers = store.load_peers()?.into_iter().collect();
        Ok(Self {
            peers: RwLock::new(peers),
            store: Some(store),
            max_peers,
        })
    }

    /// Add a peer. Returns true if it was not known before.
    ///
    /// A full registry refuses newcomers. A failed store write is logged
    /// and the peer is still kept in memory.
    pub fn register(&self, peer: NodeId) -> bool {
        let mut peers = self.peers.write();
        if peers.contains(&peer) {
            return false;
        }
        if self.max_peers > 0 && peers.len() >= self.max_peers {
            warn!("Peer registry full ({}), ignoring {}", self.max_peers, peer);
            return false;
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.put_peer(&peer) {
                warn!("Failed to persist peer {}: {}", peer, e);
            }
        }

        debug!("Registered peer {}", peer);
        peers.insert(peer);
        true
    }

    pub fn contains(&self, peer: &NodeId) -> bool {
        self.peers.read().contains(peer)
    }

    /// Snapshot of every known peer, for fan-out
    pub fn all(&self) -> Vec<NodeId> {
        self.peers.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}
