//! Gossip protocol: emitting and consuming room-sync messages
//!
//! | Message         | Handling                                              |
//! |-----------------|-------------------------------------------------------|
//! | `Hello`         | register sender, broadcast our own `Announce`         |
//! | `Announce`      | register sender, reconcile against it                 |
//! | `RoomAnnounced` | reconcile against the origin unless it is us          |
//! | `RoomRemoved`   | drop the room locally if present, no ownership check  |
//!
//! Handlers recompute from current state instead of replaying deltas, so
//! duplicated, reordered or stale messages are harmless.

use crate::channel::GossipChannel;
use crate::directory::RoomDirectory;
use crate::peers::PeerRegistry;
use crate::reconcile::ReconciliationEngine;
use room_gossip_core::{GossipMessage, NodeId, RoomName};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// One node's end of the room-sync topic
#[derive(Clone)]
pub struct GossipProtocol {
    node_id: NodeId,
    directory: Arc<RoomDirectory>,
    peers: Arc<PeerRegistry>,
    engine: Arc<ReconciliationEngine>,
    channel: Arc<dyn GossipChannel>,
}

impl GossipProtocol {
    pub fn new(
        node_id: NodeId,
        directory: Arc<RoomDirectory>,
        peers: Arc<PeerRegistry>,
        engine: Arc<ReconciliationEngine>,
        channel: Arc<dyn GossipChannel>,
    ) -> Self {
        Self {
            node_id,
            directory,
            peers,
            engine,
            channel,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Broadcast `Hello` (node start-up)
    pub async fn say_hello(&self) {
        info!("Saying hello as {}", self.node_id);
        self.channel
            .publish(GossipMessage::Hello {
                sender: self.node_id.clone(),
            })
            .await;
    }

    /// Broadcast `Announce` so peers reconcile against us
    pub async fn announce(&self) {
        self.channel
            .publish(GossipMessage::Announce {
                sender: self.node_id.clone(),
            })
            .await;
    }

    /// Broadcast that we published `room`
    pub async fn room_announced(&self, room: RoomName) {
        self.channel
            .publish(GossipMessage::RoomAnnounced {
                room,
                origin: self.node_id.clone(),
            })
            .await;
    }

    /// Broadcast that `room` was removed
    pub async fn room_removed(&self, room: RoomName) {
        self.channel
            .publish(GossipMessage::RoomRemoved { room })
            .await;
    }

    /// Handle one message from the topic
    pub async fn handle(&self, message: GossipMessage) {
        debug!("Gossip {} received", message.kind());

        match message {
            GossipMessage::Hello { sender } => {
                if sender == self.node_id {
                    return;
                }
                if self.peers.register(sender.clone()) {
                    info!("New peer {} said hello", sender);
                }
                self.announce().await;
            }
            GossipMessage::Announce { sender } => {
                if sender == self.node_id {
                    return;
                }
                if self.peers.register(sender.clone()) {
                    info!("New peer {} announced", sender);
                }
                self.reconcile(&sender).await;
            }
            GossipMessage::RoomAnnounced { room, origin } => {
                if origin == self.node_id {
                    return;
                }
                debug!("Room {} announced by {}", room, origin);
                self.reconcile(&origin).await;
            }
            GossipMessage::RoomRemoved { room } => match self.directory.remove_foreign(&room) {
                Ok(true) => info!("Room {} removed by its origin", room),
                Ok(false) => debug!("Room {} already absent", room),
                Err(e) => warn!("Failed to drop removed room {}: {}", room, e),
            },
        }
    }

    /// Reconcile against `peer`, logging and dropping any failure
    async fn reconcile(&self, peer: &NodeId) {
        if let Err(e) = self.engine.reconcile_with(peer).await {
            warn!("Reconciliation with {} abandoned: {}", peer, e);
        }
    }

    /// Consume the topic until `shutdown` fires.
    ///
    /// Each message is handled on its own task so a hung peer only stalls
    /// the reconciliation it triggered. Handlers still running at shutdown
    /// are aborted before this returns.
    pub async fn run(
        self,
        mut messages: broadcast::Receiver<GossipMessage>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                received = messages.recv() => match received {
                    Ok(message) => {
                        let protocol = self.clone();
                        handlers.spawn(async move { protocol.handle(message).await });
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Gossip receiver lagged, {} message(s) skipped", skipped);
                    }
                    Err(RecvError::Closed) => {
                        debug!("Gossip topic closed");
                        break;
                    }
                },
                Some(finished) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = finished {
                        warn!("Gossip handler failed: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }

        if !handlers.is_empty() {
            debug!("Aborting {} gossip handler(s)", handlers.len());
        }
        handlers.shutdown().await;
    }
}
