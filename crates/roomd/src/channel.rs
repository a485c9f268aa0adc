//! Broadcast transport for gossip messages
//!
//! Every node subscribes to one shared topic and sees every message,
//! including its own. Delivery is at-least-once at best and unordered.

use crate::peers::PeerRegistry;
use async_trait::async_trait;
use parking_lot::Mutex;
use room_gossip_core::{GossipEnvelope, GossipMessage, MessageId, NodeId};
use room_gossip_net::RoomClient;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default subscriber buffer
pub const DEFAULT_CAPACITY: usize = 1024;

/// Envelopes remembered for duplicate suppression
pub const SEEN_CAPACITY: usize = 4096;

/// Relays an envelope may take before it is only delivered locally
pub const MAX_HOPS: u8 = 8;

/// The shared room-sync topic
#[async_trait]
pub trait GossipChannel: Send + Sync {
    /// Broadcast a message to every subscriber on every node
    async fn publish(&self, message: GossipMessage);

    /// Hand a message to local subscribers only
    fn deliver(&self, message: GossipMessage);

    /// Accept an envelope that arrived from another node
    fn receive(&self, envelope: GossipEnvelope) {
        self.deliver(envelope.message);
    }

    /// Subscribe this node to the topic
    fn subscribe(&self) -> broadcast::Receiver<GossipMessage>;
}

// =============================================================================
// IN-PROCESS TOPIC
// =============================================================================

/// In-process topic. Clones share the same topic, so several nodes in one
/// process can gossip through it.
#[derive(Clone)]
pub struct LocalChannel {
    sender: broadcast::Sender<GossipMessage>,
}

impl LocalChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for LocalChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl GossipChannel for LocalChannel {
    async fn publish(&self, message: GossipMessage) {
        self.deliver(message);
    }

    fn deliver(&self, message: GossipMessage) {
        if self.sender.send(message).is_err() {
            debug!("Gossip dropped: no subscribers");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<GossipMessage> {
        self.sender.subscribe()
    }
}

// =============================================================================
// RELAYED FAN-OUT
// =============================================================================

/// Bounded memory of envelope ids, oldest forgotten first
struct SeenSet {
    ids: HashSet<MessageId>,
    order: VecDeque<MessageId>,
    capacity: usize,
}

impl SeenSet {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns false if `id` was already seen
    fn insert(&mut self, id: MessageId) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

/// Topic built from TCP pushes between nodes.
///
/// A published message goes to every known peer and bootstrap address.
/// Each receiver delivers an envelope it has not seen yet and relays it to
/// its own peers, so the message floods the whole federation once.
/// Messages are also delivered locally, so the publishing node sees its
/// own broadcasts like every other subscriber.
pub struct PeerFanout {
    local: LocalChannel,
    node_id: NodeId,
    peers: Arc<PeerRegistry>,
    bootstrap: Vec<NodeId>,
    timeout: Duration,
    /// Distinguishes ids across restarts of the same node
    epoch: u128,
    sequence: AtomicU64,
    seen: Mutex<SeenSet>,
}

impl PeerFanout {
    pub fn new(
        node_id: NodeId,
        peers: Arc<PeerRegistry>,
        bootstrap: Vec<NodeId>,
        timeout: Duration,
    ) -> Self {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();

        Self {
            local: LocalChannel::default(),
            node_id,
            peers,
            bootstrap,
            timeout,
            epoch,
            sequence: AtomicU64::new(0),
            seen: Mutex::new(SeenSet::new(SEEN_CAPACITY)),
        }
    }

    /// Every remote node a broadcast should reach
    fn targets(&self) -> BTreeSet<NodeId> {
        self.peers
            .all()
            .into_iter()
            .chain(self.bootstrap.iter().cloned())
            .filter(|target| *target != self.node_id)
            .collect()
    }

    fn next_id(&self) -> MessageId {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

        let mut hasher = blake3::Hasher::new();
        hasher.update(self.node_id.as_str().as_bytes());
        hasher.update(&self.epoch.to_le_bytes());
        hasher.update(&sequence.to_le_bytes());

        let digest = hasher.finalize();
        let mut id = MessageId::default();
        id.copy_from_slice(&digest.as_bytes()[..16]);
        id
    }

    /// Push an envelope to every target in the background
    fn push(&self, envelope: GossipEnvelope) {
        for target in self.targets() {
            let envelope = envelope.clone();
            let limit = self.timeout;
            tokio::spawn(async move {
                let kind = envelope.message.kind();
                let sent = async {
                    let mut client = RoomClient::connect_with_timeout(target.as_str(), limit).await?;
                    client.send_gossip(&envelope).await
                };
                match sent.await {
                    Ok(()) => debug!("Sent {} (hop {}) to {}", kind, envelope.hops, target),
                    Err(e) => warn!("Failed to send {} to {}: {}", kind, target, e),
                }
            });
        }
    }
}

#[async_trait]
impl GossipChannel for PeerFanout {
    async fn publish(&self, message: GossipMessage) {
        let envelope = GossipEnvelope::new(self.next_id(), message);
        self.seen.lock().insert(envelope.id);

        self.local.deliver(envelope.message.clone());
        self.push(envelope);
    }

    fn deliver(&self, message: GossipMessage) {
        self.local.deliver(message);
    }

    fn receive(&self, envelope: GossipEnvelope) {
        if !self.seen.lock().insert(envelope.id) {
            debug!("Duplicate {} dropped", envelope.message.kind());
            return;
        }

        self.local.deliver(envelope.message.clone());

        if envelope.hops >= MAX_HOPS {
            debug!("{} reached the hop limit, not relayed", envelope.message.kind());
            return;
        }
        self.push(envelope.relayed());
    }

    fn subscribe(&self) -> broadcast::Receiver<GossipMessage> {
        self.local.subscribe()
    }
}
