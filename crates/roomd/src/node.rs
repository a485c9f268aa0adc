//! A directory node: the client-facing room operations wired to gossip
//!
//! `publish`/`remove` resolve the caller through the ownership gate, mutate
//! the local directory, then broadcast the change. Errors are returned to
//! the caller as-is and never retried.

use crate::auth::{Authenticator, OwnershipGate};
use crate::channel::GossipChannel;
use crate::directory::RoomDirectory;
use crate::gossip::GossipProtocol;
use crate::peers::PeerRegistry;
use crate::reconcile::{PeerConnector, ReconcileStats, ReconciliationEngine};
use room_gossip_core::{Error, NodeId, RoomName, RoomPayload, RoomSummary};
use room_gossip_net::{Request, Response};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

/// One running directory service
pub struct Node {
    node_id: NodeId,
    directory: Arc<RoomDirectory>,
    peers: Arc<PeerRegistry>,
    gate: OwnershipGate,
    engine: Arc<ReconciliationEngine>,
    gossip: GossipProtocol,
    channel: Arc<dyn GossipChannel>,
}

impl Node {
    pub fn new(
        node_id: NodeId,
        directory: Arc<RoomDirectory>,
        peers: Arc<PeerRegistry>,
        authenticator: Arc<dyn Authenticator>,
        channel: Arc<dyn GossipChannel>,
        connector: Arc<dyn PeerConnector>,
    ) -> Self {
        let engine = Arc::new(ReconciliationEngine::new(directory.clone(), connector));
        let gossip = GossipProtocol::new(
            node_id.clone(),
            directory.clone(),
            peers.clone(),
            engine.clone(),
            channel.clone(),
        );

        Self {
            node_id,
            directory,
            peers,
            gate: OwnershipGate::new(authenticator),
            engine,
            gossip,
            channel,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn directory(&self) -> &Arc<RoomDirectory> {
        &self.directory
    }

    pub fn peers(&self) -> &Arc<PeerRegistry> {
        &self.peers
    }

    pub fn gossip(&self) -> &GossipProtocol {
        &self.gossip
    }

    pub fn channel(&self) -> &Arc<dyn GossipChannel> {
        &self.channel
    }

    /// Join the topic and say hello.
    ///
    /// The subscription is taken before `Hello` goes out so no reply can
    /// be missed.
    pub async fn start(&self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let messages = self.channel.subscribe();
        let handle = tokio::spawn(self.gossip.clone().run(messages, shutdown));
        self.gossip.say_hello().await;
        handle
    }

    /// Publish a room document on behalf of the token's owner
    pub async fn publish(&self, token: &str, room_json: &str) -> Result<(), Error> {
        let owner = self.gate.resolve(token).await?;
        let payload = RoomPayload::parse(room_json)?;
        let name = payload.name();

        let outcome = self.directory.put(owner.clone(), payload)?;
        info!("Room {} {:?} by {}", name, outcome, owner);

        self.gossip.room_announced(name).await;
        Ok(())
    }

    /// Remove a room the token's owner published
    pub async fn remove(&self, token: &str, room_name: &RoomName) -> Result<(), Error> {
        let owner = self.gate.resolve(token).await?;

        self.directory.delete(room_name, &owner)?;
        info!("Room {} removed by {}", room_name, owner);

        self.gossip.room_removed(room_name.clone()).await;
        Ok(())
    }

    /// Every room this node knows, with its owner
    pub fn available_rooms(&self) -> Vec<RoomSummary> {
        self.directory.list_all().into_vec()
    }

    /// A room document as JSON text
    pub fn get_room(&self, room_name: &RoomName) -> Result<String, Error> {
        Ok(self.directory.get(room_name)?.to_json_string())
    }

    /// Dispatch a wire request
    pub async fn handle_request(&self, request: Request) -> Response {
        match request {
            Request::Publish { token, room_json } => self.publish(&token, &room_json).await.into(),
            Request::Remove { token, room_name } => self.remove(&token, &room_name).await.into(),
            Request::AvailableRooms => Response::Rooms(self.available_rooms()),
            Request::GetRoom { room_name } => self.get_room(&room_name).into(),
        }
    }

    /// Get node statistics
    pub fn stats(&self) -> NodeStats {
        NodeStats {
            room_count: self.directory.len(),
            peer_count: self.peers.len(),
            reconcile: self.engine.stats(),
        }
    }
}

/// Node statistics
#[derive(Debug, Clone)]
pub struct NodeStats {
    pub room_count: usize,
    pub peer_count: usize,
    pub reconcile: ReconcileStats,
}
