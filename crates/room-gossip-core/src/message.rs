//! Gossip messages exchanged on the shared room-sync topic

use crate::error::Result;
use crate::types::{NodeId, RoomName};
use serde::{Deserialize, Serialize};

/// Broadcast on the sync topic. Every subscriber, including the sender,
/// receives every message at least once and in no particular order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GossipMessage {
    /// A node came up and wants to be known
    Hello { sender: NodeId },
    /// A node advertises itself; receivers reconcile against it
    Announce { sender: NodeId },
    /// A room was published on `origin`
    RoomAnnounced { room: RoomName, origin: NodeId },
    /// A room was removed by its owner
    RoomRemoved { room: RoomName },
}

impl GossipMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            GossipMessage::Hello { .. } => "hello",
            GossipMessage::Announce { .. } => "announce",
            GossipMessage::RoomAnnounced { .. } => "room_announced",
            GossipMessage::RoomRemoved { .. } => "room_removed",
        }
    }

    /// Encode for the wire
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Decode from the wire
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Identifier of one broadcast, unique per publishing node and run
pub type MessageId = [u8; 16];

/// A gossip message as it travels between nodes.
///
/// Receivers relay each envelope they have not seen before, so a message
/// reaches nodes its publisher has never heard of. `hops` counts relays.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipEnvelope {
    pub id: MessageId,
    pub hops: u8,
    pub message: GossipMessage,
}

impl GossipEnvelope {
    pub fn new(id: MessageId, message: GossipMessage) -> Self {
        Self {
            id,
            hops: 0,
            message,
        }
    }

    /// The same message one relay further
    pub fn relayed(&self) -> Self {
        Self {
            id: self.id,
            hops: self.hops.saturating_add(1),
            message: self.message.clone(),
        }
    }
}
