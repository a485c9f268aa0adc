//! Persistent storage using sled

use room_gossip_core::{NodeId, Room, RoomName, StoredRoom};
use sled::Db;
use std::path::Path;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Corrupt key in tree {0}")]
    CorruptKey(&'static str),
}

/// Key-value persistence behind the room directory and peer registry.
///
/// Writes are expected to be durable enough that a node restarting from
/// the store sees every mutation acknowledged before the crash.
pub trait RoomStore: Send + Sync {
    fn put_room(&self, room: &Room) -> Result<(), StorageError>;
    fn delete_room(&self, name: &RoomName) -> Result<(), StorageError>;
    fn load_rooms(&self) -> Result<Vec<Room>, StorageError>;
    fn put_peer(&self, peer: &NodeId) -> Result<(), StorageError>;
    fn load_peers(&self) -> Result<Vec<NodeId>, StorageError>;
}

/// Storage backend for roomd
pub struct Storage {
    db: Db,
    /// Room tree: room name -> JSON {owner, payload}
    rooms: sled::Tree,
    /// Peer tree: node id -> ()
    peers: sled::Tree,
}

impl Storage {
    /// Open storage at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let rooms = db.open_tree("rooms")?;
        let peers = db.open_tree("peers")?;

        Ok(Self { db, rooms, peers })
    }

    /// Count stored rooms
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Flush all pending writes
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

impl RoomStore for Storage {
    fn put_room(&self, room: &Room) -> Result<(), StorageError> {
        let value = serde_json::to_vec(&StoredRoom::from(room.clone()))?;
        self.rooms.insert(room.name.as_str(), value)?;
        Ok(())
    }

    fn delete_room(&self, name: &RoomName) -> Result<(), StorageError> {
        self.rooms.remove(name.as_str())?;
        Ok(())
    }

    fn load_rooms(&self) -> Result<Vec<Room>, StorageError> {
        let mut rooms = Vec::new();
        for result in self.rooms.iter() {
            let (key, bytes) = result?;
            let stored: StoredRoom = serde_json::from_slice(&bytes)?;
            let room = Room::from(stored);
            // The key and the payload's own name must agree
            if room.name.as_str().as_bytes() != key.as_ref() {
                return Err(StorageError::CorruptKey("rooms"));
            }
            rooms.push(room);
        }
        Ok(rooms)
    }

    fn put_peer(&self, peer: &NodeId) -> Result<(), StorageError> {
        self.peers.insert(peer.as_str(), Vec::<u8>::new())?;
        Ok(())
    }

    fn load_peers(&self) -> Result<Vec<NodeId>, StorageError> {
        let mut peers = Vec::new();
        for result in self.peers.iter() {
            let (key, _) = result?;
            let id = std::str::from_utf8(&key).map_err(|_| StorageError::CorruptKey("peers"))?;
            peers.push(NodeId::from(id));
        }
        Ok(peers)
    }
}
