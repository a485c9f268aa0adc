//! Per-node room directory
//!
//! Holds every room this node knows about, whether published locally or
//! imported from a peer. Locally authored mutations are ownership-checked;
//! replicated ones trust their origin.
//!
//! All writes run under one directory-wide lock and hit the store before
//! the in-memory map, so a failed store write leaves the prior state intact.

use crate::storage::{RoomStore, StorageError};
use parking_lot::RwLock;
use room_gossip_core::{Owner, Room, RoomName, RoomPayload, RoomSummary};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Directory errors
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Room already exists: {0}")]
    AlreadyExists(RoomName),
    #[error("Room does not exist: {0}")]
    NotExists(RoomName),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<DirectoryError> for room_gossip_core::Error {
    fn from(err: DirectoryError) -> Self {
        use room_gossip_core::Error;
        match err {
            DirectoryError::AlreadyExists(name) => Error::RoomAlreadyExists(name.0),
            DirectoryError::NotExists(name) => Error::RoomNotExists(name.0),
            DirectoryError::Storage(e) => Error::Internal(e.to_string()),
        }
    }
}

/// Result of a successful `put`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Updated,
}

/// Room name -> room, persisted on every mutation
pub struct RoomDirectory {
    rooms: RwLock<BTreeMap<RoomName, Room>>,
    store: Arc<dyn RoomStore>,
}

impl RoomDirectory {
    /// Rebuild the directory from whatever the store holds
    pub fn open(store: Arc<dyn RoomStore>) -> Result<Self, DirectoryError> {
        let rooms = store
            .load_rooms()?
            .into_iter()
            .map(|room| (room.name.clone(), room))
            .collect();

        Ok(Self {
            rooms: RwLock::new(rooms),
            store,
        })
    }

    /// Publish or republish a room on behalf of `owner`.
    ///
    /// Fails if the name is held by someone else. The same owner
    /// overwrites their own room.
    pub fn put(&self, owner: Owner, payload: RoomPayload) -> Result<PutOutcome, DirectoryError> {
        let room = Room::new(owner, payload);
        let mut rooms = self.rooms.write();

        let outcome = match rooms.get(&room.name) {
            Some(existing) if existing.owner != room.owner => {
                return Err(DirectoryError::AlreadyExists(room.name));
            }
            Some(_) => PutOutcome::Updated,
            None => PutOutcome::Inserted,
        };

        self.store.put_room(&room)?;
        rooms.insert(room.name.clone(), room);
        Ok(outcome)
    }

    /// Remove a room on behalf of `owner`.
    ///
    /// A room held by someone else is reported as missing, so callers
    /// cannot probe for names they do not own.
    pub fn delete(&self, name: &RoomName, owner: &Owner) -> Result<(), DirectoryError> {
        let mut rooms = self.rooms.write();

        match rooms.get(name) {
            Some(existing) if existing.owner == *owner => {}
            _ => return Err(DirectoryError::NotExists(name.clone())),
        }

        self.store.delete_room(name)?;
        rooms.remove(name);
        Ok(())
    }

    /// Read a room's payload. No ownership check.
    pub fn get(&self, name: &RoomName) -> Result<RoomPayload, DirectoryError> {
        self.rooms
            .read()
            .get(name)
            .map(|room| room.payload.clone())
            .ok_or_else(|| DirectoryError::NotExists(name.clone()))
    }

    /// Owner of a room, if present
    pub fn owner_of(&self, name: &RoomName) -> Option<Owner> {
        self.rooms.read().get(name).map(|room| room.owner.clone())
    }

    /// Snapshot of `(name, owner)` pairs, in name order
    pub fn list_all(&self) -> RoomListing {
        RoomListing {
            rooms: self.rooms.read().values().map(Room::summary).collect(),
        }
    }

    /// Store a room replicated from its origin node.
    ///
    /// Overwrites whatever is cached under that name, regardless of owner.
    /// Returns false when the entry was already identical.
    pub fn import_foreign(&self, owner: Owner, payload: RoomPayload) -> Result<bool, DirectoryError> {
        let room = Room::new(owner, payload);
        let mut rooms = self.rooms.write();

        if rooms.get(&room.name) == Some(&room) {
            return Ok(false);
        }

        self.store.put_room(&room)?;
        rooms.insert(room.name.clone(), room);
        Ok(true)
    }

    /// Drop a room because its origin announced the removal.
    ///
    /// No ownership check; absent rooms are a no-op returning false.
    pub fn remove_foreign(&self, name: &RoomName) -> Result<bool, DirectoryError> {
        let mut rooms = self.rooms.write();

        if !rooms.contains_key(name) {
            return Ok(false);
        }

        self.store.delete_room(name)?;
        rooms.remove(name);
        Ok(true)
    }

    pub fn contains(&self, name: &RoomName) -> bool {
        self.rooms.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.rooms.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.read().is_empty()
    }
}

/// Point-in-time listing of a directory.
///
/// Iterating it never touches the directory again, and it can be iterated
/// any number of times.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoomListing {
    rooms: Vec<RoomSummary>,
}

impl RoomListing {
    pub fn iter(&self) -> std::slice::Iter<'_, RoomSummary> {
        self.rooms.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &RoomName> + '_ {
        self.rooms.iter().map(|summary| &summary.name)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn into_vec(self) -> Vec<RoomSummary> {
        self.rooms
    }
}

impl IntoIterator for RoomListing {
    type Item = RoomSummary;
    type IntoIter = std::vec::IntoIter<RoomSummary>;

    fn into_iter(self) -> Self::IntoIter {
        self.rooms.into_iter()
    }
}

impl<'a> IntoIterator for &'a RoomListing {
    type Item = &'a RoomSummary;
    type IntoIter = std::slice::Iter<'a, RoomSummary>;

    fn into_iter(self) -> Self::IntoIter {
        self.rooms.iter()
    }
}
