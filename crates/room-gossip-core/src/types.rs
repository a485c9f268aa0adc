//! Core directory types for RoomGossip
//!
//! Identities are plain strings on the wire. The newtypes exist so a room
//! name can never be passed where an owner or a node address is expected.

use crate::payload::RoomPayload;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// IDENTITY TYPES (newtypes for type safety)
// =============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Directory key of a room, unique within a node's merged view
    RoomName
);

string_id!(
    /// User identity that published a room (resolved from a token)
    Owner
);

string_id!(
    /// Node identifier; doubles as the address peers dial for remote calls
    NodeId
);

// =============================================================================
// DIRECTORY ENTRIES
// =============================================================================

/// A room as held in a node's directory.
///
/// `payload.name() == name` always holds for entries built through
/// [`Room::new`].
#[derive(Clone, Debug, PartialEq)]
pub struct Room {
    pub name: RoomName,
    pub owner: Owner,
    pub payload: RoomPayload,
}

impl Room {
    pub fn new(owner: Owner, payload: RoomPayload) -> Self {
        Self {
            name: payload.name(),
            owner,
            payload,
        }
    }

    /// The `(name, owner)` pair advertised to peers
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            name: self.name.clone(),
            owner: self.owner.clone(),
        }
    }
}

/// Persisted form of a directory entry: `{owner, payload}` keyed by name
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StoredRoom {
    pub owner: Owner,
    pub payload: RoomPayload,
}

impl From<Room> for StoredRoom {
    fn from(room: Room) -> Self {
        Self {
            owner: room.owner,
            payload: room.payload,
        }
    }
}

impl From<StoredRoom> for Room {
    fn from(stored: StoredRoom) -> Self {
        Room::new(stored.owner, stored.payload)
    }
}

/// One row of `availableRooms`: which room exists and who owns it
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoomSummary {
    pub name: RoomName,
    pub owner: Owner,
}
