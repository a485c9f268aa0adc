//! RoomGossip Core Library
//!
//! This crate provides the shared data model for the RoomGossip federation:
//! room directory entries, node identities, gossip messages and the
//! client-visible error taxonomy.
//!
//! # Modules
//!
//! - [`types`]: Identity newtypes and directory entries (RoomName, Owner, NodeId, Room)
//! - [`payload`]: Room document parsing and validation
//! - [`message`]: Gossip messages broadcast between nodes
//! - [`error`]: Error types

pub mod error;
pub mod message;
pub mod payload;
pub mod types;

pub use error::{Error, Result};
pub use message::{GossipEnvelope, GossipMessage, MessageId};
pub use payload::RoomPayload;
pub use types::*;
