//! roomd - RoomGossip room directory daemon
//!
//! Each node owns the rooms its users publish and keeps an eventually
//! consistent view of every other node's rooms:
//! - Ownership-gated publish/remove against a local room directory
//! - Peer discovery through `Hello`/`Announce` gossip
//! - Pull-based reconciliation against peers' room listings
//! - Persistent directory and peer set

pub mod auth;
pub mod channel;
pub mod config;
pub mod directory;
pub mod gossip;
pub mod node;
pub mod peers;
pub mod reconcile;
pub mod server;
pub mod storage;

pub use auth::{Authenticator, OwnershipGate, TokenTable, UsersFile};
pub use channel::{GossipChannel, LocalChannel, PeerFanout};
pub use config::Config;
pub use directory::RoomDirectory;
pub use gossip::GossipProtocol;
pub use node::Node;
pub use peers::PeerRegistry;
pub use reconcile::ReconciliationEngine;
pub use server::Server;
pub use storage::{RoomStore, Storage};
