//! Networking primitives for the RoomGossip protocol
//!
//! This crate provides:
//! - Length-prefixed message framing
//! - Request/response messages for the directory remote operations
//! - A TCP client for calling those operations on a node

pub mod client;
pub mod framing;
pub mod messages;

pub use client::{ClientError, RoomClient};
pub use framing::{Frame, FrameCodec, FrameError, FrameType};
pub use messages::{Request, Response};
