//! Wire messages for the directory remote operations
//!
//! Room documents cross the wire as JSON text so the postcard encoding
//! never has to describe an arbitrary JSON value.

use crate::framing::{Frame, FrameError, FrameType};
use room_gossip_core::{Error, GossipEnvelope, RoomName, RoomSummary};
use serde::{Deserialize, Serialize};

/// Operation requested from a node
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Request {
    Publish { token: String, room_json: String },
    Remove { token: String, room_name: RoomName },
    AvailableRooms,
    GetRoom { room_name: RoomName },
}

/// Outcome of a [`Request`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Rooms(Vec<RoomSummary>),
    Room(String),
    Err(Error),
}

impl Request {
    /// Short operation name for logs
    pub fn operation(&self) -> &'static str {
        match self {
            Request::Publish { .. } => "publish",
            Request::Remove { .. } => "remove",
            Request::AvailableRooms => "available_rooms",
            Request::GetRoom { .. } => "get_room",
        }
    }

    pub fn to_frame(&self) -> Result<Frame, FrameError> {
        let payload = postcard::to_allocvec(self)?;
        Ok(Frame::new(FrameType::Request, payload))
    }

    pub fn from_frame(frame: &Frame) -> Result<Self, FrameError> {
        expect_type(frame, FrameType::Request)?;
        Ok(postcard::from_bytes(&frame.payload)?)
    }
}

impl Response {
    pub fn to_frame(&self) -> Result<Frame, FrameError> {
        let payload = postcard::to_allocvec(self)?;
        Ok(Frame::new(FrameType::Response, payload))
    }

    pub fn from_frame(frame: &Frame) -> Result<Self, FrameError> {
        expect_type(frame, FrameType::Response)?;
        Ok(postcard::from_bytes(&frame.payload)?)
    }
}

impl<T> From<Result<T, Error>> for Response
where
    T: Into<Response>,
{
    fn from(result: Result<T, Error>) -> Self {
        match result {
            Ok(value) => value.into(),
            Err(err) => Response::Err(err),
        }
    }
}

impl From<()> for Response {
    fn from(_: ()) -> Self {
        Response::Ok
    }
}

impl From<Vec<RoomSummary>> for Response {
    fn from(rooms: Vec<RoomSummary>) -> Self {
        Response::Rooms(rooms)
    }
}

impl From<String> for Response {
    fn from(room: String) -> Self {
        Response::Room(room)
    }
}

/// Wrap a gossip envelope in a frame
pub fn gossip_frame(envelope: &GossipEnvelope) -> Result<Frame, FrameError> {
    let payload = postcard::to_allocvec(envelope)?;
    Ok(Frame::new(FrameType::Gossip, payload))
}

/// Unwrap a gossip frame
pub fn gossip_from_frame(frame: &Frame) -> Result<GossipEnvelope, FrameError> {
    expect_type(frame, FrameType::Gossip)?;
    Ok(postcard::from_bytes(&frame.payload)?)
}

fn expect_type(frame: &Frame, expected: FrameType) -> Result<(), FrameError> {
    if frame.frame_type != expected {
        return Err(FrameError::Serialization(format!(
            "expected {:?} frame, got {:?}",
            expected, frame.frame_type
        )));
    }
    Ok(())
}
