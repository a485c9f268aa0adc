//! TCP client for the directory remote operations
//!
//! One connection carries any number of sequential request/response pairs.
//! Every exchange is bounded by the client's timeout.

use crate::framing::{Frame, FrameCodec, FrameError, FrameType};
use crate::messages::{gossip_frame, Request, Response};
use futures::{SinkExt, StreamExt};
use room_gossip_core::{Error, GossipEnvelope, RoomName, RoomSummary};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::debug;

/// Default per-exchange timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("Remote error: {0}")]
    Remote(Error),
}

impl ClientError {
    /// The directory error reported by the remote node, if that is what failed
    pub fn remote(&self) -> Option<&Error> {
        match self {
            ClientError::Remote(err) => Some(err),
            _ => None,
        }
    }
}

/// Connection to one node
pub struct RoomClient {
    framed: Framed<TcpStream, FrameCodec>,
    timeout: Duration,
    addr: String,
}

impl RoomClient {
    /// Connect with the default timeout
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        Self::connect_with_timeout(addr, DEFAULT_TIMEOUT).await
    }

    /// Connect, bounding the dial and every later exchange by `limit`
    pub async fn connect_with_timeout(addr: &str, limit: Duration) -> Result<Self, ClientError> {
        let stream = timeout(limit, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout(limit))??;
        stream.set_nodelay(true)?;
        debug!("Connected to {}", addr);

        Ok(Self {
            framed: Framed::new(stream, FrameCodec::new()),
            timeout: limit,
            addr: addr.to_owned(),
        })
    }

    pub async fn publish(&mut self, token: &str, room_json: &str) -> Result<(), ClientError> {
        let request = Request::Publish {
            token: token.to_owned(),
            room_json: room_json.to_owned(),
        };
        match self.call(&request).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn remove(&mut self, token: &str, room_name: &RoomName) -> Result<(), ClientError> {
        let request = Request::Remove {
            token: token.to_owned(),
            room_name: room_name.clone(),
        };
        match self.call(&request).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn available_rooms(&mut self) -> Result<Vec<RoomSummary>, ClientError> {
        match self.call(&Request::AvailableRooms).await? {
            Response::Rooms(rooms) => Ok(rooms),
            other => Err(unexpected(other)),
        }
    }

    /// Fetch a room document as JSON text
    pub async fn get_room(&mut self, room_name: &RoomName) -> Result<String, ClientError> {
        let request = Request::GetRoom {
            room_name: room_name.clone(),
        };
        match self.call(&request).await? {
            Response::Room(json) => Ok(json),
            other => Err(unexpected(other)),
        }
    }

    /// Push a gossip envelope to the node; no reply is expected
    pub async fn send_gossip(&mut self, envelope: &GossipEnvelope) -> Result<(), ClientError> {
        let frame = gossip_frame(envelope)?;
        self.send(frame).await
    }

    /// Round-trip a keepalive
    pub async fn ping(&mut self) -> Result<(), ClientError> {
        self.send(Frame::ping()).await?;
        let frame = self.recv().await?;
        match frame.frame_type {
            FrameType::Pong => Ok(()),
            other => Err(ClientError::UnexpectedResponse(format!("{:?} frame", other))),
        }
    }

    async fn call(&mut self, request: &Request) -> Result<Response, ClientError> {
        debug!("{} -> {}", request.operation(), self.addr);
        self.send(request.to_frame()?).await?;
        let frame = self.recv().await?;
        match Response::from_frame(&frame)? {
            Response::Err(err) => Err(ClientError::Remote(err)),
            response => Ok(response),
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), ClientError> {
        timeout(self.timeout, self.framed.send(frame))
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))??;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Frame, ClientError> {
        match timeout(self.timeout, self.framed.next()).await {
            Err(_) => Err(ClientError::Timeout(self.timeout)),
            Ok(None) => Err(ClientError::ConnectionClosed),
            Ok(Some(frame)) => Ok(frame?),
        }
    }
}

fn unexpected(response: Response) -> ClientError {
    ClientError::UnexpectedResponse(format!("{:?}", response))
}
