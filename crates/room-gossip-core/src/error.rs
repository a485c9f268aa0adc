//! Error types for RoomGossip

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors a room directory reports to its callers.
///
/// These are the only failures that cross the wire to clients; everything
/// else is mapped to [`Error::Internal`].
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum Error {
    /// Unknown or expired token
    #[error("unauthorized")]
    Unauthorized,

    /// Name is already taken by a different owner
    #[error("room already exists: {0}")]
    RoomAlreadyExists(String),

    /// Room is missing, or the caller does not own it
    #[error("room does not exist: {0}")]
    RoomNotExists(String),

    /// Payload is not a JSON object carrying a room name
    #[error("wrong room format: {0}")]
    WrongRoomFormat(String),

    /// Failure on the serving node that the caller cannot act on
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<postcard::Error> for Error {
    fn from(err: postcard::Error) -> Self {
        Error::Internal(format!("serialization error: {err}"))
    }
}
