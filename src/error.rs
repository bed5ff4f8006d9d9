//! Error taxonomies for the chat relay and the pricing core.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::auth::TokenError;

/// Failures on the chat transport. Only `TransportClosed` means the socket is gone.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(#[from] TokenError),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("chat room {0} not found")]
    RoomNotFound(Uuid),

    #[error("user {user_id} is not a member of room {room_id}")]
    NotAMember { user_id: String, room_id: Uuid },

    #[error("sender {sender_id} does not match authenticated user")]
    SenderMismatch { sender_id: String },

    #[error("buyer and seller must be different users")]
    SameParticipants,

    #[error("failed to persist message: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("transport closed")]
    TransportClosed,
}

/// Failures while loading or refreshing the rate table.
#[derive(Debug, Error)]
pub enum RateError {
    #[error("no exchange rate table available")]
    Unavailable,

    #[error("rate fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("rate fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected rate response: {0}")]
    BadResponse(String),

    #[error("rate snapshot storage failed: {0}")]
    Snapshot(#[from] sqlx::Error),

    #[error("rate snapshot is corrupt: {0}")]
    CorruptSnapshot(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("conversion rate for {0} not found")]
    RateMissing(String),
}

/// Failures of the outbound chat socket.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("origin must be an http(s) or ws(s) url, got {0:?}")]
    InvalidOrigin(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("event could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}
