//! JSON text frames exchanged over the chat socket.
//!
//! Client -> Server:
//! ```json
//! {"type": "auth", "token": "..."}
//! {"type": "join_room", "roomId": "..."}
//! {"type": "leave_room", "roomId": "..."}
//! {"type": "chat_message", "roomId": "...", "senderId": "...", "content": "hi", "messageType": "text"}
//! ```
//!
//! Server -> Client:
//! ```json
//! {"type": "auth_success", "userId": "..."}
//! {"type": "auth_error", "error": "token expired"}
//! {"type": "new_message", "message": {...}}
//! {"type": "error", "error": "...", "roomId": "..."}
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::{ChatMessage, MessageKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    Auth {
        token: String,
    },
    JoinRoom {
        room_id: Uuid,
    },
    LeaveRoom {
        room_id: Uuid,
    },
    ChatMessage {
        room_id: Uuid,
        sender_id: String,
        content: String,
        #[serde(default)]
        message_type: MessageKind,
    },
}

impl ClientEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Auth { .. } => "auth",
            ClientEvent::JoinRoom { .. } => "join_room",
            ClientEvent::LeaveRoom { .. } => "leave_room",
            ClientEvent::ChatMessage { .. } => "chat_message",
        }
    }

    pub fn room_id(&self) -> Option<Uuid> {
        match self {
            ClientEvent::Auth { .. } => None,
            ClientEvent::JoinRoom { room_id }
            | ClientEvent::LeaveRoom { room_id }
            | ClientEvent::ChatMessage { room_id, .. } => Some(*room_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    AuthSuccess {
        user_id: String,
    },
    AuthError {
        error: String,
    },
    NewMessage {
        message: ChatMessage,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<Uuid>,
    },
}

/// Discriminant of [`ServerEvent`], for subscribing to one kind of event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEventKind {
    AuthSuccess,
    AuthError,
    NewMessage,
    Error,
}

impl ServerEvent {
    pub fn kind(&self) -> ServerEventKind {
        match self {
            ServerEvent::AuthSuccess { .. } => ServerEventKind::AuthSuccess,
            ServerEvent::AuthError { .. } => ServerEventKind::AuthError,
            ServerEvent::NewMessage { .. } => ServerEventKind::NewMessage,
            ServerEvent::Error { .. } => ServerEventKind::Error,
        }
    }
}
