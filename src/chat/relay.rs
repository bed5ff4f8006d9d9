use std::sync::Arc;

use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{
    model::{ChatMessage, MessageKind},
    protocol::{ClientEvent, ServerEvent},
    registry::{Connection, ConnectionRegistry},
    store::ChatStore,
};
use crate::error::ChatError;

/// Routes inbound events from one connection. Callers feed a connection's
/// frames one at a time so a sender's messages keep their order.
pub struct ChatRelay {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn ChatStore>,
}

impl ChatRelay {
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn ChatStore>) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub async fn handle_text(&self, conn: &Arc<Connection>, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle_event(conn, event).await,
            Err(e) => {
                let e = ChatError::MalformedEvent(e.to_string());
                warn!(connection = %conn.id(), "dropping frame: {e}");
            }
        }
    }

    pub async fn handle_event(&self, conn: &Arc<Connection>, event: ClientEvent) {
        if let ClientEvent::Auth { token } = &event {
            let _ = self.registry.authenticate(conn, token).await;
            return;
        }

        let Some(user_id) = conn.user_id().await else {
            let e = ChatError::NotAuthenticated;
            debug!(connection = %conn.id(), "ignoring {}: {e}", event.kind());
            return;
        };

        match event {
            ClientEvent::Auth { .. } => {}
            ClientEvent::JoinRoom { room_id } => conn.join_room(room_id).await,
            ClientEvent::LeaveRoom { room_id } => conn.leave_room(room_id).await,
            ClientEvent::ChatMessage { room_id, sender_id, content, message_type } => {
                let sent = self
                    .relay_message(&user_id, room_id, &sender_id, &content, message_type)
                    .await;
                if let Err(e) = sent {
                    let _ = conn.send(ServerEvent::Error {
                        error: client_message(&e),
                        room_id: Some(room_id),
                    });
                }
            }
        }
    }

    /// Persists the message, then pushes it to whichever participants are
    /// online. Nothing is pushed if the write fails.
    pub async fn relay_message(
        &self,
        user_id: &str,
        room_id: Uuid,
        sender_id: &str,
        content: &str,
        kind: MessageKind,
    ) -> Result<ChatMessage, ChatError> {
        if sender_id != user_id {
            return Err(ChatError::SenderMismatch { sender_id: sender_id.to_owned() });
        }
        if content.trim().is_empty() {
            return Err(ChatError::MalformedEvent("empty message".to_owned()));
        }

        let room = self
            .store
            .get_chat_room(room_id)
            .await?
            .ok_or(ChatError::RoomNotFound(room_id))?;
        if !room.is_member(user_id) {
            return Err(ChatError::NotAMember { user_id: user_id.to_owned(), room_id });
        }

        let message = self
            .store
            .create_message(room_id, sender_id, content, kind)
            .await
            .inspect_err(|e| error!(%room_id, sender_id, "message not saved: {e}"))?;

        for participant in room.participants() {
            match self.registry.lookup(participant).await {
                Some(target) => {
                    if let Err(e) = target.send(ServerEvent::NewMessage { message: message.clone() }) {
                        debug!(%room_id, participant, "push skipped: {e}");
                    }
                }
                None => debug!(%room_id, participant, "participant offline"),
            }
        }

        Ok(message)
    }
}

fn client_message(e: &ChatError) -> String {
    match e {
        ChatError::Persistence(_) => "message could not be saved".to_owned(),
        other => other.to_string(),
    }
}
