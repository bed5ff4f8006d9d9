//! Live connections keyed by authenticated user.
//!
//! One entry per user. A newer authenticated connection for the same user
//! replaces the mapping; the older handle is closed only when eviction is
//! enabled.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{
    RwLock,
    mpsc::{self, error::TrySendError},
    watch,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::ServerEvent;
use crate::{auth::TokenKeys, error::ChatError};

pub type ConnectionId = Uuid;

/// Outbound events a connection may have queued. A peer that falls this far
/// behind is disconnected.
pub const OUTBOUND_BUFFER: usize = 256;

/// What the socket writer task is asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(ServerEvent),
    Close,
}

#[derive(Debug, Default)]
struct ConnectionTags {
    user_id: Option<String>,
    room: Option<Uuid>,
}

/// Handle to one open transport. Cloned into the registry as `Arc<Connection>`.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    dropped: watch::Sender<bool>,
    tags: RwLock<ConnectionTags>,
}

impl Connection {
    pub fn new(tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id: Uuid::now_v7(),
            tx,
            dropped: watch::Sender::new(false),
            tags: RwLock::default(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues an event for the writer without waiting. A full queue drops the
    /// connection.
    pub fn send(&self, event: ServerEvent) -> Result<(), ChatError> {
        if *self.dropped.borrow() {
            return Err(ChatError::TransportClosed);
        }
        match self.tx.try_send(Outbound::Event(event)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(connection = %self.id, "outbound queue full, dropping connection");
                self.drop_transport();
                Err(ChatError::TransportClosed)
            }
            Err(TrySendError::Closed(_)) => Err(ChatError::TransportClosed),
        }
    }

    /// Asks the writer to send a close frame, or drops the transport outright
    /// when the queue has no room for it.
    pub fn close(&self) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(Outbound::Close) {
            self.drop_transport();
        }
    }

    fn drop_transport(&self) {
        self.dropped.send_replace(true);
    }

    /// Resolves once the transport has been dropped from this side.
    pub async fn dropped(&self) {
        let mut rx = self.dropped.subscribe();
        let _ = rx.wait_for(|dropped| *dropped).await;
    }

    pub fn is_closed(&self) -> bool {
        *self.dropped.borrow() || self.tx.is_closed()
    }

    pub async fn user_id(&self) -> Option<String> {
        self.tags.read().await.user_id.clone()
    }

    pub async fn join_room(&self, room_id: Uuid) {
        self.tags.write().await.room = Some(room_id);
    }

    /// Clears the tag only if it still names `room_id`.
    pub async fn leave_room(&self, room_id: Uuid) {
        let mut tags = self.tags.write().await;
        if tags.room == Some(room_id) {
            tags.room = None;
        }
    }

    pub async fn current_room(&self) -> Option<Uuid> {
        self.tags.read().await.room
    }
}

pub struct ConnectionRegistry {
    tokens: TokenKeys,
    evict_superseded: bool,
    by_user: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new(tokens: TokenKeys, evict_superseded: bool) -> Self {
        Self {
            tokens,
            evict_superseded,
            by_user: RwLock::default(),
        }
    }

    /// Verifies `token` and maps its subject to `conn`. A failure is reported
    /// to the connection as `auth_error` and leaves the socket open.
    pub async fn authenticate(&self, conn: &Arc<Connection>, token: &str) -> Result<String, ChatError> {
        let claims = match self.tokens.verify(token) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(connection = %conn.id, "auth failed: {e}");
                let _ = conn.send(ServerEvent::AuthError { error: e.to_string() });
                return Err(e.into());
            }
        };
        let user_id = claims.sub;

        let previous_user = conn.tags.write().await.user_id.replace(user_id.clone());

        let superseded = {
            let mut by_user = self.by_user.write().await;
            if let Some(previous_user) = previous_user.filter(|u| *u != user_id) {
                if by_user.get(&previous_user).is_some_and(|c| c.id == conn.id) {
                    by_user.remove(&previous_user);
                }
            }
            by_user.insert(user_id.clone(), conn.clone())
        };

        if let Some(old) = superseded.filter(|old| old.id != conn.id) {
            if self.evict_superseded {
                info!(%user_id, connection = %old.id, "closing superseded connection");
                old.close();
            } else {
                debug!(%user_id, connection = %old.id, "connection superseded");
            }
        }

        info!(%user_id, connection = %conn.id, "chat connection authenticated");
        conn.send(ServerEvent::AuthSuccess { user_id: user_id.clone() })?;
        Ok(user_id)
    }

    pub async fn lookup(&self, user_id: &str) -> Option<Arc<Connection>> {
        let conn = self.by_user.read().await.get(user_id).cloned()?;
        if conn.is_closed() {
            warn!(user_id, connection = %conn.id, "stale connection in registry");
            return None;
        }
        Some(conn)
    }

    /// Drops whatever maps to this exact handle. A newer connection for the
    /// same user stays.
    pub async fn remove(&self, conn: &Connection) {
        self.by_user.write().await.retain(|_, c| c.id != conn.id);
    }

    pub async fn len(&self) -> usize {
        self.by_user.read().await.len()
    }
}
