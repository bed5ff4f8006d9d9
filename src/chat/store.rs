use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{ChatMessage, ChatRoom, MessageKind};
use crate::{
    db::{from_millis, to_millis},
    error::ChatError,
};

/// What the relay needs from durable storage.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_message(
        &self,
        room_id: Uuid,
        sender_id: &str,
        content: &str,
        kind: MessageKind,
    ) -> Result<ChatMessage, ChatError>;

    async fn get_chat_room(&self, room_id: Uuid) -> Result<Option<ChatRoom>, ChatError>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    #[serde(flatten)]
    pub room: ChatRoom,
    pub unread_count: i64,
}

type RoomRow = (String, String, String, String, bool, bool, i64);
type MessageRow = (String, String, String, String, String, bool, i64);

const ROOM_COLUMNS: &str = "id,buyer_id,seller_id,item_id,buyer_hidden,seller_hidden,created_at";
const MESSAGE_COLUMNS: &str = "id,room_id,sender_id,content,kind,is_read,created_at";

fn parse_uuid(raw: &str) -> Result<Uuid, sqlx::Error> {
    Uuid::parse_str(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn room_from_row(
    (id, buyer_id, seller_id, item_id, buyer_hidden, seller_hidden, created_at): RoomRow,
) -> Result<ChatRoom, sqlx::Error> {
    Ok(ChatRoom {
        id: parse_uuid(&id)?,
        buyer_id,
        seller_id,
        item_id,
        buyer_hidden,
        seller_hidden,
        created_at: from_millis(created_at)?,
    })
}

fn message_from_row(
    (id, room_id, sender_id, content, kind, is_read, created_at): MessageRow,
) -> Result<ChatMessage, sqlx::Error> {
    Ok(ChatMessage {
        id: parse_uuid(&id)?,
        room_id: parse_uuid(&room_id)?,
        sender_id,
        content,
        kind: kind.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
        is_read,
        created_at: from_millis(created_at)?,
    })
}

#[derive(Clone)]
pub struct SqliteChatStore {
    db_pool: SqlitePool,
}

impl SqliteChatStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    /// Rooms are keyed by the (buyer, seller) pair, so a second item from the
    /// same seller lands in the existing room. Returns whether it was created.
    pub async fn find_or_create_room(
        &self,
        buyer_id: &str,
        seller_id: &str,
        item_id: &str,
    ) -> Result<(ChatRoom, bool), ChatError> {
        if buyer_id == seller_id {
            return Err(ChatError::SameParticipants);
        }

        let id = Uuid::now_v7();
        let inserted = sqlx::query(
            "INSERT INTO chat_rooms (id,buyer_id,seller_id,item_id,created_at) VALUES (?,?,?,?,?) \
             ON CONFLICT (buyer_id,seller_id) DO NOTHING",
        )
        .bind(id.to_string())
        .bind(buyer_id)
        .bind(seller_id)
        .bind(item_id)
        .bind(to_millis(OffsetDateTime::now_utc()))
        .execute(&self.db_pool)
        .await?
        .rows_affected()
            == 1;

        if !inserted {
            // the buyer asked for it again, so it comes back to their list
            sqlx::query("UPDATE chat_rooms SET buyer_hidden=0 WHERE buyer_id=? AND seller_id=?")
                .bind(buyer_id)
                .bind(seller_id)
                .execute(&self.db_pool)
                .await?;
        }

        let row: RoomRow = sqlx::query_as(&format!(
            "SELECT {ROOM_COLUMNS} FROM chat_rooms WHERE buyer_id=? AND seller_id=?"
        ))
        .bind(buyer_id)
        .bind(seller_id)
        .fetch_one(&self.db_pool)
        .await?;

        Ok((room_from_row(row)?, inserted))
    }

    pub async fn list_rooms(&self, user_id: &str) -> Result<Vec<RoomSummary>, ChatError> {
        let rows: Vec<(String, String, String, String, bool, bool, i64, i64)> = sqlx::query_as(
            "SELECT r.id,r.buyer_id,r.seller_id,r.item_id,r.buyer_hidden,r.seller_hidden,r.created_at, \
                (SELECT COUNT(*) FROM chat_messages m WHERE m.room_id=r.id AND m.sender_id<>? AND m.is_read=0) \
             FROM chat_rooms r \
             WHERE (r.buyer_id=? AND r.buyer_hidden=0) OR (r.seller_id=? AND r.seller_hidden=0) \
             ORDER BY r.created_at DESC",
        )
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.db_pool)
        .await?;

        rows.into_iter()
            .map(|(id, buyer, seller, item, bh, sh, created_at, unread_count)| {
                Ok::<_, ChatError>(RoomSummary {
                    room: room_from_row((id, buyer, seller, item, bh, sh, created_at))?,
                    unread_count,
                })
            })
            .collect()
    }

    /// Oldest first.
    pub async fn list_messages(&self, room_id: Uuid) -> Result<Vec<ChatMessage>, ChatError> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE room_id=? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(room_id.to_string())
        .fetch_all(&self.db_pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(message_from_row)
            .collect::<Result<_, _>>()?)
    }

    /// Marks everything the other side sent as read.
    pub async fn mark_read(&self, room_id: Uuid, reader_id: &str) -> Result<u64, ChatError> {
        Ok(sqlx::query("UPDATE chat_messages SET is_read=1 WHERE room_id=? AND sender_id<>? AND is_read=0")
            .bind(room_id.to_string())
            .bind(reader_id)
            .execute(&self.db_pool)
            .await?
            .rows_affected())
    }

    pub async fn hide_room(&self, room_id: Uuid, user_id: &str) -> Result<(), ChatError> {
        let room = self.member_room(room_id, user_id).await?;
        let column = if room.buyer_id == user_id { "buyer_hidden" } else { "seller_hidden" };

        sqlx::query(&format!("UPDATE chat_rooms SET {column}=1 WHERE id=?"))
            .bind(room_id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    pub async fn delete_room(&self, room_id: Uuid, user_id: &str) -> Result<(), ChatError> {
        self.member_room(room_id, user_id).await?;

        let mut tx = self.db_pool.begin().await?;
        sqlx::query("DELETE FROM chat_messages WHERE room_id=?")
            .bind(room_id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chat_rooms WHERE id=?")
            .bind(room_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn member_room(&self, room_id: Uuid, user_id: &str) -> Result<ChatRoom, ChatError> {
        let room = self
            .get_chat_room(room_id)
            .await?
            .ok_or(ChatError::RoomNotFound(room_id))?;
        if !room.is_member(user_id) {
            return Err(ChatError::NotAMember { user_id: user_id.to_owned(), room_id });
        }
        Ok(room)
    }
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn create_message(
        &self,
        room_id: Uuid,
        sender_id: &str,
        content: &str,
        kind: MessageKind,
    ) -> Result<ChatMessage, ChatError> {
        let message = ChatMessage {
            id: Uuid::now_v7(),
            room_id,
            sender_id: sender_id.to_owned(),
            content: content.to_owned(),
            kind,
            is_read: false,
            created_at: OffsetDateTime::now_utc(),
        };

        sqlx::query("INSERT INTO chat_messages (id,room_id,sender_id,content,kind,is_read,created_at) VALUES (?,?,?,?,?,0,?)")
            .bind(message.id.to_string())
            .bind(room_id.to_string())
            .bind(sender_id)
            .bind(content)
            .bind(kind.as_str())
            .bind(to_millis(message.created_at))
            .execute(&self.db_pool)
            .await?;

        // what the database holds, millisecond precision
        Ok(ChatMessage {
            created_at: from_millis(to_millis(message.created_at))?,
            ..message
        })
    }

    async fn get_chat_room(&self, room_id: Uuid) -> Result<Option<ChatRoom>, ChatError> {
        let row: Option<RoomRow> = sqlx::query_as(&format!("SELECT {ROOM_COLUMNS} FROM chat_rooms WHERE id=?"))
            .bind(room_id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.map(room_from_row).transpose()?)
    }
}
