use axum::{Json, debug_handler, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use super::{ChatRoom, SqliteChatStore, session_user, to_app_error};
use crate::AppResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewRoomBody {
    seller_id: String,
    item_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewRoomResponse {
    room: ChatRoom,
    created: bool,
}

/// The session user opens a chat as the buyer.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn new_room(
    State(store): State<SqliteChatStore>,
    session: Session,

    Json(NewRoomBody { seller_id, item_id }): Json<NewRoomBody>,
) -> AppResult<(StatusCode, Json<NewRoomResponse>)> {
    let buyer_id = session_user(&session).await?;

    let (room, created) = store
        .find_or_create_room(&buyer_id, &seller_id, &item_id)
        .await
        .map_err(to_app_error)?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(NewRoomResponse { room, created })))
}
