use axum::{
    Json, debug_handler,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use tower_sessions::Session;
use uuid::Uuid;

use super::{ChatMessage, RoomSummary, SqliteChatStore, session_user, to_app_error};
use crate::AppResult;

#[debug_handler(state = crate::AppState)]
pub(crate) async fn rooms(
    State(store): State<SqliteChatStore>,
    session: Session,
) -> AppResult<Json<Vec<RoomSummary>>> {
    let user_id = session_user(&session).await?;
    Ok(Json(store.list_rooms(&user_id).await.map_err(to_app_error)?))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn messages(
    State(store): State<SqliteChatStore>,
    session: Session,
    Path(room_id): Path<Uuid>,
) -> AppResult<Json<Vec<ChatMessage>>> {
    let user_id = session_user(&session).await?;
    store.member_room(room_id, &user_id).await.map_err(to_app_error)?;

    Ok(Json(store.list_messages(room_id).await.map_err(to_app_error)?))
}

#[derive(Serialize)]
pub(crate) struct MarkedRead {
    updated: u64,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn mark_read(
    State(store): State<SqliteChatStore>,
    session: Session,
    Path(room_id): Path<Uuid>,
) -> AppResult<Json<MarkedRead>> {
    let user_id = session_user(&session).await?;
    store.member_room(room_id, &user_id).await.map_err(to_app_error)?;

    let updated = store.mark_read(room_id, &user_id).await.map_err(to_app_error)?;
    Ok(Json(MarkedRead { updated }))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn hide(
    State(store): State<SqliteChatStore>,
    session: Session,
    Path(room_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let user_id = session_user(&session).await?;
    store.hide_room(room_id, &user_id).await.map_err(to_app_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn delete(
    State(store): State<SqliteChatStore>,
    session: Session,
    Path(room_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let user_id = session_user(&session).await?;
    store.delete_room(room_id, &user_id).await.map_err(to_app_error)?;
    Ok(StatusCode::NO_CONTENT)
}
