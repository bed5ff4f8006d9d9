mod model;
mod new;
pub mod protocol;
mod registry;
mod relay;
mod room;
mod store;
mod ws;

use axum::{
    Router,
    http::StatusCode,
    routing::{delete, get, post},
};
use tower_sessions::Session;

use crate::{AppError, AppResult, AppState, error::ChatError, session::USER_ID};

pub use model::{ChatMessage, ChatRoom, MessageKind};
pub use protocol::{ClientEvent, ServerEvent, ServerEventKind};
pub use registry::{Connection, ConnectionId, ConnectionRegistry, Outbound};
pub use relay::ChatRelay;
pub use store::{ChatStore, RoomSummary, SqliteChatStore};
pub use ws::chat_ws;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rooms", get(room::rooms).post(new::new_room))
        .route("/rooms/{uuid}", delete(room::delete))
        .route("/rooms/{uuid}/messages", get(room::messages))
        .route("/rooms/{uuid}/read", post(room::mark_read))
        .route("/rooms/{uuid}/hide", post(room::hide))
}

pub(crate) async fn session_user(session: &Session) -> AppResult<String> {
    session
        .get::<String>(USER_ID)
        .await?
        .ok_or_else(AppError::unauthorized)
}

pub(crate) fn to_app_error(e: ChatError) -> AppError {
    let status = match &e {
        ChatError::RoomNotFound(_) => StatusCode::NOT_FOUND,
        ChatError::NotAMember { .. } | ChatError::SenderMismatch { .. } => StatusCode::FORBIDDEN,
        ChatError::NotAuthenticated | ChatError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
        ChatError::SameParticipants | ChatError::MalformedEvent(_) => StatusCode::BAD_REQUEST,
        ChatError::Persistence(_) | ChatError::TransportClosed => StatusCode::INTERNAL_SERVER_ERROR,
    };
    AppError { status, error: e.into() }
}
