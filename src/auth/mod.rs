mod token;

use axum::{Json, Router, debug_handler, extract::State, routing::get};
use serde::Serialize;
use tower_sessions::Session;

use crate::{AppError, AppResult, AppState, session::USER_ID};

pub use token::{Claims, TokenError, TokenKeys};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/chat/token", get(chat_token))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChatTokenResponse {
    token: String,
    user_id: String,
}

/// Hands the logged-in user a token for the chat socket's `auth` event.
#[debug_handler(state = AppState)]
pub(crate) async fn chat_token(
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Json<ChatTokenResponse>> {
    let Some(user_id) = session.get::<String>(USER_ID).await? else {
        return Err(AppError::unauthorized());
    };

    let token = state.tokens.issue(&user_id, state.config.token_ttl);
    Ok(Json(ChatTokenResponse { token, user_id }))
}
