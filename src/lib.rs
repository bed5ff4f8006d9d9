pub mod appresult;
pub mod auth;
pub mod chat;
pub mod client;
pub mod config;
pub mod currency;
pub mod db;
pub mod error;
pub mod rates;
pub mod session;

use std::sync::Arc;

use axum::{Json, Router, debug_handler, extract::{FromRef, State}, routing::get};
use serde::Serialize;
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};

pub use appresult::{AppError, AppResult};

use auth::TokenKeys;
use chat::{ChatRelay, ConnectionRegistry, SqliteChatStore};
use config::Config;
use currency::CurrencyConverter;
use rates::RateCache;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Arc<Config>,
    pub tokens: TokenKeys,
    pub chat_store: SqliteChatStore,
    pub relay: Arc<ChatRelay>,
    pub converter: CurrencyConverter,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, config: Config, rates: Arc<RateCache>) -> Self {
        let tokens = TokenKeys::new(&config.jwt_secret);
        let chat_store = SqliteChatStore::new(db_pool.clone());
        let registry = Arc::new(ConnectionRegistry::new(tokens.clone(), config.evict_superseded));
        let relay = Arc::new(ChatRelay::new(registry, Arc::new(chat_store.clone())));

        Self {
            db_pool,
            config: Arc::new(config),
            tokens,
            chat_store,
            relay,
            converter: CurrencyConverter::new(rates),
        }
    }
}

pub fn app(state: AppState) -> Router {
    with_layers(routes(), state)
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(chat::chat_ws))

        .merge(auth::router())
        .nest("/api/chat", chat::router())
        .nest("/api/currency", currency::router())
}

/// Attaches state plus the session and CORS layers to `router`.
pub fn with_layers(router: Router<AppState>, state: AppState) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(12)));

    router
        .with_state(state)
        .layer(session_layer)
        .layer(CorsLayer::permissive())
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    connections: usize,
}

#[debug_handler(state = AppState)]
async fn health(State(relay): State<Arc<ChatRelay>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        connections: relay.registry().len().await,
    })
}
