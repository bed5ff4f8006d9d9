#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{extract::Path, http::StatusCode, routing::post};
use campusmarket::{
    AppState,
    config::Config,
    db,
    rates::{HttpRateSource, RateCache, RefreshSchedule, SqliteSnapshots},
    routes,
    session::USER_ID,
    with_layers,
};
use reqwest::header::{self, HeaderMap, HeaderValue};
use tokio::net::TcpListener;
use tower_sessions::Session;

pub const SECRET: &str = "integration-secret";

pub struct Server {
    pub addr: SocketAddr,
    pub state: AppState,
}

impl Server {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn token(&self, user_id: &str) -> String {
        self.state.tokens.issue(user_id, time::Duration::minutes(10))
    }

    /// Logs `user_id` in and returns a client that carries the session cookie.
    pub async fn session(&self, user_id: &str) -> reqwest::Client {
        let res = reqwest::Client::new()
            .post(self.http(&format!("/test/login/{user_id}")))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let set_cookie = res.headers()[header::SET_COOKIE].to_str().unwrap();
        let cookie = set_cookie.split(';').next().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        reqwest::Client::builder().default_headers(headers).build().unwrap()
    }
}

/// Stands in for the marketplace login, which owns `USER_ID` in production.
async fn login(session: Session, Path(user_id): Path<String>) -> StatusCode {
    session.insert(USER_ID, user_id).await.unwrap();
    StatusCode::NO_CONTENT
}

/// Serves the app on an ephemeral port. The rate source points at a closed
/// port, so the cache runs on the built-in table.
pub async fn spawn_server() -> Server {
    let db_pool = db::connect_in_memory().await.unwrap();

    let config = Config {
        database_url: "sqlite::memory:".to_owned(),
        bind_addr: "127.0.0.1:0".to_owned(),
        jwt_secret: SECRET.to_owned(),
        token_ttl: time::Duration::minutes(10),
        base_currency: "KRW".to_owned(),
        exchange_api_url: "http://127.0.0.1:9".to_owned(),
        exchange_api_key: None,
        refresh: RefreshSchedule::new(9, 0, 9).unwrap(),
        rate_fetch_timeout: Duration::from_millis(500),
        evict_superseded: false,
    };

    let rates = Arc::new(RateCache::new(
        "KRW",
        Arc::new(HttpRateSource::new("http://127.0.0.1:9", config.rate_fetch_timeout).unwrap()),
        Arc::new(SqliteSnapshots::new(db_pool.clone())),
        config.rate_fetch_timeout,
    ));
    rates.initialize().await;

    let state = AppState::new(db_pool, config, rates);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = with_layers(
        routes().route("/test/login/{user_id}", post(login)),
        state.clone(),
    );
    tokio::spawn(async move { axum::serve(listener, router).await });

    Server { addr, state }
}
