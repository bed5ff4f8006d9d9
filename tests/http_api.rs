mod common;

use reqwest::StatusCode;
use serde_json::Value;

use common::spawn_server;

#[tokio::test]
async fn health_reports_connections() {
    let server = spawn_server().await;
    let body: Value = reqwest::get(server.http("/health")).await.unwrap().json().await.unwrap();
    assert_eq!(body, serde_json::json!({"status": "ok", "connections": 0}));
}

#[tokio::test]
async fn converts_with_builtin_rates() {
    let server = spawn_server().await;
    let body: Value = reqwest::get(server.http("/api/currency/convert?amount=100&from=usd"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["to"], "KRW");
    assert_eq!(body["converted"], 135000.0);
    assert_eq!(body["display"], "₩135,000 ($100.00)");
}

#[tokio::test]
async fn unknown_currency_falls_back_to_listing_price() {
    let server = spawn_server().await;
    let body: Value = reqwest::get(server.http("/api/currency/convert?amount=40&from=CHF"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert!(body["converted"].is_null());
    assert_eq!(body["display"], "CHF 40.00");
}

#[tokio::test]
async fn rates_endpoint_serves_table() {
    let server = spawn_server().await;
    let body: Value = reqwest::get(server.http("/api/currency/rates")).await.unwrap().json().await.unwrap();

    assert_eq!(body["base"], "KRW");
    assert_eq!(body["rates"]["USD"], 1350.0);
    assert!(body["updatedAt"].is_string());
}

#[tokio::test]
async fn chat_endpoints_need_a_session() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let token = client.get(server.http("/api/chat/token")).send().await.unwrap();
    assert_eq!(token.status(), StatusCode::UNAUTHORIZED);

    let rooms = client.get(server.http("/api/chat/rooms")).send().await.unwrap();
    assert_eq!(rooms.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn rooms_are_created_once_and_closed_to_outsiders() {
    let server = spawn_server().await;
    let buyer = server.session("buyer").await;
    let outsider = server.session("outsider").await;
    let body = serde_json::json!({"sellerId": "seller", "itemId": "bike-1"});

    let first = buyer.post(server.http("/api/chat/rooms")).json(&body).send().await.unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let first: Value = first.json().await.unwrap();
    assert_eq!(first["created"], true);

    let again = buyer.post(server.http("/api/chat/rooms")).json(&body).send().await.unwrap();
    assert_eq!(again.status(), StatusCode::OK);
    let again: Value = again.json().await.unwrap();
    assert_eq!(again["created"], false);
    assert_eq!(again["room"]["id"], first["room"]["id"]);

    let room_id = first["room"]["id"].as_str().unwrap();
    let messages = server.http(&format!("/api/chat/rooms/{room_id}/messages"));
    let read = server.http(&format!("/api/chat/rooms/{room_id}/read"));

    assert_eq!(outsider.get(&messages).send().await.unwrap().status(), StatusCode::FORBIDDEN);
    assert_eq!(outsider.post(&read).send().await.unwrap().status(), StatusCode::FORBIDDEN);

    let history: Value = buyer.get(&messages).send().await.unwrap().json().await.unwrap();
    assert_eq!(history, serde_json::json!([]));
    let marked: Value = buyer.post(&read).send().await.unwrap().json().await.unwrap();
    assert_eq!(marked["updated"], 0);

    let missing = server.http(&format!("/api/chat/rooms/{}/messages", uuid::Uuid::now_v7()));
    assert_eq!(buyer.get(&missing).send().await.unwrap().status(), StatusCode::NOT_FOUND);
}
