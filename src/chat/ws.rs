use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    ChatRelay,
    registry::{Connection, OUTBOUND_BUFFER, Outbound},
};

#[debug_handler(state = crate::AppState)]
pub async fn chat_ws(State(relay): State<Arc<ChatRelay>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(async move |socket| handle_socket(socket, relay).await)
}

async fn handle_socket(socket: WebSocket, relay: Arc<ChatRelay>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);
    let conn = Arc::new(Connection::new(tx));
    debug!(connection = %conn.id(), "chat socket opened");

    let mut send_task = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            let msg = match out {
                Outbound::Event(event) => match serde_json::to_string(&event) {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        warn!("failed to encode event: {e}");
                        continue;
                    }
                },
                Outbound::Close => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            };
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    // one frame at a time, so a sender's messages are stored and pushed in order
    loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => relay.handle_text(&conn, text.as_str()).await,
                Some(Ok(Message::Binary(_))) => warn!(connection = %conn.id(), "ignoring binary frame"),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(connection = %conn.id(), "socket error: {e}");
                    break;
                }
            },
            _ = conn.dropped() => break,
            _ = &mut send_task => break,
        }
    }

    relay.registry().remove(&conn).await;
    send_task.abort();
    info!(connection = %conn.id(), "chat socket closed");
}
