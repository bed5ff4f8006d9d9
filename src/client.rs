//! Reconnecting chat socket for consumers of the relay.
//!
//! One socket per logged-in session. After the transport opens, the socket
//! authenticates with the session token and only then accepts outgoing
//! events. Inbound events are dispatched to handlers subscribed by kind.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::protocol::{CloseFrame, Message, frame::coding::CloseCode},
};
use tracing::{debug, info, warn};

use crate::{
    chat::{ClientEvent, ServerEvent, ServerEventKind},
    error::ClientError,
};

#[derive(Debug, Clone)]
pub struct ChatSocketConfig {
    /// Page origin, e.g. `https://market.example`. The socket connects to `/ws` on it.
    pub origin: String,
    pub token: String,
    /// Reconnect delay is `base_delay * attempt`.
    pub base_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl ChatSocketConfig {
    pub fn new(origin: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            token: token.into(),
            base_delay: Duration::from_secs(1),
            max_reconnect_attempts: 5,
        }
    }

    /// `https` pages get `wss`, everything else `ws`.
    pub fn endpoint(&self) -> Result<String, ClientError> {
        let origin = self.origin.trim_end_matches('/');
        let (scheme, rest) = origin
            .split_once("://")
            .ok_or_else(|| ClientError::InvalidOrigin(self.origin.clone()))?;

        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            _ => return Err(ClientError::InvalidOrigin(self.origin.clone())),
        };
        if rest.is_empty() {
            return Err(ClientError::InvalidOrigin(self.origin.clone()));
        }
        Ok(format!("{scheme}://{rest}/ws"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
}

type Handler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    next_id: AtomicU64,
    by_kind: Mutex<HashMap<ServerEventKind, Vec<(u64, Handler)>>>,
}

impl Handlers {
    fn add(&self, kind: ServerEventKind, handler: Handler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut by_kind) = self.by_kind.lock() {
            by_kind.entry(kind).or_default().push((id, handler));
        }
        id
    }

    fn remove(&self, kind: ServerEventKind, id: u64) {
        if let Ok(mut by_kind) = self.by_kind.lock() {
            if let Some(list) = by_kind.get_mut(&kind) {
                list.retain(|(h, _)| *h != id);
            }
        }
    }

    fn dispatch(&self, event: &ServerEvent) {
        let handlers: Vec<Handler> = match self.by_kind.lock() {
            Ok(by_kind) => by_kind
                .get(&event.kind())
                .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default(),
            Err(_) => return,
        };
        for handler in handlers {
            handler(event);
        }
    }
}

/// Returned by [`ChatSocket::subscribe`]. Dropping it keeps the handler.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    kind: ServerEventKind,
    id: u64,
    handlers: Weak<Handlers>,
}

impl Subscription {
    /// Removes exactly this registration.
    pub fn unsubscribe(self) {
        if let Some(handlers) = self.handlers.upgrade() {
            handlers.remove(self.kind, self.id);
        }
    }
}

enum Command {
    Close,
}

enum SessionEnd {
    Closed,
    Dropped,
}

pub struct ChatSocket {
    state: watch::Receiver<SocketState>,
    handlers: Arc<Handlers>,
    outgoing: mpsc::UnboundedSender<ClientEvent>,
    commands: mpsc::UnboundedSender<Command>,
    attempts: Arc<AtomicU32>,
    task: JoinHandle<()>,
}

impl ChatSocket {
    /// Starts connecting in the background. Fails only on a bad origin.
    pub fn connect(config: ChatSocketConfig) -> Result<Self, ClientError> {
        let endpoint = config.endpoint()?;
        let (state_tx, state) = watch::channel(SocketState::Disconnected);
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let handlers = Arc::new(Handlers::default());
        let attempts = Arc::new(AtomicU32::new(0));

        let worker = Worker {
            endpoint,
            config,
            state: state_tx,
            handlers: handlers.clone(),
            outgoing: outgoing_rx,
            commands: commands_rx,
            attempts: attempts.clone(),
        };
        let task = tokio::spawn(worker.run());

        Ok(Self {
            state,
            handlers,
            outgoing,
            commands,
            attempts,
            task,
        })
    }

    pub fn state(&self) -> SocketState {
        *self.state.borrow()
    }

    /// Watch channel of state transitions. Closes once the socket stops for good.
    pub fn state_changes(&self) -> watch::Receiver<SocketState> {
        self.state.clone()
    }

    pub fn subscribe<F>(&self, kind: ServerEventKind, handler: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let id = self.handlers.add(kind, Arc::new(handler));
        Subscription {
            kind,
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    /// Sends only while authenticated and open. Returns whether the event was
    /// handed to the transport; nothing is queued otherwise.
    pub fn send(&self, event: ClientEvent) -> bool {
        if self.state() != SocketState::Ready {
            debug!("dropping {} while not ready", event.kind());
            return false;
        }
        self.outgoing.send(event).is_ok()
    }

    /// Consecutive failed reconnects since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Closes the transport and cancels any pending reconnect.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ChatSocket {
    fn drop(&mut self) {
        self.close();
    }
}

type Stream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct Worker {
    endpoint: String,
    config: ChatSocketConfig,
    state: watch::Sender<SocketState>,
    handlers: Arc<Handlers>,
    outgoing: mpsc::UnboundedReceiver<ClientEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    attempts: Arc<AtomicU32>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            self.state.send_replace(SocketState::Connecting);

            let connected = tokio::select! {
                connected = connect_async(self.endpoint.as_str()) => connected,
                _ = self.commands.recv() => break,
            };

            match connected {
                Ok((stream, _)) => {
                    self.attempts.store(0, Ordering::Relaxed);
                    info!("chat socket connected to {}", self.endpoint);
                    if let SessionEnd::Closed = self.session(stream).await {
                        break;
                    }
                }
                Err(e) => warn!("chat socket connect failed: {e}"),
            }

            self.state.send_replace(SocketState::Disconnected);
            // nothing sent while disconnected is replayed
            while self.outgoing.try_recv().is_ok() {}

            let attempt = self.attempts.load(Ordering::Relaxed);
            if attempt >= self.config.max_reconnect_attempts {
                warn!("giving up on chat socket after {attempt} reconnect attempts");
                break;
            }
            let attempt = attempt + 1;
            self.attempts.store(attempt, Ordering::Relaxed);

            let delay = self.config.base_delay * attempt;
            debug!("reconnecting chat socket in {delay:?} (attempt {attempt})");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.commands.recv() => break,
            }
        }

        self.state.send_replace(SocketState::Disconnected);
    }

    async fn session(&mut self, stream: Stream) -> SessionEnd {
        let (mut write, mut read) = stream.split();

        self.state.send_replace(SocketState::Authenticating);
        let auth = ClientEvent::Auth { token: self.config.token.clone() };
        if let Err(e) = send_event(&mut write, &auth).await {
            warn!("chat socket auth send failed: {e}");
            return SessionEnd::Dropped;
        }

        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.receive(text.as_str()),
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Dropped,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("chat socket error: {e}");
                        return SessionEnd::Dropped;
                    }
                },
                Some(event) = self.outgoing.recv() => {
                    if *self.state.borrow() != SocketState::Ready {
                        continue;
                    }
                    if let Err(e) = send_event(&mut write, &event).await {
                        warn!("chat socket send failed: {e}");
                        return SessionEnd::Dropped;
                    }
                }
                _ = self.commands.recv() => {
                    let close = CloseFrame { code: CloseCode::Normal, reason: "closed".into() };
                    let _ = write.send(Message::Close(Some(close))).await;
                    return SessionEnd::Closed;
                }
            }
        }
    }

    fn receive(&self, text: &str) {
        let event = match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                debug!("ignoring unrecognised frame: {e}");
                return;
            }
        };

        match &event {
            ServerEvent::AuthSuccess { user_id } => {
                debug!("chat socket authenticated as {user_id}");
                self.state.send_replace(SocketState::Ready);
            }
            ServerEvent::AuthError { error } => warn!("chat socket auth rejected: {error}"),
            _ => {}
        }
        self.handlers.dispatch(&event);
    }
}

async fn send_event<S>(write: &mut S, event: &ClientEvent) -> Result<(), ClientError>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(event)?;
    write.send(Message::Text(json.into())).await?;
    Ok(())
}
