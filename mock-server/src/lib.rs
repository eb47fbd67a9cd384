//! Stub HTTP and signaling server for exercising the networking runtime.
//!
//! # Routes
//! - `GET /ok`: `200 ok`
//! - `ANY /echo`: JSON description of the received request
//! - `ANY /status/{code}`: responds with `code`
//! - `ANY /hang`: never responds
//! - `GET /auth`: requires basic auth `user:pass`
//! - `GET /signal`: WebSocket signaling rendezvous
//!
//! The signaling hub is plain state plus a pure `Hub::handle` step function;
//! the socket loop only moves frames between the hub and the peers.

use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{mpsc, RwLock},
};
use tracing::{debug, info};
use uuid::Uuid;

pub const AUTH_USER: &str = "user";
pub const AUTH_PASSWORD: &str = "pass";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Welcome,
    CreateSession,
    JoinSession,
    LeaveSession,
    Offer,
    Answer,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMessage {
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SignalMessage {
    fn new(message_type: MessageType, session_id: &str) -> Self {
        Self {
            message_type,
            client_id: String::new(),
            session_id: session_id.to_string(),
            sdp: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoBody {
    pub method: String,
    pub body: String,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct Room {
    pub creator: String,
    pub participants: Vec<String>,
    pub offer: Option<String>,
}

/// Signaling rendezvous state.
#[derive(Debug, Default)]
pub struct Hub {
    pub sessions: HashMap<String, Room>,
    peers: HashMap<String, mpsc::UnboundedSender<SignalMessage>>,
}

impl Hub {
    /// Apply one message from `from` and return the messages to deliver,
    /// addressed by client id.
    pub fn handle(&mut self, from: &str, msg: SignalMessage) -> Vec<(String, SignalMessage)> {
        let reply_error = |reason: String| {
            let mut err = SignalMessage::new(MessageType::Error, &msg.session_id);
            err.error = Some(reason);
            vec![(from.to_string(), err)]
        };
        match msg.message_type {
            MessageType::CreateSession => {
                let session_id = Uuid::new_v4().to_string();
                self.sessions.insert(
                    session_id.clone(),
                    Room { creator: from.to_string(), ..Room::default() },
                );
                info!(%session_id, creator = from, "session created");
                vec![(from.to_string(), SignalMessage::new(MessageType::CreateSession, &session_id))]
            }
            MessageType::JoinSession => match self.sessions.get_mut(&msg.session_id) {
                Some(room) => {
                    if !room.participants.iter().any(|p| p == from) {
                        room.participants.push(from.to_string());
                    }
                    let mut reply = SignalMessage::new(MessageType::JoinSession, &msg.session_id);
                    reply.sdp = room.offer.clone();
                    vec![(from.to_string(), reply)]
                }
                None => reply_error(format!("session {} not found", msg.session_id)),
            },
            MessageType::Offer => match self.sessions.get_mut(&msg.session_id) {
                Some(room) if room.creator == from => {
                    room.offer = msg.sdp.clone();
                    let forward = SignalMessage { client_id: from.to_string(), ..msg.clone() };
                    room.participants.iter().map(|p| (p.clone(), forward.clone())).collect()
                }
                Some(_) => reply_error("only the session creator may offer".to_string()),
                None => reply_error(format!("session {} not found", msg.session_id)),
            },
            MessageType::Answer => match self.sessions.get(&msg.session_id) {
                Some(room) if room.participants.iter().any(|p| p == from) => {
                    let forward = SignalMessage { client_id: from.to_string(), ..msg.clone() };
                    vec![(room.creator.clone(), forward)]
                }
                Some(_) => reply_error("join the session before answering".to_string()),
                None => reply_error(format!("session {} not found", msg.session_id)),
            },
            MessageType::LeaveSession => {
                self.leave(from);
                Vec::new()
            }
            MessageType::Welcome | MessageType::Error => Vec::new(),
        }
    }

    /// Forget `client` everywhere. Sessions it created are closed.
    pub fn leave(&mut self, client: &str) {
        self.sessions.retain(|_, room| room.creator != client);
        for room in self.sessions.values_mut() {
            room.participants.retain(|p| p != client);
        }
    }
}

pub type SharedHub = Arc<RwLock<Hub>>;

pub fn app() -> Router {
    let hub: SharedHub = Arc::default();
    Router::new()
        .route("/ok", get(ok))
        .route("/echo", any(echo))
        .route("/status/{code}", any(status))
        .route("/hang", any(hang))
        .route("/auth", get(auth))
        .route("/signal", get(signal))
        .with_state(hub)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn ok() -> &'static str {
    "ok"
}

async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    // repeated headers are joined with ", "
    let mut joined: HashMap<String, String> = HashMap::new();
    for (name, value) in &headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        joined
            .entry(name.as_str().to_string())
            .and_modify(|v| {
                v.push_str(", ");
                v.push_str(&value);
            })
            .or_insert_with(|| value.to_string());
    }
    let headers = joined;
    let echo = EchoBody {
        method: method.to_string(),
        body: String::from_utf8_lossy(&body).into_owned(),
        headers,
    };
    ([("x-echo-method", method.to_string())], Json(echo))
}

async fn status(Path(code): Path<u16>) -> Response {
    match StatusCode::from_u16(code) {
        Ok(code) => (code, format!("status {}", code.as_u16())).into_response(),
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn hang() -> &'static str {
    std::future::pending::<&'static str>().await
}

async fn auth(headers: HeaderMap) -> Response {
    let expected = format!("Basic {}", STANDARD.encode(format!("{AUTH_USER}:{AUTH_PASSWORD}")));
    match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => "authorized".into_response(),
        _ => (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"netrt\"")],
        )
            .into_response(),
    }
}

async fn signal(ws: WebSocketUpgrade, State(hub): State<SharedHub>) -> Response {
    ws.on_upgrade(move |socket| peer_loop(socket, hub))
}

async fn peer_loop(socket: WebSocket, hub: SharedHub) {
    let client_id = Uuid::new_v4().to_string();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<SignalMessage>();

    let mut welcome = SignalMessage::new(MessageType::Welcome, "");
    welcome.client_id = client_id.clone();
    let _ = tx.send(welcome);
    hub.write().await.peers.insert(client_id.clone(), tx);
    debug!(%client_id, "peer connected");

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&msg) else { continue };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = stream.next().await {
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(msg) = serde_json::from_str::<SignalMessage>(text.as_str()) else {
            debug!(%client_id, "dropping malformed frame");
            continue;
        };
        let mut state = hub.write().await;
        for (to, out) in state.handle(&client_id, msg) {
            if let Some(peer) = state.peers.get(&to) {
                let _ = peer.send(out);
            }
        }
    }

    let mut state = hub.write().await;
    state.leave(&client_id);
    state.peers.remove(&client_id);
    drop(state);
    writer.abort();
    debug!(%client_id, "peer disconnected");
}
