//! Signaling channel to the rendezvous server.
//!
//! # Protocol
//! JSON text frames over WebSocket, one `SignalMessage` per frame:
//!
//! - server → client `welcome` on connect, carrying the assigned `client_id`
//! - `create_session` → reply `create_session` with a fresh `session_id`
//! - `join_session` → reply `join_session` (with the publisher's offer when
//!   one has been sent) or `error`
//! - `offer` is stored by the server and forwarded to participants
//! - `answer` is forwarded to the session creator, which counts it as a
//!   subscriber
//!
//! The reader task routes replies to the pending request and keeps the
//! subscriber count in a `watch` channel, so waiting for a subscriber never
//! needs the session lock.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::{NetError, NetResult};

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
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            client_id: String::new(),
            session_id: String::new(),
            sdp: None,
            error: None,
        }
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = session_id.to_string();
        self
    }

    pub fn with_sdp(mut self, sdp: String) -> Self {
        self.sdp = Some(sdp);
        self
    }

    fn is_reply(&self) -> bool {
        matches!(
            self.message_type,
            MessageType::CreateSession | MessageType::JoinSession | MessageType::Error
        )
    }
}

#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn connect(&self, url: &str) -> NetResult<Box<dyn SignalingChannel>>;
}

/// An established connection to the signaling server.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    fn client_id(&self) -> &str;

    /// Fire-and-forget message.
    async fn send(&mut self, message: SignalMessage) -> NetResult<()>;

    /// Send and wait for the server's reply. An `error` reply becomes
    /// `SessionFailed`.
    async fn request(&mut self, message: SignalMessage) -> NetResult<SignalMessage>;

    /// Number of subscribers that answered this client's offer.
    fn subscribers(&self) -> watch::Receiver<usize>;
}

#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl SignalingConnector for WsConnector {
    async fn connect(&self, url: &str) -> NetResult<Box<dyn SignalingChannel>> {
        let channel = WsChannel::connect(url).await?;
        Ok(Box::new(channel))
    }
}

pub struct WsChannel {
    client_id: String,
    outgoing: mpsc::UnboundedSender<Message>,
    replies: mpsc::UnboundedReceiver<SignalMessage>,
    subscribers: watch::Receiver<usize>,
    tasks: Vec<JoinHandle<()>>,
}

impl WsChannel {
    pub async fn connect(url: &str) -> NetResult<Self> {
        info!(url, "connecting to signaling server");
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| NetError::connection(format!("signaling connect to {url}: {e}")))?;
        let (mut write, mut read) = ws.split();

        let client_id = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    let msg = decode(&text)?;
                    if msg.message_type == MessageType::Welcome {
                        break msg.client_id;
                    }
                    debug!(message_type = ?msg.message_type, "ignoring message before welcome");
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(NetError::connection(format!("signaling handshake: {e}"))),
                None => return Err(NetError::connection("signaling server closed before welcome")),
            }
        };
        info!(client_id, "signaling connected");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let (sub_tx, sub_rx) = watch::channel(0usize);

        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = write.send(msg).await {
                    warn!("signaling send failed: {e}");
                    break;
                }
            }
            let _ = write.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("signaling receive failed: {e}");
                        break;
                    }
                };
                let msg = match decode(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("{e}");
                        continue;
                    }
                };
                match msg.message_type {
                    MessageType::Answer => {
                        sub_tx.send_modify(|n| *n += 1);
                        debug!(from = %msg.client_id, "subscriber answered");
                    }
                    _ if msg.is_reply() => {
                        if reply_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    other => debug!(?other, "unhandled signaling message"),
                }
            }
            debug!("signaling reader terminated");
        });

        Ok(Self {
            client_id,
            outgoing: out_tx,
            replies: reply_rx,
            subscribers: sub_rx,
            tasks: vec![writer, reader],
        })
    }

    fn push(&self, mut message: SignalMessage) -> NetResult<()> {
        message.client_id = self.client_id.clone();
        let text = serde_json::to_string(&message)
            .map_err(|e| NetError::session(format!("encode signaling message: {e}")))?;
        self.outgoing
            .send(Message::Text(text))
            .map_err(|_| NetError::connection("signaling connection closed"))
    }
}

#[async_trait]
impl SignalingChannel for WsChannel {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn send(&mut self, message: SignalMessage) -> NetResult<()> {
        self.push(message)
    }

    async fn request(&mut self, message: SignalMessage) -> NetResult<SignalMessage> {
        // drop replies left over from a request that timed out
        while self.replies.try_recv().is_ok() {}
        let expected = message.message_type;
        let session_id = message.session_id.clone();
        self.push(message)?;
        loop {
            let reply = self
                .replies
                .recv()
                .await
                .ok_or_else(|| NetError::connection("signaling connection closed"))?;
            if !answers(expected, &session_id, &reply) {
                debug!(message_type = ?reply.message_type, session_id = %reply.session_id, "skipping unrelated reply");
                continue;
            }
            if reply.message_type == MessageType::Error {
                let reason = reply.error.unwrap_or_else(|| "rejected by signaling server".to_string());
                return Err(NetError::SessionFailed(reason));
            }
            return Ok(reply);
        }
    }

    fn subscribers(&self) -> watch::Receiver<usize> {
        self.subscribers.clone()
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        let _ = self.outgoing.send(Message::Close(None));
        if let Some(reader) = self.tasks.pop() {
            reader.abort();
        }
    }
}

/// Whether `reply` answers a request of type `expected` for `session_id`.
/// Errors raised by earlier fire-and-forget messages name another session
/// or arrive for a request that carries none.
fn answers(expected: MessageType, session_id: &str, reply: &SignalMessage) -> bool {
    match reply.message_type {
        MessageType::Error => reply.session_id == session_id,
        other => other == expected,
    }
}

fn decode(text: &str) -> NetResult<SignalMessage> {
    serde_json::from_str(text).map_err(|e| NetError::session(format!("malformed signaling message: {e}")))
}
