//! Per-handle WebRTC session state machine.
//!
//! ```text
//! Created -> SignalingConnected -> SessionCreated -> Publishing -> Streaming -> Stopped
//!                               \-> SessionJoined  -> Subscribing ----------------^
//! ```
//!
//! A publisher may restart a stream from `Stopped`. Calls from the wrong
//! state fail with `SessionFailed` and leave the state untouched; a stream
//! start while already streaming fails with `StreamFailed`. A stream whose
//! source died reports `Stopped`.

use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{NetError, NetResult};
use crate::webrtc::media::{MediaSource, MediaTransport, StreamHandle};
use crate::webrtc::signaling::{MessageType, SignalMessage, SignalingChannel, SignalingConnector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SessionState {
    Created = 0,
    SignalingConnected = 1,
    SessionCreated = 2,
    SessionJoined = 3,
    Publishing = 4,
    Subscribing = 5,
    Streaming = 6,
    Stopped = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Publisher,
    Subscriber,
}

pub struct WebRtcSession {
    state: SessionState,
    role: Option<Role>,
    session_id: Option<String>,
    signaling: Option<Box<dyn SignalingChannel>>,
    stream: Option<StreamHandle>,
}

impl Default for WebRtcSession {
    fn default() -> Self {
        Self::new()
    }
}

impl WebRtcSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Created,
            role: None,
            session_id: None,
            signaling: None,
            stream: None,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.state == SessionState::Streaming && self.stream_failure().is_some() {
            return SessionState::Stopped;
        }
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn stream_failure(&self) -> Option<String> {
        self.stream.as_ref().and_then(|s| s.stats().failure())
    }

    /// Frames pumped by the current or last stream. `StreamFailed` once its
    /// source has died.
    pub fn frames_sent(&self) -> NetResult<u64> {
        let Some(stream) = &self.stream else {
            return Ok(0);
        };
        let stats = stream.stats();
        match stats.failure() {
            Some(reason) => Err(NetError::StreamFailed(reason)),
            None => Ok(stats.frames()),
        }
    }

    fn expect_state(&self, allowed: &[SessionState], op: &str) -> NetResult<()> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(NetError::session(format!("{op} not allowed in state {state:?}")))
        }
    }

    fn channel(&mut self) -> NetResult<&mut Box<dyn SignalingChannel>> {
        self.signaling
            .as_mut()
            .ok_or_else(|| NetError::session("no signaling connection"))
    }

    pub async fn connect(&mut self, connector: &dyn SignalingConnector, url: &str) -> NetResult<()> {
        let url = url.trim();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) || url.len() <= "wss://".len() {
            return Err(NetError::param(format!("invalid signaling url {url:?}")));
        }
        self.expect_state(&[SessionState::Created], "connect")?;
        let channel = connector.connect(url).await?;
        self.signaling = Some(channel);
        self.state = SessionState::SignalingConnected;
        Ok(())
    }

    pub async fn create_session(&mut self) -> NetResult<String> {
        self.expect_state(&[SessionState::SignalingConnected], "create_session")?;
        let reply = self
            .channel()?
            .request(SignalMessage::new(MessageType::CreateSession))
            .await?;
        if reply.session_id.is_empty() {
            return Err(NetError::session("signaling server returned no session id"));
        }
        info!(session_id = %reply.session_id, "session created");
        self.session_id = Some(reply.session_id.clone());
        self.role = Some(Role::Publisher);
        self.state = SessionState::SessionCreated;
        Ok(reply.session_id)
    }

    pub async fn join_session(&mut self, session_id: &str) -> NetResult<()> {
        if session_id.trim().is_empty() {
            return Err(NetError::param("session id must not be empty"));
        }
        self.expect_state(&[SessionState::SignalingConnected], "join_session")?;
        let reply = self
            .channel()?
            .request(SignalMessage::new(MessageType::JoinSession).with_session(session_id))
            .await?;
        info!(session_id, offered = reply.sdp.is_some(), "session joined");
        self.session_id = Some(session_id.to_string());
        self.role = Some(Role::Subscriber);
        self.state = SessionState::SessionJoined;
        Ok(())
    }

    /// Announce this publisher's offer for a session it created.
    pub async fn publish(&mut self, session_id: &str) -> NetResult<()> {
        self.expect_state(&[SessionState::SessionCreated], "publish")?;
        let own = self.session_id.clone().unwrap_or_default();
        if own != session_id {
            return Err(NetError::session(format!("session {session_id:?} is not owned by this handle")));
        }
        let channel = self.channel()?;
        let offer = describe(Role::Publisher, &own, channel.client_id());
        channel
            .send(SignalMessage::new(MessageType::Offer).with_session(&own).with_sdp(offer))
            .await?;
        self.state = SessionState::Publishing;
        Ok(())
    }

    /// Answer the publisher of a joined session.
    pub async fn subscribe(&mut self) -> NetResult<()> {
        self.expect_state(&[SessionState::SessionJoined], "subscribe")?;
        let own = self.session_id.clone().unwrap_or_default();
        let channel = self.channel()?;
        let answer = describe(Role::Subscriber, &own, channel.client_id());
        channel
            .send(SignalMessage::new(MessageType::Answer).with_session(&own).with_sdp(answer))
            .await?;
        self.state = SessionState::Subscribing;
        Ok(())
    }

    pub async fn start_stream(&mut self, media: &dyn MediaTransport, source: MediaSource) -> NetResult<()> {
        if self.state() == SessionState::Streaming {
            return Err(NetError::stream("already streaming; stop the current stream first"));
        }
        self.expect_state(&[SessionState::Publishing, SessionState::Stopped], "start_stream")?;
        if self.role != Some(Role::Publisher) {
            return Err(NetError::session("only a publisher can stream"));
        }
        let handle = media.start(&source).await?;
        debug!(?source, "streaming");
        if let Some(mut previous) = self.stream.replace(handle) {
            previous.stop().await;
        }
        self.state = SessionState::Streaming;
        Ok(())
    }

    pub async fn stop_stream(&mut self) -> NetResult<()> {
        if self.state == SessionState::Stopped {
            return Ok(());
        }
        self.expect_state(
            &[
                SessionState::Publishing,
                SessionState::Subscribing,
                SessionState::Streaming,
                SessionState::Stopped,
            ],
            "stop_stream",
        )?;
        if let Some(stream) = self.stream.as_mut() {
            stream.stop().await;
        }
        self.state = SessionState::Stopped;
        Ok(())
    }

    /// Subscriber count to wait on without holding the session.
    pub fn subscriber_watch(&self) -> NetResult<watch::Receiver<usize>> {
        self.expect_state(&[SessionState::Publishing, SessionState::Streaming], "wait_for_subscriber")?;
        self.signaling
            .as_ref()
            .map(|c| c.subscribers())
            .ok_or_else(|| NetError::session("no signaling connection"))
    }
}

/// Minimal session description advertising one video media section.
pub fn describe(role: Role, session_id: &str, client_id: &str) -> String {
    let direction = match role {
        Role::Publisher => "sendonly",
        Role::Subscriber => "recvonly",
    };
    let origin = uuid::Uuid::new_v4().as_u128() as u64 & 0x7FFF_FFFF_FFFF_FFFF;
    format!(
        "v=0\r\n\
         o=- {origin} 2 IN IP4 127.0.0.1\r\n\
         s={session_id}\r\n\
         t=0 0\r\n\
         a=group:BUNDLE 0\r\n\
         a=msid-semantic: WMS {client_id}\r\n\
         m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
         c=IN IP4 0.0.0.0\r\n\
         a=mid:0\r\n\
         a={direction}\r\n\
         a=rtpmap:96 VP8/90000\r\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_is_sendonly_answer_is_recvonly() {
        let offer = describe(Role::Publisher, "s1", "c1");
        assert!(offer.starts_with("v=0\r\n"));
        assert!(offer.contains("a=sendonly"));
        assert!(offer.contains("s=s1"));
        assert!(describe(Role::Subscriber, "s1", "c2").contains("a=recvonly"));
    }

    #[test]
    fn fresh_session_rejects_out_of_order_calls() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let mut s = WebRtcSession::new();
        rt.block_on(async {
            assert!(matches!(s.create_session().await, Err(NetError::SessionFailed(_))));
            assert!(matches!(s.publish("x").await, Err(NetError::SessionFailed(_))));
            assert!(matches!(s.subscribe().await, Err(NetError::SessionFailed(_))));
            assert!(matches!(s.stop_stream().await, Err(NetError::SessionFailed(_))));
            assert!(matches!(s.join_session("").await, Err(NetError::InvalidParam(_))));
        });
        assert!(s.subscriber_watch().is_err());
        assert_eq!(s.state(), SessionState::Created);
    }
}
