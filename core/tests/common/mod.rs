//! Stubs and helpers shared by the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use netrt_core::webrtc::{
    MediaSource, MediaTransport, MessageType, SignalMessage, SignalingChannel, SignalingConnector,
    StreamHandle,
};
use netrt_core::{HttpRequest, NetError, NetResult, NetRuntime, Response, RuntimeConfig, Transport};
use tokio::sync::watch;

/// Start the mock server on a random port in a background thread.
pub fn spawn_mock_server() -> SocketAddr {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });
    addr
}

pub fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        worker_threads: 2,
        signaling_timeout_secs: 5,
        shutdown_grace_ms: 500,
        frame_interval_ms: 5,
        frame_chunk_bytes: 16,
        ..RuntimeConfig::default()
    }
}

/// Poll `cond` until it holds or `limit` elapses.
pub fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Answers every request with `200 ok`.
pub struct EchoTransport;

#[async_trait]
impl Transport for EchoTransport {
    async fn execute(&self, _request: HttpRequest) -> NetResult<Response> {
        Ok(Response {
            status_code: 200,
            body: b"ok".to_vec(),
            headers: vec![("content-type".into(), "text/plain".into())],
            error: None,
        })
    }
}

/// Never answers.
pub struct HangingTransport;

#[async_trait]
impl Transport for HangingTransport {
    async fn execute(&self, _request: HttpRequest) -> NetResult<Response> {
        std::future::pending().await
    }
}

/// Answers `200 ok` after a fixed delay.
pub struct SlowTransport(pub Duration);

#[async_trait]
impl Transport for SlowTransport {
    async fn execute(&self, request: HttpRequest) -> NetResult<Response> {
        tokio::time::sleep(self.0).await;
        EchoTransport.execute(request).await
    }
}

/// In-memory signaling: one fixed session id, `missing` is an unknown
/// session, and the subscriber count is driven by the test.
#[derive(Clone)]
pub struct StubSignaling {
    pub subscribers: Arc<watch::Sender<usize>>,
}

impl Default for StubSignaling {
    fn default() -> Self {
        Self { subscribers: Arc::new(watch::channel(0).0) }
    }
}

pub const STUB_SESSION_ID: &str = "stub-session";

struct StubChannel {
    subscribers: Arc<watch::Sender<usize>>,
}

#[async_trait]
impl SignalingConnector for StubSignaling {
    async fn connect(&self, url: &str) -> NetResult<Box<dyn SignalingChannel>> {
        if url.contains("unreachable") {
            return Err(NetError::ConnectionFailed(format!("{url}: refused")));
        }
        Ok(Box::new(StubChannel { subscribers: Arc::clone(&self.subscribers) }))
    }
}

#[async_trait]
impl SignalingChannel for StubChannel {
    fn client_id(&self) -> &str {
        "stub-client"
    }

    async fn send(&mut self, _message: SignalMessage) -> NetResult<()> {
        Ok(())
    }

    async fn request(&mut self, message: SignalMessage) -> NetResult<SignalMessage> {
        match message.message_type {
            MessageType::CreateSession => {
                Ok(SignalMessage::new(MessageType::CreateSession).with_session(STUB_SESSION_ID))
            }
            MessageType::JoinSession if message.session_id == "missing" => {
                Err(NetError::SessionFailed("session missing not found".into()))
            }
            MessageType::JoinSession => Ok(SignalMessage::new(MessageType::JoinSession)
                .with_session(&message.session_id)
                .with_sdp("v=0".to_string())),
            other => Err(NetError::SessionFailed(format!("unexpected request {other:?}"))),
        }
    }

    fn subscribers(&self) -> watch::Receiver<usize> {
        self.subscribers.subscribe()
    }
}

/// Accepts files, rejects cameras. `dead.bin` starts a stream whose source
/// has already died.
pub struct StubMedia;

#[async_trait]
impl MediaTransport for StubMedia {
    async fn start(&self, source: &MediaSource) -> NetResult<StreamHandle> {
        match source {
            MediaSource::File(path) if path.ends_with("dead.bin") => {
                let handle = StreamHandle::detached();
                handle.stats().record();
                handle.stats().fail("source went away".to_string());
                Ok(handle)
            }
            MediaSource::File(_) => Ok(StreamHandle::detached()),
            MediaSource::Webcam(index) => Err(NetError::StreamFailed(format!("camera {index} unavailable"))),
        }
    }
}

/// Accepts every source.
pub struct AnyMedia;

#[async_trait]
impl MediaTransport for AnyMedia {
    async fn start(&self, _source: &MediaSource) -> NetResult<StreamHandle> {
        Ok(StreamHandle::detached())
    }
}

pub fn stub_runtime(transport: Arc<dyn Transport>) -> NetRuntime {
    NetRuntime::builder()
        .config(test_config())
        .transport(transport)
        .signaling(Arc::new(StubSignaling::default()))
        .media(Arc::new(StubMedia))
        .build()
        .unwrap()
}
