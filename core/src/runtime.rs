//! The networking runtime context.
//!
//! # Design
//! `NetRuntime` owns everything that was process-global in a C-style API:
//! the handle table, the shutdown coordinator, the async executor and the
//! network seams (`Transport`, `SignalingConnector`, `MediaTransport`).
//! Public methods are synchronous and drive async work with `block_on`, so
//! they must be called from threads that are not already inside the
//! executor.
//!
//! Every handle operation follows the same sequence:
//!
//! 1. resolve the handle into a `Lease` (`InvalidHandle`)
//! 2. register with the shutdown coordinator (`ShuttingDown`)
//! 3. run the async body, racing it against forced shutdown (`Aborted`)
//!    and destruction of the handle (`InvalidHandle`)
//!
//! The lease and registration are dropped on every exit path.

use std::future::Future;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{HttpSession, Protocol};
use crate::config::RuntimeConfig;
use crate::error::{NetError, NetResult};
use crate::handle::{Handle, HandleKind, HandleTable};
use crate::http::{HttpMethod, Response};
use crate::lifecycle::{HookRegistry, LifecyclePhase, RuntimeHandler};
use crate::shutdown::{ShutdownCoordinator, ShutdownPhase};
use crate::transport::{with_deadline, Transport, UreqTransport};
use crate::webrtc::{
    LocalMediaTransport, MediaSource, MediaTransport, SessionState, SignalingConnector,
    WebRtcSession, WsConnector,
};

pub enum Endpoint {
    Http(Mutex<HttpSession>),
    WebRtc(Mutex<WebRtcSession>),
}

/// Table entry behind a handle.
pub struct Session {
    endpoint: Endpoint,
    closed: CancellationToken,
}

impl Session {
    fn new(endpoint: Endpoint) -> Self {
        Self { endpoint, closed: CancellationToken::new() }
    }

    fn http(&self) -> NetResult<&Mutex<HttpSession>> {
        match &self.endpoint {
            Endpoint::Http(s) => Ok(s),
            Endpoint::WebRtc(_) => Err(NetError::InvalidHandle),
        }
    }

    fn webrtc(&self) -> NetResult<&Mutex<WebRtcSession>> {
        match &self.endpoint {
            Endpoint::WebRtc(s) => Ok(s),
            Endpoint::Http(_) => Err(NetError::InvalidHandle),
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

pub struct NetRuntimeBuilder {
    config: RuntimeConfig,
    transport: Option<Arc<dyn Transport>>,
    signaling: Option<Arc<dyn SignalingConnector>>,
    media: Option<Arc<dyn MediaTransport>>,
}

impl NetRuntimeBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn signaling(mut self, signaling: Arc<dyn SignalingConnector>) -> Self {
        self.signaling = Some(signaling);
        self
    }

    pub fn media(mut self, media: Arc<dyn MediaTransport>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn build(self) -> std::io::Result<NetRuntime> {
        let config = self.config;
        let executor = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name("netrt-worker")
            .enable_all()
            .build()?;
        let media = self.media.unwrap_or_else(|| {
            Arc::new(LocalMediaTransport::new(config.frame_interval(), config.frame_chunk_bytes))
        });
        info!(?config, "network runtime started");
        Ok(NetRuntime {
            executor: ManuallyDrop::new(executor),
            handles: HandleTable::new(config.max_handles),
            shutdown: ShutdownCoordinator::new(),
            transport: self.transport.unwrap_or_else(|| Arc::new(UreqTransport)),
            signaling: self.signaling.unwrap_or_else(|| Arc::new(WsConnector)),
            media,
            hooks: HookRegistry::default(),
            config,
        })
    }
}

pub struct NetRuntime {
    /// Taken only in `Drop`, to bound executor teardown.
    executor: ManuallyDrop<tokio::runtime::Runtime>,
    handles: HandleTable<Session>,
    shutdown: ShutdownCoordinator,
    config: RuntimeConfig,
    transport: Arc<dyn Transport>,
    signaling: Arc<dyn SignalingConnector>,
    media: Arc<dyn MediaTransport>,
    hooks: HookRegistry,
}

impl NetRuntime {
    pub fn builder() -> NetRuntimeBuilder {
        NetRuntimeBuilder {
            config: RuntimeConfig::default(),
            transport: None,
            signaling: None,
            media: None,
        }
    }

    pub fn new(config: RuntimeConfig) -> std::io::Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Check that `handle` is live and of `kind` without starting an
    /// operation.
    pub fn validate(&self, handle: Handle, kind: HandleKind) -> NetResult<()> {
        self.handles.acquire(handle, kind).map(|_| ())
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.executor.block_on(fut)
    }

    fn execute<T, F>(
        &self,
        handle: Handle,
        kind: HandleKind,
        op: impl FnOnce(Arc<Session>) -> F,
    ) -> NetResult<T>
    where
        F: Future<Output = NetResult<T>>,
    {
        let lease = self.handles.acquire(handle, kind)?;
        let registration = self.shutdown.register()?;
        let session = Arc::clone(lease.value());
        let closed = session.closed.clone();
        let body = op(session);
        let result = self.block_on(async move {
            tokio::select! {
                biased;
                _ = registration.aborted() => Err(NetError::Aborted),
                _ = closed.cancelled() => Err(NetError::InvalidHandle),
                result = body => result,
            }
        });
        drop(lease);
        if let Err(e) = &result {
            debug!(handle, error = %e, "operation failed");
        }
        result
    }

    // -----------------------------------------------------------------------
    // HTTP clients
    // -----------------------------------------------------------------------

    pub fn client_create(&self, protocol: Protocol) -> NetResult<Handle> {
        let _registration = self.shutdown.register()?;
        let handle = self
            .handles
            .insert(HandleKind::HttpClient, Session::new(Endpoint::Http(Mutex::new(HttpSession::new(protocol)))))?;
        debug!(handle, ?protocol, "http client created");
        Ok(handle)
    }

    pub fn client_destroy(&self, handle: Handle) -> NetResult<()> {
        let session = self.handles.remove(handle, HandleKind::HttpClient)?;
        session.close();
        debug!(handle, "http client destroyed");
        Ok(())
    }

    fn configure_http(
        &self,
        handle: Handle,
        apply: impl FnOnce(&mut HttpSession) -> NetResult<()>,
    ) -> NetResult<()> {
        self.execute(handle, HandleKind::HttpClient, |session| async move {
            let mut http = session.http()?.lock().await;
            apply(&mut http)
        })
    }

    pub fn client_set_url(&self, handle: Handle, url: &str) -> NetResult<()> {
        self.configure_http(handle, |s| s.set_url(url))
    }

    pub fn client_set_method(&self, handle: Handle, method: &str) -> NetResult<()> {
        self.configure_http(handle, |s| s.set_method(method))
    }

    pub fn client_set_user(&self, handle: Handle, user: &str) -> NetResult<()> {
        self.configure_http(handle, |s| s.set_user(user))
    }

    pub fn client_set_password(&self, handle: Handle, password: &str) -> NetResult<()> {
        self.configure_http(handle, |s| s.set_password(password))
    }

    pub fn client_set_body(&self, handle: Handle, body: &[u8]) -> NetResult<()> {
        self.configure_http(handle, |s| s.set_body(body))
    }

    pub fn client_set_header(&self, handle: Handle, name: &str, value: &str) -> NetResult<()> {
        self.configure_http(handle, |s| s.set_header(name, value))
    }

    pub fn client_set_timeout(&self, handle: Handle, seconds: i64) -> NetResult<()> {
        self.configure_http(handle, |s| s.set_timeout(seconds))
    }

    /// Execute the configured request. `method` overrides the configured
    /// method for this call only. Failures are also stored as the handle's
    /// last response.
    pub fn client_request(&self, handle: Handle, method: Option<HttpMethod>) -> NetResult<Arc<Response>> {
        let transport = Arc::clone(&self.transport);
        let default_timeout = self.config.default_timeout();
        self.execute(handle, HandleKind::HttpClient, |session| async move {
            let mut http = session.http()?.lock().await;
            let outcome = match http.build_request(method, default_timeout) {
                Ok(request) => with_deadline(request.timeout, transport.execute(request)).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(response) => Ok(http.store_response(response)),
                Err(e) => {
                    http.store_response(Response::failed(&e));
                    Err(e)
                }
            }
        })
    }

    pub fn client_response(&self, handle: Handle) -> NetResult<Arc<Response>> {
        self.execute(handle, HandleKind::HttpClient, |session| async move {
            let response = session.http()?.lock().await.last_response();
            Ok(response)
        })
    }

    /// Point the client at `url` and verify the host accepts TCP connections.
    pub fn client_connect(&self, handle: Handle, url: &str) -> NetResult<String> {
        let transport = Arc::clone(&self.transport);
        let default_timeout = self.config.default_timeout();
        self.execute(handle, HandleKind::HttpClient, |session| async move {
            let mut http = session.http()?.lock().await;
            let mut candidate = http.clone();
            candidate.set_url(url)?;
            let authority = candidate.authority()?;
            let limit = candidate.effective_timeout(default_timeout);
            let peer = with_deadline(limit, transport.reach(&authority)).await?;
            http.set_url(url)?;
            http.set_connected_addr(peer.clone());
            Ok(peer)
        })
    }

    /// Peer address reached by the last successful `client_connect`.
    pub fn client_connected_addr(&self, handle: Handle) -> NetResult<Option<String>> {
        self.execute(handle, HandleKind::HttpClient, |session| async move {
            let addr = session.http()?.lock().await.connected_addr().map(str::to_string);
            Ok(addr)
        })
    }

    // -----------------------------------------------------------------------
    // WebRTC sessions
    // -----------------------------------------------------------------------

    pub fn webrtc_create(&self) -> NetResult<Handle> {
        let _registration = self.shutdown.register()?;
        let handle = self.handles.insert(
            HandleKind::WebRtcSession,
            Session::new(Endpoint::WebRtc(Mutex::new(WebRtcSession::new()))),
        )?;
        debug!(handle, "webrtc session created");
        Ok(handle)
    }

    /// Retire the handle. In-flight operations on it are cancelled; the
    /// signaling connection and stream close once they unwind.
    pub fn webrtc_destroy(&self, handle: Handle) -> NetResult<()> {
        let session = self.handles.remove(handle, HandleKind::WebRtcSession)?;
        session.close();
        debug!(handle, "webrtc session destroyed");
        Ok(())
    }

    pub fn webrtc_connect(&self, handle: Handle, url: &str) -> NetResult<()> {
        let connector = Arc::clone(&self.signaling);
        let limit = self.config.signaling_timeout();
        self.execute(handle, HandleKind::WebRtcSession, |session| async move {
            let mut rtc = session.webrtc()?.lock().await;
            let result = with_deadline(limit, rtc.connect(connector.as_ref(), url)).await;
            result
        })
    }

    pub fn webrtc_create_session(&self, handle: Handle) -> NetResult<String> {
        let limit = self.config.signaling_timeout();
        self.execute(handle, HandleKind::WebRtcSession, |session| async move {
            let mut rtc = session.webrtc()?.lock().await;
            let result = with_deadline(limit, rtc.create_session()).await;
            result
        })
    }

    pub fn webrtc_join_session(&self, handle: Handle, session_id: &str) -> NetResult<()> {
        let limit = self.config.signaling_timeout();
        self.execute(handle, HandleKind::WebRtcSession, |session| async move {
            let mut rtc = session.webrtc()?.lock().await;
            let result = with_deadline(limit, rtc.join_session(session_id)).await;
            result
        })
    }

    pub fn webrtc_publish_session(&self, handle: Handle, session_id: &str) -> NetResult<()> {
        let limit = self.config.signaling_timeout();
        self.execute(handle, HandleKind::WebRtcSession, |session| async move {
            let mut rtc = session.webrtc()?.lock().await;
            let result = with_deadline(limit, rtc.publish(session_id)).await;
            result
        })
    }

    pub fn webrtc_subscribe_session(&self, handle: Handle) -> NetResult<()> {
        let limit = self.config.signaling_timeout();
        self.execute(handle, HandleKind::WebRtcSession, |session| async move {
            let mut rtc = session.webrtc()?.lock().await;
            let result = with_deadline(limit, rtc.subscribe()).await;
            result
        })
    }

    pub fn webrtc_start_stream(&self, handle: Handle, source: MediaSource) -> NetResult<()> {
        let media = Arc::clone(&self.media);
        self.execute(handle, HandleKind::WebRtcSession, |session| async move {
            let mut rtc = session.webrtc()?.lock().await;
            let result = rtc.start_stream(media.as_ref(), source).await;
            result
        })
    }

    pub fn webrtc_stop_stream(&self, handle: Handle) -> NetResult<()> {
        self.execute(handle, HandleKind::WebRtcSession, |session| async move {
            let mut rtc = session.webrtc()?.lock().await;
            let result = rtc.stop_stream().await;
            result
        })
    }

    /// Block the calling operation until a subscriber answers or `timeout`
    /// elapses. The session stays usable by other callers meanwhile.
    pub fn webrtc_wait_for_subscriber(&self, handle: Handle, timeout_secs: i64) -> NetResult<()> {
        self.execute(handle, HandleKind::WebRtcSession, |session| async move {
            if timeout_secs < 0 {
                return Err(NetError::param("timeout must not be negative"));
            }
            let mut subscribers = session.webrtc()?.lock().await.subscriber_watch()?;
            with_deadline(Duration::from_secs(timeout_secs as u64), async move {
                subscribers
                    .wait_for(|count| *count >= 1)
                    .await
                    .map(|_| ())
                    .map_err(|_| NetError::connection("signaling connection closed"))
            })
            .await
        })
    }

    pub fn webrtc_session_id(&self, handle: Handle) -> NetResult<String> {
        self.execute(handle, HandleKind::WebRtcSession, |session| async move {
            let id = session.webrtc()?.lock().await.session_id().map(str::to_string);
            id.ok_or_else(|| NetError::session("no session has been created or joined"))
        })
    }

    pub fn webrtc_frames_sent(&self, handle: Handle) -> NetResult<u64> {
        self.execute(handle, HandleKind::WebRtcSession, |session| async move {
            let frames = session.webrtc()?.lock().await.frames_sent();
            frames
        })
    }

    pub fn webrtc_state(&self, handle: Handle) -> NetResult<SessionState> {
        self.execute(handle, HandleKind::WebRtcSession, |session| async move {
            let state = session.webrtc()?.lock().await.state();
            Ok(state)
        })
    }

    /// create, connect, create session, publish, start webcam. On failure
    /// the half-built handle is destroyed.
    pub fn webrtc_setup_publisher(&self, url: &str, camera_index: u32) -> NetResult<(Handle, String)> {
        let handle = self.webrtc_create()?;
        let steps = || -> NetResult<String> {
            self.webrtc_connect(handle, url)?;
            let session_id = self.webrtc_create_session(handle)?;
            self.webrtc_publish_session(handle, &session_id)?;
            self.webrtc_start_stream(handle, MediaSource::Webcam(camera_index))?;
            Ok(session_id)
        };
        match steps() {
            Ok(session_id) => Ok((handle, session_id)),
            Err(e) => {
                warn!(error = %e, "publisher setup failed");
                let _ = self.webrtc_destroy(handle);
                Err(e)
            }
        }
    }

    /// create, connect, join, subscribe. On failure the half-built handle is
    /// destroyed.
    pub fn webrtc_setup_subscriber(&self, url: &str, session_id: &str) -> NetResult<Handle> {
        let handle = self.webrtc_create()?;
        let steps = || -> NetResult<()> {
            self.webrtc_connect(handle, url)?;
            self.webrtc_join_session(handle, session_id)?;
            self.webrtc_subscribe_session(handle)
        };
        match steps() {
            Ok(()) => Ok(handle),
            Err(e) => {
                warn!(error = %e, "subscriber setup failed");
                let _ = self.webrtc_destroy(handle);
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    pub fn phase(&self) -> ShutdownPhase {
        self.shutdown.phase()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_shutdown_requested()
    }

    pub fn active_operations(&self) -> usize {
        self.shutdown.active_operations()
    }

    pub fn live_handles(&self) -> usize {
        self.handles.live_count()
    }

    fn invalidate_handles(&self) {
        let retired = self.handles.invalidate_all();
        if !retired.is_empty() {
            info!(count = retired.len(), "handles invalidated");
        }
        for session in retired {
            session.close();
        }
    }

    /// Reject new operations, wait for in-flight ones, then invalidate every
    /// handle. With a `limit`, whatever is still running at the deadline is
    /// aborted. Returns whether the drain finished in time.
    pub fn cleanup(&self, limit: Option<Duration>) -> bool {
        self.shutdown.request_shutdown();
        info!(active = self.active_operations(), ?limit, "graceful shutdown requested");
        let drained = self.block_on(self.shutdown.wait_drained(limit));
        if !drained {
            warn!(active = self.active_operations(), "shutdown deadline elapsed; aborting");
            self.shutdown.abort();
            self.invalidate_handles();
            self.block_on(self.shutdown.wait_drained(Some(self.config.shutdown_grace())));
        }
        self.invalidate_handles();
        self.shutdown.mark_terminated();
        info!("network runtime terminated");
        drained
    }

    /// Invalidate every handle and abort in-flight operations immediately.
    pub fn force_shutdown(&self) {
        warn!(active = self.active_operations(), "forced shutdown");
        self.shutdown.abort();
        self.invalidate_handles();
        if !self.block_on(self.shutdown.wait_drained(Some(self.config.shutdown_grace()))) {
            warn!(active = self.active_operations(), "operations still unwinding after grace period");
        }
        self.shutdown.mark_terminated();
    }

    // -----------------------------------------------------------------------
    // Lifecycle hooks
    // -----------------------------------------------------------------------

    pub fn register_handler(&self, handler: Arc<dyn RuntimeHandler>) {
        self.hooks.register(handler);
    }

    pub fn dispatch_lifecycle(&self, phase: LifecyclePhase) {
        self.hooks.dispatch(phase);
    }
}

impl Drop for NetRuntime {
    fn drop(&mut self) {
        self.shutdown.abort();
        self.invalidate_handles();
        // SAFETY: `executor` is never touched again after this point.
        let executor = unsafe { ManuallyDrop::take(&mut self.executor) };
        executor.shutdown_timeout(self.config.shutdown_grace());
    }
}
