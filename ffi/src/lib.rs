//! C-ABI wrapper around `netrt-core`.
//!
//! # Overview
//! Exposes the networking runtime through flat `extern "C"` functions:
//! process lifecycle (`net_*`), HTTP clients (`client_*`) and WebRTC
//! sessions (`webrtc_*`). Every resource is an opaque `uint64_t` handle;
//! `0` is never valid.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - One process-wide slot holds the `NetRuntime` between `net_init` and
//!   the end of `net_cleanup*` / `net_force_shutdown`. Calls outside that
//!   window fail with `NET_INVALID_HANDLE` (or return handle `0`).
//! - Functions return `c_int` status codes. Length-returning copy functions
//!   return `int64_t`: the full length on success, a negative code on error.
//! - String results are copied into caller buffers with `snprintf`
//!   semantics. `CNetResponse` pointers are owned by the library and stay
//!   valid until the next request on the same handle, its destruction, or
//!   shutdown.

pub mod types;

use std::collections::BTreeMap;
use std::ffi::{c_void, CStr};
use std::os::raw::{c_char, c_int};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::time::Duration;

use netrt_core::{
    ErrorCode, HandleKind, HttpMethod, LifecyclePhase, MediaSource, NetError, NetResult, NetRuntime,
    Protocol, Response, RuntimeConfig,
};
use parking_lot::{const_mutex, const_rwlock, Mutex, RwLock};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use types::*;

enum Slot {
    Uninit,
    Running(Arc<NetRuntime>),
    Terminated,
}

static RUNTIME: RwLock<Slot> = const_rwlock(Slot::Uninit);

/// Views handed out by `client_get_response` and friends, per handle.
static RESPONSES: Mutex<BTreeMap<NetHandle, ResponseView>> = const_mutex(BTreeMap::new());

static TRACING: Once = Once::new();

fn install_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_env("NETRT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
        // the host may already own the global subscriber
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

fn runtime() -> Option<Arc<NetRuntime>> {
    match &*RUNTIME.read() {
        Slot::Running(rt) => Some(Arc::clone(rt)),
        Slot::Uninit | Slot::Terminated => None,
    }
}

fn guarded<T>(fallback: T, body: impl FnOnce() -> T) -> T {
    catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|_| {
        error!("panic caught at the C boundary");
        fallback
    })
}

fn status(result: NetResult<()>) -> c_int {
    match result {
        Ok(()) => NET_SUCCESS,
        Err(e) => code_of(&e),
    }
}

fn length(result: NetResult<usize>) -> i64 {
    match result {
        Ok(len) => i64::try_from(len).unwrap_or(i64::MAX),
        Err(e) => i64::from(code_of(&e)),
    }
}

/// Validate `handle` against the running runtime, then run `op`.
fn with_handle<T>(
    handle: NetHandle,
    kind: HandleKind,
    op: impl FnOnce(&NetRuntime) -> NetResult<T>,
) -> NetResult<T> {
    let rt = runtime().ok_or(NetError::InvalidHandle)?;
    rt.validate(handle, kind)?;
    op(&rt)
}

fn invalid_param(what: &str) -> NetError {
    NetError::InvalidParam(what.to_string())
}

/// Borrow a NUL-terminated UTF-8 argument.
fn text<'a>(ptr: *const c_char, name: &str) -> NetResult<&'a str> {
    if ptr.is_null() {
        return Err(invalid_param(&format!("{name} must not be null")));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| invalid_param(&format!("{name} is not valid UTF-8")))
}

fn check_buffer(buf: *mut c_char, capacity: usize) -> NetResult<()> {
    if capacity > 0 && buf.is_null() {
        return Err(invalid_param("buffer must not be null when capacity is non-zero"));
    }
    Ok(())
}

/// Copy `src` into `buf` with `snprintf` semantics: at most `capacity - 1`
/// bytes plus a NUL terminator. Returns the full length of `src`, so a
/// result `>= capacity` means the copy was truncated.
fn copy_out(src: &[u8], buf: *mut c_char, capacity: usize) -> NetResult<usize> {
    check_buffer(buf, capacity)?;
    if capacity == 0 {
        return Ok(src.len());
    }
    let n = src.len().min(capacity - 1);
    unsafe {
        std::ptr::copy_nonoverlapping(src.as_ptr(), buf.cast::<u8>(), n);
        *buf.add(n) = 0;
    }
    Ok(src.len())
}

// ---------------------------------------------------------------------------
// Process lifecycle
// ---------------------------------------------------------------------------

fn init_with(config: RuntimeConfig) -> c_int {
    install_tracing();
    let mut slot = RUNTIME.write();
    if let Slot::Running(rt) = &*slot {
        if !rt.is_shutdown_requested() {
            return NET_SUCCESS;
        }
        // the runtime in the slot is still draining; it retires itself once
        // done and leaves a successor in place
        info!("replacing a runtime that is shutting down");
    }
    match NetRuntime::new(config) {
        Ok(rt) => {
            *slot = Slot::Running(Arc::new(rt));
            info!("netrt initialized");
            NET_SUCCESS
        }
        Err(e) => {
            error!(error = %e, "failed to start the async executor");
            NET_SESSION_FAILED
        }
    }
}

/// Start the runtime with defaults overridden by `NETRT_*` environment
/// variables. Returns `NET_SUCCESS` if it is already running. After a
/// shutdown, including one still in progress on another thread, a fresh
/// runtime is created; handles from the old one stay invalid.
#[unsafe(no_mangle)]
pub extern "C" fn net_init() -> c_int {
    guarded(NET_SESSION_FAILED, || match RuntimeConfig::from_env() {
        Ok(config) => init_with(config),
        Err(e) => {
            install_tracing();
            warn!(error = %e, "rejected environment configuration");
            NET_INVALID_PARAM
        }
    })
}

/// Like `net_init`, with a JSON `RuntimeConfig` object. Missing fields take
/// their defaults. Returns `NET_SUCCESS` without applying the config if a
/// runtime is already running.
#[unsafe(no_mangle)]
pub extern "C" fn net_init_with_config(config_json: *const c_char) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        let raw = match text(config_json, "config_json") {
            Ok(raw) => raw,
            Err(e) => return code_of(&e),
        };
        match RuntimeConfig::from_json(raw) {
            Ok(config) => init_with(config),
            Err(e) => {
                install_tracing();
                warn!(error = %e, "rejected JSON configuration");
                NET_INVALID_PARAM
            }
        }
    })
}

/// Run `shutdown` on the current runtime, then retire it from the slot.
fn retire(shutdown: impl FnOnce(&NetRuntime) -> c_int) -> c_int {
    let Some(rt) = runtime() else {
        return NET_SUCCESS;
    };
    let code = shutdown(&rt);
    {
        let mut slot = RUNTIME.write();
        if matches!(&*slot, Slot::Running(current) if Arc::ptr_eq(current, &rt)) {
            *slot = Slot::Terminated;
        }
    }
    // keep the views of a successor started by a concurrent `net_init`
    let successor = runtime();
    let mut views = RESPONSES.lock();
    match successor {
        Some(current) => views.retain(|&handle, _| current.validate(handle, HandleKind::HttpClient).is_ok()),
        None => views.clear(),
    }
    drop(views);
    drop(rt);
    code
}

/// Graceful shutdown: reject new operations and wait, without bound, for
/// in-flight ones to finish. Then every handle is invalid.
#[unsafe(no_mangle)]
pub extern "C" fn net_cleanup() -> c_int {
    guarded(NET_SESSION_FAILED, || {
        retire(|rt| {
            rt.cleanup(None);
            NET_SUCCESS
        })
    })
}

/// Graceful shutdown bounded by `timeout_seconds`. Work still running at
/// the deadline is aborted and `NET_TIMEOUT` is returned; the runtime is
/// shut down either way.
#[unsafe(no_mangle)]
pub extern "C" fn net_cleanup_with_timeout(timeout_seconds: c_int) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        let Ok(secs) = u64::try_from(timeout_seconds) else {
            return NET_INVALID_PARAM;
        };
        retire(|rt| {
            if rt.cleanup(Some(Duration::from_secs(secs))) {
                NET_SUCCESS
            } else {
                NET_TIMEOUT
            }
        })
    })
}

/// Invalidate every handle and abort in-flight operations immediately.
#[unsafe(no_mangle)]
pub extern "C" fn net_force_shutdown() -> c_int {
    guarded(NET_SESSION_FAILED, || {
        retire(|rt| {
            rt.force_shutdown();
            NET_SUCCESS
        })
    })
}

/// 1 once shutdown has been requested (including after it completed),
/// 0 otherwise.
#[unsafe(no_mangle)]
pub extern "C" fn net_is_shutdown_requested() -> c_int {
    guarded(0, || match &*RUNTIME.read() {
        Slot::Running(rt) => c_int::from(rt.is_shutdown_requested()),
        Slot::Terminated => 1,
        Slot::Uninit => 0,
    })
}

/// Number of operations currently registered with the shutdown
/// coordinator; `0` when no runtime is running.
#[unsafe(no_mangle)]
pub extern "C" fn net_get_active_operations_count() -> c_int {
    guarded(0, || {
        runtime().map_or(0, |rt| c_int::try_from(rt.active_operations()).unwrap_or(c_int::MAX))
    })
}

/// Static message for `error_code`; "Unknown error" for unknown codes.
/// Never null, never freed by the caller.
#[unsafe(no_mangle)]
pub extern "C" fn net_get_error_message(error_code: c_int) -> *const c_char {
    code_message(error_code).as_ptr()
}

// ---------------------------------------------------------------------------
// Lifecycle hooks
// ---------------------------------------------------------------------------

/// Register host callbacks. The struct is copied; `user_private` is passed
/// back to every callback. Handlers belong to the running runtime and are
/// dropped at shutdown.
#[unsafe(no_mangle)]
pub extern "C" fn net_register_runtime_handler(
    handler: *const CRuntimeHandler,
    user_private: *mut c_void,
) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        let Some(rt) = runtime() else {
            return NET_INVALID_HANDLE;
        };
        if handler.is_null() {
            return NET_INVALID_PARAM;
        }
        let callbacks = unsafe { *handler };
        rt.register_handler(Arc::new(ForeignHandler { callbacks, user_private }));
        NET_SUCCESS
    })
}

/// Invoke the callback for `phase` (0 construct .. 6 deconstruct) on every
/// registered handler.
#[unsafe(no_mangle)]
pub extern "C" fn net_dispatch_lifecycle(phase: c_int) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        let Some(rt) = runtime() else {
            return NET_INVALID_HANDLE;
        };
        match LifecyclePhase::from_raw(phase) {
            Some(phase) => {
                rt.dispatch_lifecycle(phase);
                NET_SUCCESS
            }
            None => NET_INVALID_PARAM,
        }
    })
}

// ---------------------------------------------------------------------------
// HTTP clients
// ---------------------------------------------------------------------------

/// Create an HTTP client. `protocol` is `NET_PROTOCOL_HTTP` or
/// `NET_PROTOCOL_HTTPS`. Returns `0` on failure.
#[unsafe(no_mangle)]
pub extern "C" fn client_create(protocol: c_int) -> NetHandle {
    guarded(0, || {
        let (Some(rt), Some(protocol)) = (runtime(), Protocol::from_raw(protocol).ok()) else {
            return 0;
        };
        rt.client_create(protocol).unwrap_or(0)
    })
}

/// Destroy the client and free its cached response. Operations still
/// running on it fail with `NET_INVALID_HANDLE`; a second destroy fails the
/// same way.
#[unsafe(no_mangle)]
pub extern "C" fn client_destroy(handle: NetHandle) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        let Some(rt) = runtime() else {
            return NET_INVALID_HANDLE;
        };
        let result = rt.client_destroy(handle);
        if result.is_ok() {
            RESPONSES.lock().remove(&handle);
        }
        status(result)
    })
}

/// Set the request URL. A bare `host/path` takes the scheme of the
/// client's protocol. On failure the previous URL is kept.
#[unsafe(no_mangle)]
pub extern "C" fn client_set_url(handle: NetHandle, url: *const c_char) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        status(with_handle(handle, HandleKind::HttpClient, |rt| {
            rt.client_set_url(handle, text(url, "url")?)
        }))
    })
}

/// Set the method used by `client_request`: `GET`, `POST`, `PUT`,
/// `DELETE`, `HEAD` or `PATCH`, case-insensitive.
#[unsafe(no_mangle)]
pub extern "C" fn client_set_method(handle: NetHandle, method: *const c_char) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        status(with_handle(handle, HandleKind::HttpClient, |rt| {
            rt.client_set_method(handle, text(method, "method")?)
        }))
    })
}

/// Set the Basic auth user. Must be non-empty and free of `:`.
#[unsafe(no_mangle)]
pub extern "C" fn client_set_user(handle: NetHandle, username: *const c_char) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        status(with_handle(handle, HandleKind::HttpClient, |rt| {
            rt.client_set_user(handle, text(username, "username")?)
        }))
    })
}

/// Set the Basic auth password; only sent once a user is set.
#[unsafe(no_mangle)]
pub extern "C" fn client_set_password(handle: NetHandle, password: *const c_char) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        status(with_handle(handle, HandleKind::HttpClient, |rt| {
            rt.client_set_password(handle, text(password, "password")?)
        }))
    })
}

/// Set the request body to `len` bytes at `body`. A null `body` is only
/// accepted with `len == 0` and clears the body.
#[unsafe(no_mangle)]
pub extern "C" fn client_set_req_body(handle: NetHandle, body: *const u8, len: usize) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        status(with_handle(handle, HandleKind::HttpClient, |rt| {
            let bytes: &[u8] = match (body.is_null(), len) {
                (_, 0) => &[],
                (true, _) => return Err(invalid_param("body must not be null when len is non-zero")),
                (false, len) => unsafe { std::slice::from_raw_parts(body, len) },
            };
            rt.client_set_body(handle, bytes)
        }))
    })
}

/// Append a request header. Repeated names are sent repeatedly.
#[unsafe(no_mangle)]
pub extern "C" fn client_set_header(
    handle: NetHandle,
    name: *const c_char,
    value: *const c_char,
) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        status(with_handle(handle, HandleKind::HttpClient, |rt| {
            rt.client_set_header(handle, text(name, "name")?, text(value, "value")?)
        }))
    })
}

/// Request timeout in seconds; `0` selects the configured default.
#[unsafe(no_mangle)]
pub extern "C" fn client_set_timeout(handle: NetHandle, timeout_seconds: c_int) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        status(with_handle(handle, HandleKind::HttpClient, |rt| {
            rt.client_set_timeout(handle, i64::from(timeout_seconds))
        }))
    })
}

/// Execute the configured request and store the response on the handle.
/// Non-2xx statuses are `NET_SUCCESS`; inspect the stored response.
#[unsafe(no_mangle)]
pub extern "C" fn client_request(handle: NetHandle) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        status(with_handle(handle, HandleKind::HttpClient, |rt| {
            rt.client_request(handle, None).map(|_| ())
        }))
    })
}

/// Point the client at `url` and open a TCP connection to its host within
/// the client's timeout. On failure the previous URL is kept.
#[unsafe(no_mangle)]
pub extern "C" fn client_connect(handle: NetHandle, url: *const c_char) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        status(with_handle(handle, HandleKind::HttpClient, |rt| {
            let peer = rt.client_connect(handle, text(url, "url")?)?;
            info!(handle, %peer, "client connected");
            Ok(())
        }))
    })
}

/// Borrowed C view of `response`, cached per handle and rebuilt only when
/// the stored response changed. The handle is re-checked under the cache
/// lock so a concurrent `client_destroy` never leaves a view behind.
fn view(rt: &NetRuntime, handle: NetHandle, response: Arc<Response>) -> CNetResponse {
    let mut views = RESPONSES.lock();
    if let Err(e) = rt.validate(handle, HandleKind::HttpClient) {
        views.remove(&handle);
        return CNetResponse::from_error(&e);
    }
    let fresh = match views.get(&handle) {
        Some(view) => !Arc::ptr_eq(&view.response, &response),
        None => true,
    };
    if fresh {
        views.insert(handle, ResponseView::new(response));
    }
    views.get(&handle).map_or_else(|| CNetResponse::from_error(&NetError::InvalidHandle), ResponseView::as_c)
}

fn panicked_response() -> CNetResponse {
    CNetResponse::from_error(&NetError::SessionFailed(String::new()))
}

fn respond(handle: NetHandle, method: Option<HttpMethod>) -> CNetResponse {
    let Some(rt) = runtime() else {
        return CNetResponse::from_error(&NetError::InvalidHandle);
    };
    let outcome = match method {
        Some(method) => rt.client_request(handle, Some(method)),
        None => rt.client_response(handle),
    };
    match outcome {
        Ok(response) => view(&rt, handle, response),
        // handle and shutdown errors never reach the stored response
        Err(e) if e.code() == ErrorCode::InvalidHandle => CNetResponse::from_error(&e),
        Err(e) => match rt.client_response(handle) {
            Ok(stored) => view(&rt, handle, stored),
            Err(_) => CNetResponse::from_error(&e),
        },
    }
}

/// The handle's most recent response, without network activity.
#[unsafe(no_mangle)]
pub extern "C" fn client_get_response(handle: NetHandle) -> CNetResponse {
    guarded(panicked_response(), || respond(handle, None))
}

/// Execute a GET regardless of the configured method and return the
/// response. The configured method is left unchanged.
#[unsafe(no_mangle)]
pub extern "C" fn client_get_request(handle: NetHandle) -> CNetResponse {
    guarded(panicked_response(), || {
        respond(handle, Some(HttpMethod::Get))
    })
}

/// Execute a POST with the configured body. See `client_get_request`.
#[unsafe(no_mangle)]
pub extern "C" fn client_post_request(handle: NetHandle) -> CNetResponse {
    guarded(panicked_response(), || {
        respond(handle, Some(HttpMethod::Post))
    })
}

/// Execute a PUT with the configured body. See `client_get_request`.
#[unsafe(no_mangle)]
pub extern "C" fn client_put_request(handle: NetHandle) -> CNetResponse {
    guarded(panicked_response(), || {
        respond(handle, Some(HttpMethod::Put))
    })
}

/// Execute a DELETE. See `client_get_request`.
#[unsafe(no_mangle)]
pub extern "C" fn client_delete_request(handle: NetHandle) -> CNetResponse {
    guarded(panicked_response(), || {
        respond(handle, Some(HttpMethod::Delete))
    })
}

/// Copy the stored response body into `buf`. Returns the full body length
/// or a negative error code.
#[unsafe(no_mangle)]
pub extern "C" fn client_copy_response_body(handle: NetHandle, buf: *mut c_char, capacity: usize) -> i64 {
    guarded(i64::from(NET_SESSION_FAILED), || {
        length(with_handle(handle, HandleKind::HttpClient, |rt| {
            let response = rt.client_response(handle)?;
            copy_out(&response.body, buf, capacity)
        }))
    })
}

/// Copy the stored error message into `buf`; length `0` means the last
/// exchange succeeded or none has run.
#[unsafe(no_mangle)]
pub extern "C" fn client_copy_response_error(handle: NetHandle, buf: *mut c_char, capacity: usize) -> i64 {
    guarded(i64::from(NET_SESSION_FAILED), || {
        length(with_handle(handle, HandleKind::HttpClient, |rt| {
            let response = rt.client_response(handle)?;
            let message = response.error.as_deref().unwrap_or_default();
            copy_out(message.as_bytes(), buf, capacity)
        }))
    })
}

/// Copy the `host:port` reached by the last successful `client_connect`.
/// Returns its length, `0` if none, or a negative error code.
#[unsafe(no_mangle)]
pub extern "C" fn client_copy_connected_addr(handle: NetHandle, buf: *mut c_char, capacity: usize) -> i64 {
    guarded(i64::from(NET_SESSION_FAILED), || {
        length(with_handle(handle, HandleKind::HttpClient, |rt| {
            let addr = rt.client_connected_addr(handle)?.unwrap_or_default();
            copy_out(addr.as_bytes(), buf, capacity)
        }))
    })
}

// ---------------------------------------------------------------------------
// WebRTC sessions
// ---------------------------------------------------------------------------

/// Create a WebRTC session in the `Created` state. Returns `0` on failure.
#[unsafe(no_mangle)]
pub extern "C" fn webrtc_client_create() -> NetHandle {
    guarded(0, || runtime().and_then(|rt| rt.webrtc_create().ok()).unwrap_or(0))
}

/// Destroy the session. Pending operations on it fail with
/// `NET_INVALID_HANDLE`; the signaling connection and any stream close.
#[unsafe(no_mangle)]
pub extern "C" fn webrtc_client_destroy(handle: NetHandle) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        status(runtime().ok_or(NetError::InvalidHandle).and_then(|rt| rt.webrtc_destroy(handle)))
    })
}

/// Connect to a `ws://` or `wss://` signaling server. Only valid on a fresh
/// session; the state stays `Created` on failure.
#[unsafe(no_mangle)]
pub extern "C" fn webrtc_connect_to_signaling_server(handle: NetHandle, server_url: *const c_char) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        status(with_handle(handle, HandleKind::WebRtcSession, |rt| {
            rt.webrtc_connect(handle, text(server_url, "server_url")?)
        }))
    })
}

/// Ask the signaling server for a new session and copy its id into
/// `session_id_out` (truncated to fit). The full id stays available
/// through `webrtc_get_session_id`.
#[unsafe(no_mangle)]
pub extern "C" fn webrtc_create_session(
    handle: NetHandle,
    session_id_out: *mut c_char,
    capacity: usize,
) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        status(with_handle(handle, HandleKind::WebRtcSession, |rt| {
            check_buffer(session_id_out, capacity)?;
            let session_id = rt.webrtc_create_session(handle)?;
            copy_out(session_id.as_bytes(), session_id_out, capacity).map(|_| ())
        }))
    })
}

/// Copy the created or joined session id. Returns its full length or a
/// negative error code.
#[unsafe(no_mangle)]
pub extern "C" fn webrtc_get_session_id(handle: NetHandle, buf: *mut c_char, capacity: usize) -> i64 {
    guarded(i64::from(NET_SESSION_FAILED), || {
        length(with_handle(handle, HandleKind::WebRtcSession, |rt| {
            let session_id = rt.webrtc_session_id(handle)?;
            copy_out(session_id.as_bytes(), buf, capacity)
        }))
    })
}

/// Join an existing session as a subscriber. An id unknown to the server
/// fails with `NET_SESSION_FAILED`.
#[unsafe(no_mangle)]
pub extern "C" fn webrtc_join_session(handle: NetHandle, session_id: *const c_char) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        status(with_handle(handle, HandleKind::WebRtcSession, |rt| {
            rt.webrtc_join_session(handle, text(session_id, "session_id")?)
        }))
    })
}

/// Publish into the session this handle created. `session_id` must match.
#[unsafe(no_mangle)]
pub extern "C" fn webrtc_publish_session(handle: NetHandle, session_id: *const c_char) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        status(with_handle(handle, HandleKind::WebRtcSession, |rt| {
            rt.webrtc_publish_session(handle, text(session_id, "session_id")?)
        }))
    })
}

/// Answer the publisher of the joined session.
#[unsafe(no_mangle)]
pub extern "C" fn webrtc_subscribe_session(handle: NetHandle) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        status(with_handle(handle, HandleKind::WebRtcSession, |rt| rt.webrtc_subscribe_session(handle)))
    })
}

/// Publish camera `camera_index`. Fails with `NET_STREAM_FAILED` if the
/// camera cannot deliver a first frame, or when the library was built
/// without the `webcam` feature.
#[unsafe(no_mangle)]
pub extern "C" fn webrtc_start_webcam_stream(handle: NetHandle, camera_index: c_int) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        status(with_handle(handle, HandleKind::WebRtcSession, |rt| {
            let index = u32::try_from(camera_index).map_err(|_| invalid_param("camera_index must not be negative"))?;
            rt.webrtc_start_stream(handle, MediaSource::Webcam(index))
        }))
    })
}

/// Publish the contents of `file_path`, looping at end of file. The file
/// must be a non-empty regular file.
#[unsafe(no_mangle)]
pub extern "C" fn webrtc_start_file_stream(handle: NetHandle, file_path: *const c_char) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        status(with_handle(handle, HandleKind::WebRtcSession, |rt| {
            let path = PathBuf::from(text(file_path, "file_path")?);
            rt.webrtc_start_stream(handle, MediaSource::File(path))
        }))
    })
}

/// Stop streaming. Calling it again once stopped is a no-op.
#[unsafe(no_mangle)]
pub extern "C" fn webrtc_stop_stream(handle: NetHandle) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        status(with_handle(handle, HandleKind::WebRtcSession, |rt| rt.webrtc_stop_stream(handle)))
    })
}

/// Block until a subscriber answers or `timeout_seconds` elapse
/// (`NET_TIMEOUT`). Other calls on the same handle are not blocked.
#[unsafe(no_mangle)]
pub extern "C" fn webrtc_wait_for_subscriber(handle: NetHandle, timeout_seconds: c_int) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        status(with_handle(handle, HandleKind::WebRtcSession, |rt| {
            rt.webrtc_wait_for_subscriber(handle, i64::from(timeout_seconds))
        }))
    })
}

/// Frames sent by the current or last stream, or a negative error code.
/// `NET_STREAM_FAILED` means the media source died while streaming.
#[unsafe(no_mangle)]
pub extern "C" fn webrtc_get_frames_sent(handle: NetHandle) -> i64 {
    guarded(i64::from(NET_SESSION_FAILED), || {
        match with_handle(handle, HandleKind::WebRtcSession, |rt| rt.webrtc_frames_sent(handle)) {
            Ok(frames) => i64::try_from(frames).unwrap_or(i64::MAX),
            Err(e) => i64::from(code_of(&e)),
        }
    })
}

/// Current state (0 created .. 7 stopped) or a negative error code.
#[unsafe(no_mangle)]
pub extern "C" fn webrtc_get_state(handle: NetHandle) -> c_int {
    guarded(NET_SESSION_FAILED, || {
        match with_handle(handle, HandleKind::WebRtcSession, |rt| rt.webrtc_state(handle)) {
            Ok(state) => state as c_int,
            Err(e) => code_of(&e),
        }
    })
}

/// Create a session, connect, create and publish a session, and start
/// the webcam. The session id is copied into `session_id_out`. Returns `0`
/// if any step fails; nothing is left behind.
#[unsafe(no_mangle)]
pub extern "C" fn webrtc_setup_publisher(
    server_url: *const c_char,
    camera_index: c_int,
    session_id_out: *mut c_char,
    capacity: usize,
) -> NetHandle {
    guarded(0, || {
        let setup = || -> NetResult<NetHandle> {
            let rt = runtime().ok_or(NetError::InvalidHandle)?;
            let url = text(server_url, "server_url")?;
            let index = u32::try_from(camera_index).map_err(|_| invalid_param("camera_index must not be negative"))?;
            check_buffer(session_id_out, capacity)?;
            let (handle, session_id) = rt.webrtc_setup_publisher(url, index)?;
            copy_out(session_id.as_bytes(), session_id_out, capacity)?;
            Ok(handle)
        };
        setup().unwrap_or_else(|e| {
            warn!(error = %e, "webrtc_setup_publisher failed");
            0
        })
    })
}

/// Create a session, connect, join `session_id` and subscribe. Returns `0`
/// if any step fails; nothing is left behind.
#[unsafe(no_mangle)]
pub extern "C" fn webrtc_setup_subscriber(server_url: *const c_char, session_id: *const c_char) -> NetHandle {
    guarded(0, || {
        let setup = || -> NetResult<NetHandle> {
            let rt = runtime().ok_or(NetError::InvalidHandle)?;
            rt.webrtc_setup_subscriber(text(server_url, "server_url")?, text(session_id, "session_id")?)
        };
        setup().unwrap_or_else(|e| {
            warn!(error = %e, "webrtc_setup_subscriber failed");
            0
        })
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
