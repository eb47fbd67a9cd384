//! `#[repr(C)]` types and constants for the FFI boundary.
//!
//! # Design
//! Responses are handed to C as borrowed views: `CNetResponse` points into a
//! `ResponseView` cached per handle, which in turn keeps the core `Response`
//! alive. A view is replaced only when the handle's stored response changes,
//! so pointers stay valid until the next request on that handle, its
//! destruction, or shutdown.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};
use std::sync::Arc;

use netrt_core::lifecycle::RuntimeHandler;
use netrt_core::{ErrorCode, NetError, Response};

pub const NET_SUCCESS: c_int = 0;
pub const NET_INVALID_HANDLE: c_int = -1;
pub const NET_INVALID_PARAM: c_int = -2;
pub const NET_CONNECTION_FAILED: c_int = -3;
pub const NET_TIMEOUT: c_int = -4;
pub const NET_SESSION_FAILED: c_int = -5;
pub const NET_STREAM_FAILED: c_int = -6;

pub const NET_PROTOCOL_HTTP: c_int = 0;
pub const NET_PROTOCOL_HTTPS: c_int = 1;

/// Opaque runtime handle. `0` is never a valid handle.
pub type NetHandle = u64;

pub(crate) fn code_of(err: &NetError) -> c_int {
    err.code() as c_int
}

/// Static NUL-terminated message for a known code.
pub(crate) fn code_message(code: c_int) -> &'static CStr {
    match ErrorCode::from_raw(code) {
        Some(ErrorCode::Success) => c"Success",
        Some(ErrorCode::InvalidHandle) => c"Invalid handle",
        Some(ErrorCode::InvalidParam) => c"Invalid parameter",
        Some(ErrorCode::ConnectionFailed) => c"Connection failed",
        Some(ErrorCode::Timeout) => c"Operation timed out",
        Some(ErrorCode::SessionFailed) => c"Session operation failed",
        Some(ErrorCode::StreamFailed) => c"Stream operation failed",
        None => c"Unknown error",
    }
}

/// Static message for errors that are never stored on a handle.
fn static_error_message(err: &NetError) -> &'static CStr {
    match err {
        NetError::ShuttingDown => c"shutdown requested: new operations are rejected",
        NetError::Aborted => c"operation aborted by forced shutdown",
        other => code_message(code_of(other)),
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// One response header. Strings are not NUL-terminated; use the lengths.
#[repr(C)]
pub struct CNetHeader {
    pub name_ptr: *const c_char,
    pub name_len: usize,
    pub value_ptr: *const c_char,
    pub value_len: usize,
}

/// Borrowed view of a handle's most recent response.
///
/// If `error_ptr` is non-null the exchange failed and the other fields are
/// meaningless; when the call itself was rejected `status_code` carries the
/// error code. `error_ptr` is NUL-terminated; `body_ptr` is not.
#[repr(C)]
pub struct CNetResponse {
    pub status_code: c_int,
    pub body_ptr: *const u8,
    pub body_len: usize,
    pub headers_ptr: *const CNetHeader,
    pub headers_count: usize,
    pub error_ptr: *const c_char,
    pub error_len: usize,
}

impl CNetResponse {
    pub(crate) fn from_error(err: &NetError) -> Self {
        let msg = static_error_message(err);
        CNetResponse {
            status_code: code_of(err),
            body_ptr: std::ptr::null(),
            body_len: 0,
            headers_ptr: std::ptr::null(),
            headers_count: 0,
            error_ptr: msg.as_ptr(),
            error_len: msg.to_bytes().len(),
        }
    }
}

pub(crate) struct ResponseView {
    pub(crate) response: Arc<Response>,
    headers: Vec<CNetHeader>,
    error: Option<CString>,
}

// The raw pointers in `headers` point into `response`, which the view owns.
unsafe impl Send for ResponseView {}
unsafe impl Sync for ResponseView {}

impl ResponseView {
    pub(crate) fn new(response: Arc<Response>) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| CNetHeader {
                name_ptr: name.as_ptr().cast(),
                name_len: name.len(),
                value_ptr: value.as_ptr().cast(),
                value_len: value.len(),
            })
            .collect();
        let error = response
            .error
            .as_deref()
            .filter(|e| !e.is_empty())
            .map(|e| CString::new(e.replace('\0', " ")).unwrap_or_default());
        Self { response, headers, error }
    }

    pub(crate) fn as_c(&self) -> CNetResponse {
        let (error_ptr, error_len) = match &self.error {
            Some(e) => (e.as_ptr(), e.as_bytes().len()),
            None => (std::ptr::null(), 0),
        };
        let (headers_ptr, headers_count) = if self.headers.is_empty() {
            (std::ptr::null(), 0)
        } else {
            (self.headers.as_ptr(), self.headers.len())
        };
        let body = &self.response.body;
        CNetResponse {
            status_code: c_int::from(self.response.status_code),
            body_ptr: if body.is_empty() { std::ptr::null() } else { body.as_ptr() },
            body_len: body.len(),
            headers_ptr,
            headers_count,
            error_ptr,
            error_len,
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle callbacks
// ---------------------------------------------------------------------------

pub type LifecycleCallback = Option<extern "C" fn(user_private: *mut c_void)>;

/// Host lifecycle callbacks. Null entries are skipped; each callback
/// receives the `user_private` pointer given at registration.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct CRuntimeHandler {
    pub on_construct: LifecycleCallback,
    pub on_begin: LifecycleCallback,
    pub on_resumed: LifecycleCallback,
    pub on_suspended: LifecycleCallback,
    pub on_end: LifecycleCallback,
    pub on_update: LifecycleCallback,
    pub on_deconstruct: LifecycleCallback,
}

pub(crate) struct ForeignHandler {
    pub(crate) callbacks: CRuntimeHandler,
    pub(crate) user_private: *mut c_void,
}

// The host guarantees `user_private` may be used from any thread that
// dispatches lifecycle phases.
unsafe impl Send for ForeignHandler {}
unsafe impl Sync for ForeignHandler {}

impl ForeignHandler {
    fn call(&self, cb: LifecycleCallback) {
        if let Some(cb) = cb {
            cb(self.user_private);
        }
    }
}

impl RuntimeHandler for ForeignHandler {
    fn on_construct(&self) {
        self.call(self.callbacks.on_construct)
    }

    fn on_begin(&self) {
        self.call(self.callbacks.on_begin)
    }

    fn on_resumed(&self) {
        self.call(self.callbacks.on_resumed)
    }

    fn on_suspended(&self) {
        self.call(self.callbacks.on_suspended)
    }

    fn on_end(&self) {
        self.call(self.callbacks.on_end)
    }

    fn on_update(&self) {
        self.call(self.callbacks.on_update)
    }

    fn on_deconstruct(&self) {
        self.call(self.callbacks.on_deconstruct)
    }
}
