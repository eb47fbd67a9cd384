//! Handle-based networking runtime.
//!
//! # Overview
//! Exposes HTTP request/response clients and WebRTC publish/subscribe
//! sessions behind opaque integer handles, plus process-wide shutdown
//! control. The `netrt-ffi` crate wraps `NetRuntime` in a C ABI.
//!
//! # Design
//! - `NetRuntime` is an explicit context object; the only process-global
//!   state lives in the FFI crate.
//! - Handles are generational indices into a `HandleTable`, never
//!   addresses. Destroying a handle never waits on in-flight work.
//! - Every operation is counted by the `ShutdownCoordinator` for its whole
//!   duration, so shutdown can drain, time out, or force-abort it.
//! - Network access goes through the `Transport`, `SignalingConnector` and
//!   `MediaTransport` traits; tests substitute stubs.

pub mod client;
pub mod config;
pub mod error;
pub mod handle;
pub mod http;
pub mod lifecycle;
pub mod runtime;
pub mod shutdown;
pub mod transport;
pub mod webrtc;

pub use client::{HttpSession, Protocol};
pub use config::{ConfigError, RuntimeConfig};
pub use error::{message_for, ErrorCode, NetError, NetResult};
pub use handle::{Handle, HandleKind, INVALID_HANDLE};
pub use http::{HttpMethod, HttpRequest, Response};
pub use lifecycle::{LifecyclePhase, RuntimeHandler};
pub use runtime::NetRuntime;
pub use shutdown::ShutdownPhase;
pub use transport::{Transport, UreqTransport};
pub use webrtc::{MediaSource, SessionState};
