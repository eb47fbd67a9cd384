//! WebRTC session orchestration: signaling, media sources and the
//! per-handle state machine.

pub mod media;
pub mod session;
pub mod signaling;

pub use media::{LocalMediaTransport, MediaSource, MediaTransport, StreamHandle, StreamStats};
pub use session::{Role, SessionState, WebRtcSession};
pub use signaling::{MessageType, SignalMessage, SignalingChannel, SignalingConnector, WsConnector};
