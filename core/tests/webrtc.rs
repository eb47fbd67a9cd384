//! WebRTC session state machine driven through `NetRuntime` with stub
//! signaling and media.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use common::{stub_runtime, EchoTransport, STUB_SESSION_ID};
use netrt_core::{ErrorCode, MediaSource, NetError, NetRuntime, SessionState};

fn runtime() -> NetRuntime {
    stub_runtime(Arc::new(EchoTransport))
}

fn clip() -> MediaSource {
    MediaSource::File(PathBuf::from("clip.bin"))
}

fn connected(rt: &NetRuntime) -> u64 {
    let h = rt.webrtc_create().unwrap();
    rt.webrtc_connect(h, "ws://stub/signal").unwrap();
    h
}

fn publishing(rt: &NetRuntime) -> u64 {
    let h = connected(rt);
    let id = rt.webrtc_create_session(h).unwrap();
    rt.webrtc_publish_session(h, &id).unwrap();
    h
}

#[test]
fn publish_before_create_fails_and_after_create_succeeds() {
    let rt = runtime();
    let h = connected(&rt);
    let err = rt.webrtc_publish_session(h, STUB_SESSION_ID).unwrap_err();
    assert_eq!(err.code(), ErrorCode::SessionFailed);
    assert_eq!(rt.webrtc_state(h).unwrap(), SessionState::SignalingConnected);

    let id = rt.webrtc_create_session(h).unwrap();
    assert_eq!(id, STUB_SESSION_ID);
    rt.webrtc_publish_session(h, &id).unwrap();
    assert_eq!(rt.webrtc_state(h).unwrap(), SessionState::Publishing);
}

#[test]
fn publish_on_fresh_handle_fails() {
    let rt = runtime();
    let h = rt.webrtc_create().unwrap();
    assert_eq!(rt.webrtc_publish_session(h, "x").unwrap_err().code(), ErrorCode::SessionFailed);
}

#[test]
fn publish_with_foreign_session_id_fails() {
    let rt = runtime();
    let h = connected(&rt);
    rt.webrtc_create_session(h).unwrap();
    let err = rt.webrtc_publish_session(h, "someone-else").unwrap_err();
    assert_eq!(err.code(), ErrorCode::SessionFailed);
    assert_eq!(rt.webrtc_state(h).unwrap(), SessionState::SessionCreated);
}

#[test]
fn connect_twice_fails() {
    let rt = runtime();
    let h = connected(&rt);
    assert_eq!(rt.webrtc_connect(h, "ws://stub/signal").unwrap_err().code(), ErrorCode::SessionFailed);
}

#[test]
fn connect_validates_url() {
    let rt = runtime();
    let h = rt.webrtc_create().unwrap();
    assert!(matches!(rt.webrtc_connect(h, "http://stub"), Err(NetError::InvalidParam(_))));
    assert!(matches!(rt.webrtc_connect(h, "ws://"), Err(NetError::InvalidParam(_))));
    let err = rt.webrtc_connect(h, "ws://unreachable/signal").unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConnectionFailed);
    assert_eq!(rt.webrtc_state(h).unwrap(), SessionState::Created);
}

#[test]
fn create_and_join_are_exclusive() {
    let rt = runtime();
    let h = connected(&rt);
    rt.webrtc_create_session(h).unwrap();
    assert_eq!(rt.webrtc_join_session(h, "other").unwrap_err().code(), ErrorCode::SessionFailed);

    let s = connected(&rt);
    rt.webrtc_join_session(s, "abc").unwrap();
    assert_eq!(rt.webrtc_state(s).unwrap(), SessionState::SessionJoined);
    assert_eq!(rt.webrtc_create_session(s).unwrap_err().code(), ErrorCode::SessionFailed);
}

#[test]
fn join_requires_session_id() {
    let rt = runtime();
    let h = connected(&rt);
    assert!(matches!(rt.webrtc_join_session(h, ""), Err(NetError::InvalidParam(_))));
    assert_eq!(rt.webrtc_state(h).unwrap(), SessionState::SignalingConnected);
}

#[test]
fn stream_lifecycle() {
    let rt = runtime();
    let h = publishing(&rt);

    rt.webrtc_start_stream(h, clip()).unwrap();
    assert_eq!(rt.webrtc_state(h).unwrap(), SessionState::Streaming);
    assert_eq!(rt.webrtc_start_stream(h, clip()).unwrap_err().code(), ErrorCode::StreamFailed);

    rt.webrtc_stop_stream(h).unwrap();
    assert_eq!(rt.webrtc_state(h).unwrap(), SessionState::Stopped);
    rt.webrtc_stop_stream(h).unwrap();

    // publishers may restart
    rt.webrtc_start_stream(h, clip()).unwrap();
    assert_eq!(rt.webrtc_state(h).unwrap(), SessionState::Streaming);
}

#[test]
fn dead_source_reports_stopped_and_allows_restart() {
    let rt = runtime();
    let h = publishing(&rt);
    assert_eq!(rt.webrtc_frames_sent(h).unwrap(), 0);

    rt.webrtc_start_stream(h, MediaSource::File(PathBuf::from("dead.bin"))).unwrap();
    assert_eq!(rt.webrtc_state(h).unwrap(), SessionState::Stopped);
    let err = rt.webrtc_frames_sent(h).unwrap_err();
    assert_eq!(err, NetError::StreamFailed("source went away".to_string()));
    assert_eq!(rt.webrtc_wait_for_subscriber(h, 0).unwrap_err().code(), ErrorCode::SessionFailed);

    rt.webrtc_start_stream(h, clip()).unwrap();
    assert_eq!(rt.webrtc_state(h).unwrap(), SessionState::Streaming);
    assert_eq!(rt.webrtc_frames_sent(h).unwrap(), 0);
}

#[test]
fn stop_after_source_died_succeeds() {
    let rt = runtime();
    let h = publishing(&rt);
    rt.webrtc_start_stream(h, MediaSource::File(PathBuf::from("dead.bin"))).unwrap();
    rt.webrtc_stop_stream(h).unwrap();
    assert_eq!(rt.webrtc_state(h).unwrap(), SessionState::Stopped);
    rt.webrtc_stop_stream(h).unwrap();
}

#[test]
fn failed_source_leaves_state_unchanged() {
    let rt = runtime();
    let h = publishing(&rt);
    let err = rt.webrtc_start_stream(h, MediaSource::Webcam(3)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::StreamFailed);
    assert_eq!(rt.webrtc_state(h).unwrap(), SessionState::Publishing);
}

#[test]
fn stream_before_publish_is_session_failure() {
    let rt = runtime();
    let h = connected(&rt);
    assert_eq!(rt.webrtc_start_stream(h, clip()).unwrap_err().code(), ErrorCode::SessionFailed);
    assert_eq!(rt.webrtc_stop_stream(h).unwrap_err().code(), ErrorCode::SessionFailed);
}

#[test]
fn subscriber_cannot_stream_or_wait() {
    let rt = runtime();
    let h = connected(&rt);
    rt.webrtc_join_session(h, "abc").unwrap();
    rt.webrtc_subscribe_session(h).unwrap();
    assert_eq!(rt.webrtc_state(h).unwrap(), SessionState::Subscribing);
    assert_eq!(rt.webrtc_start_stream(h, clip()).unwrap_err().code(), ErrorCode::SessionFailed);
    assert_eq!(rt.webrtc_wait_for_subscriber(h, 0).unwrap_err().code(), ErrorCode::SessionFailed);
}

#[test]
fn session_id_available_after_create() {
    let rt = runtime();
    let h = connected(&rt);
    assert_eq!(rt.webrtc_session_id(h).unwrap_err().code(), ErrorCode::SessionFailed);
    rt.webrtc_create_session(h).unwrap();
    assert_eq!(rt.webrtc_session_id(h).unwrap(), STUB_SESSION_ID);
}

#[test]
fn setup_publisher_destroys_handle_on_failure() {
    let rt = runtime();
    // stub media rejects cameras
    let err = rt.webrtc_setup_publisher("ws://stub/signal", 0).unwrap_err();
    assert_eq!(err.code(), ErrorCode::StreamFailed);
    assert_eq!(rt.live_handles(), 0);

    let err = rt.webrtc_setup_publisher("ws://unreachable/signal", 0).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConnectionFailed);
    assert_eq!(rt.live_handles(), 0);
}

#[test]
fn setup_subscriber_success_and_failure() {
    let rt = runtime();
    let h = rt.webrtc_setup_subscriber("ws://stub/signal", "abc").unwrap();
    assert_eq!(rt.webrtc_state(h).unwrap(), SessionState::Subscribing);

    let err = rt.webrtc_setup_subscriber("ws://stub/signal", "missing").unwrap_err();
    assert_eq!(err.code(), ErrorCode::SessionFailed);
    assert_eq!(rt.live_handles(), 1);
}

#[test]
fn kinds_are_not_interchangeable() {
    let rt = runtime();
    let rtc = rt.webrtc_create().unwrap();
    let http = rt.client_create(netrt_core::Protocol::Http).unwrap();
    assert_eq!(rt.client_set_url(rtc, "http://x/").unwrap_err(), NetError::InvalidHandle);
    assert_eq!(rt.webrtc_state(http).unwrap_err(), NetError::InvalidHandle);
    assert_eq!(rt.client_destroy(rtc).unwrap_err(), NetError::InvalidHandle);
    assert_eq!(rt.webrtc_destroy(http).unwrap_err(), NetError::InvalidHandle);
}

#[test]
fn destroyed_handle_rejects_everything() {
    let rt = runtime();
    let h = publishing(&rt);
    rt.webrtc_destroy(h).unwrap();
    assert_eq!(rt.webrtc_state(h).unwrap_err(), NetError::InvalidHandle);
    assert_eq!(rt.webrtc_stop_stream(h).unwrap_err(), NetError::InvalidHandle);
    assert_eq!(rt.webrtc_destroy(h).unwrap_err(), NetError::InvalidHandle);
}
