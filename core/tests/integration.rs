//! End-to-end tests against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port, then drives `NetRuntime` with
//! its default network seams: ureq for HTTP and tokio-tungstenite for
//! signaling. Validates that request building, execution, response storage
//! and the signaling protocol agree with the actual server.

mod common;

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{spawn_mock_server, test_config, wait_until, AnyMedia};
use netrt_core::{
    ErrorCode, HttpMethod, MediaSource, NetError, NetRuntime, Protocol, SessionState,
};

fn runtime() -> NetRuntime {
    NetRuntime::new(test_config()).unwrap()
}

#[test]
fn get_ok_round_trip() {
    let addr = spawn_mock_server();
    let rt = runtime();
    let h = rt.client_create(Protocol::Http).unwrap();
    rt.client_set_url(h, &format!("http://{addr}/ok")).unwrap();

    let resp = rt.client_request(h, None).unwrap();
    assert_eq!(resp.status_code, 200);
    assert_eq!(resp.body, b"ok");
    assert!(resp.error.is_none());
    assert_eq!(rt.active_operations(), 0);

    // stored and retrievable without network activity
    let again = rt.client_response(h).unwrap();
    assert!(Arc::ptr_eq(&resp, &again));
    rt.client_destroy(h).unwrap();
}

#[test]
fn bare_host_url_uses_protocol_scheme() {
    let addr = spawn_mock_server();
    let rt = runtime();
    let h = rt.client_create(Protocol::Http).unwrap();
    rt.client_set_url(h, &format!("{addr}/ok")).unwrap();
    assert_eq!(rt.client_request(h, None).unwrap().status_code, 200);
}

#[test]
fn method_override_sends_body_and_headers() {
    let addr = spawn_mock_server();
    let rt = runtime();
    let h = rt.client_create(Protocol::Http).unwrap();
    rt.client_set_url(h, &format!("http://{addr}/echo")).unwrap();
    rt.client_set_header(h, "X-Trace", "abc").unwrap();
    rt.client_set_header(h, "Content-Type", "text/plain").unwrap();
    rt.client_set_body(h, b"hello").unwrap();

    let resp = rt.client_request(h, Some(HttpMethod::Post)).unwrap();
    assert_eq!(resp.status_code, 200);
    assert_eq!(resp.header("x-echo-method"), Some("POST"));
    let echo: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(echo["method"], "POST");
    assert_eq!(echo["body"], "hello");
    assert_eq!(echo["headers"]["x-trace"], "abc");

    // the override did not persist; GET carries no body
    let resp = rt.client_request(h, None).unwrap();
    let echo: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(echo["method"], "GET");
    assert_eq!(echo["body"], "");
}

#[test]
fn configured_method_is_used() {
    let addr = spawn_mock_server();
    let rt = runtime();
    let h = rt.client_create(Protocol::Http).unwrap();
    rt.client_set_url(h, &format!("http://{addr}/echo")).unwrap();
    rt.client_set_method(h, "delete").unwrap();
    let resp = rt.client_request(h, None).unwrap();
    assert_eq!(resp.header("x-echo-method"), Some("DELETE"));
}

#[test]
fn non_success_status_is_data() {
    let addr = spawn_mock_server();
    let rt = runtime();
    let h = rt.client_create(Protocol::Http).unwrap();
    rt.client_set_url(h, &format!("http://{addr}/status/503")).unwrap();
    let resp = rt.client_request(h, Some(HttpMethod::Put)).unwrap();
    assert_eq!(resp.status_code, 503);
    assert_eq!(resp.body, b"status 503");
    assert!(!resp.is_error());
}

#[test]
fn basic_auth_credentials_are_sent() {
    let addr = spawn_mock_server();
    let rt = runtime();
    let h = rt.client_create(Protocol::Http).unwrap();
    rt.client_set_url(h, &format!("http://{addr}/auth")).unwrap();
    assert_eq!(rt.client_request(h, None).unwrap().status_code, 401);

    rt.client_set_user(h, mock_server::AUTH_USER).unwrap();
    rt.client_set_password(h, mock_server::AUTH_PASSWORD).unwrap();
    let resp = rt.client_request(h, None).unwrap();
    assert_eq!(resp.status_code, 200);
    assert_eq!(resp.body, b"authorized");
}

#[test]
fn hanging_server_times_out_within_margin() {
    let addr = spawn_mock_server();
    let rt = runtime();
    let h = rt.client_create(Protocol::Http).unwrap();
    rt.client_set_url(h, &format!("http://{addr}/hang")).unwrap();
    rt.client_set_timeout(h, 1).unwrap();

    let started = Instant::now();
    let err = rt.client_request(h, None).unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err, NetError::Timeout);
    assert_eq!(err.code(), ErrorCode::Timeout);
    assert!(elapsed >= Duration::from_millis(900), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "returned after {elapsed:?}");
    assert_eq!(rt.active_operations(), 0);

    let stored = rt.client_response(h).unwrap();
    assert_eq!(stored.error.as_deref(), Some("Operation timed out"));
}

#[test]
fn refused_connection_is_connection_failed() {
    let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let rt = runtime();
    let h = rt.client_create(Protocol::Http).unwrap();
    rt.client_set_url(h, &format!("http://127.0.0.1:{port}/")).unwrap();
    let err = rt.client_request(h, None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConnectionFailed);
    assert!(rt.client_response(h).unwrap().is_error());
}

#[test]
fn connect_reaches_host_and_sets_url() {
    let addr = spawn_mock_server();
    let rt = runtime();
    let h = rt.client_create(Protocol::Http).unwrap();
    let peer = rt.client_connect(h, &format!("http://{addr}/ok")).unwrap();
    assert_eq!(peer, addr.to_string());
    assert_eq!(rt.client_request(h, None).unwrap().status_code, 200);
}

#[test]
fn connect_to_closed_port_fails_without_changing_url() {
    let addr = spawn_mock_server();
    let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let rt = runtime();
    let h = rt.client_create(Protocol::Http).unwrap();
    rt.client_set_url(h, &format!("http://{addr}/ok")).unwrap();
    let err = rt.client_connect(h, &format!("http://127.0.0.1:{port}/")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConnectionFailed);
    assert_eq!(rt.client_request(h, None).unwrap().status_code, 200);
}

// ---------------------------------------------------------------------------
// WebRTC over the real signaling server
// ---------------------------------------------------------------------------

#[test]
fn publisher_and_subscriber_rendezvous() {
    let addr = spawn_mock_server();
    let signal_url = format!("ws://{addr}/signal");
    let rt = Arc::new(runtime());

    let publisher = rt.webrtc_create().unwrap();
    rt.webrtc_connect(publisher, &signal_url).unwrap();
    let session_id = rt.webrtc_create_session(publisher).unwrap();
    assert!(uuid::Uuid::parse_str(&session_id).is_ok());
    rt.webrtc_publish_session(publisher, &session_id).unwrap();
    assert_eq!(rt.webrtc_state(publisher).unwrap(), SessionState::Publishing);

    let waiter = {
        let rt = Arc::clone(&rt);
        std::thread::spawn(move || rt.webrtc_wait_for_subscriber(publisher, 10))
    };
    assert!(wait_until(Duration::from_secs(2), || rt.active_operations() == 1));

    let subscriber = rt.webrtc_setup_subscriber(&signal_url, &session_id).unwrap();
    assert_eq!(rt.webrtc_state(subscriber).unwrap(), SessionState::Subscribing);
    assert_eq!(rt.webrtc_session_id(subscriber).unwrap(), session_id);

    waiter.join().unwrap().unwrap();

    rt.webrtc_stop_stream(subscriber).unwrap();
    rt.webrtc_destroy(subscriber).unwrap();
    rt.webrtc_destroy(publisher).unwrap();
    assert_eq!(rt.live_handles(), 0);
}

#[test]
fn joining_unknown_session_fails() {
    let addr = spawn_mock_server();
    let rt = runtime();
    let h = rt.webrtc_create().unwrap();
    rt.webrtc_connect(h, &format!("ws://{addr}/signal")).unwrap();
    let err = rt.webrtc_join_session(h, "no-such-session").unwrap_err();
    assert_eq!(err.code(), ErrorCode::SessionFailed);
    assert_eq!(rt.webrtc_state(h).unwrap(), SessionState::SignalingConnected);
}

#[test]
fn signaling_connect_to_closed_port_fails() {
    let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let rt = runtime();
    let h = rt.webrtc_create().unwrap();
    let err = rt.webrtc_connect(h, &format!("ws://127.0.0.1:{port}/signal")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConnectionFailed);
    assert_eq!(rt.webrtc_state(h).unwrap(), SessionState::Created);
}

#[test]
fn file_stream_runs_until_stopped() {
    let addr = spawn_mock_server();
    let rt = runtime();
    let mut clip = tempfile::NamedTempFile::new().unwrap();
    clip.write_all(&[1u8; 256]).unwrap();

    let h = rt.webrtc_create().unwrap();
    rt.webrtc_connect(h, &format!("ws://{addr}/signal")).unwrap();
    let id = rt.webrtc_create_session(h).unwrap();
    rt.webrtc_publish_session(h, &id).unwrap();
    rt.webrtc_start_stream(h, MediaSource::File(clip.path().to_path_buf())).unwrap();
    assert_eq!(rt.webrtc_state(h).unwrap(), SessionState::Streaming);

    let err = rt.webrtc_start_stream(h, MediaSource::File(clip.path().to_path_buf())).unwrap_err();
    assert_eq!(err.code(), ErrorCode::StreamFailed);

    rt.webrtc_stop_stream(h).unwrap();
    assert_eq!(rt.webrtc_state(h).unwrap(), SessionState::Stopped);
}

#[test]
fn setup_publisher_with_real_signaling() {
    let addr = spawn_mock_server();
    let rt = NetRuntime::builder()
        .config(test_config())
        .media(Arc::new(AnyMedia))
        .build()
        .unwrap();
    let (h, id) = rt.webrtc_setup_publisher(&format!("ws://{addr}/signal"), 0).unwrap();
    assert_eq!(rt.webrtc_state(h).unwrap(), SessionState::Streaming);
    assert_eq!(rt.webrtc_session_id(h).unwrap(), id);
}
