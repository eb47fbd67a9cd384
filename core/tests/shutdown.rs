//! Shutdown coordination and handle invalidation under concurrency, using
//! stub transports so timing is deterministic.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{stub_runtime, wait_until, EchoTransport, HangingTransport, SlowTransport, StubSignaling};
use netrt_core::{ErrorCode, NetError, NetRuntime, Protocol, SessionState, ShutdownPhase};

fn client(rt: &NetRuntime) -> u64 {
    let h = rt.client_create(Protocol::Http).unwrap();
    rt.client_set_url(h, "http://stub.invalid/").unwrap();
    h
}

fn spawn_request(rt: &Arc<NetRuntime>, h: u64) -> std::thread::JoinHandle<Result<u16, NetError>> {
    let rt = Arc::clone(rt);
    std::thread::spawn(move || rt.client_request(h, None).map(|r| r.status_code))
}

#[test]
fn stub_round_trip_restores_active_count() {
    let rt = stub_runtime(Arc::new(EchoTransport));
    let h = client(&rt);
    let resp = rt.client_request(h, None).unwrap();
    assert_eq!(resp.status_code, 200);
    assert_eq!(resp.body, b"ok");
    assert_eq!(rt.active_operations(), 0);
}

#[test]
fn timeout_against_stub_restores_active_count() {
    let rt = stub_runtime(Arc::new(HangingTransport));
    let h = client(&rt);
    rt.client_set_timeout(h, 1).unwrap();
    let started = Instant::now();
    assert_eq!(rt.client_request(h, None).unwrap_err(), NetError::Timeout);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(rt.active_operations(), 0);
}

#[test]
fn graceful_cleanup_waits_for_in_flight_request() {
    let rt = Arc::new(stub_runtime(Arc::new(SlowTransport(Duration::from_millis(200)))));
    let h = client(&rt);
    let worker = spawn_request(&rt, h);
    assert!(wait_until(Duration::from_secs(2), || rt.active_operations() == 1));

    assert!(rt.cleanup(None));
    assert_eq!(worker.join().unwrap(), Ok(200));
    assert_eq!(rt.active_operations(), 0);
    assert_eq!(rt.phase(), ShutdownPhase::Terminated);
    assert_eq!(rt.client_request(h, None).unwrap_err(), NetError::InvalidHandle);
}

#[test]
fn bounded_cleanup_aborts_after_deadline() {
    let rt = Arc::new(stub_runtime(Arc::new(HangingTransport)));
    let h = client(&rt);
    let worker = spawn_request(&rt, h);
    assert!(wait_until(Duration::from_secs(2), || rt.active_operations() == 1));

    let started = Instant::now();
    assert!(!rt.cleanup(Some(Duration::from_millis(200))));
    assert!(started.elapsed() < Duration::from_secs(2));

    let err = worker.join().unwrap().unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidHandle);
    assert_eq!(rt.active_operations(), 0);
    assert_eq!(rt.live_handles(), 0);
}

#[test]
fn new_operations_rejected_while_draining() {
    let rt = Arc::new(stub_runtime(Arc::new(HangingTransport)));
    let busy = client(&rt);
    let idle = client(&rt);
    let worker = spawn_request(&rt, busy);
    assert!(wait_until(Duration::from_secs(2), || rt.active_operations() == 1));

    let cleaner = {
        let rt = Arc::clone(&rt);
        std::thread::spawn(move || rt.cleanup(Some(Duration::from_millis(500))))
    };
    assert!(wait_until(Duration::from_secs(2), || rt.is_shutdown_requested()));

    let err = rt.client_set_url(idle, "http://other.invalid/").unwrap_err();
    assert_eq!(err, NetError::ShuttingDown);
    assert_eq!(err.code(), ErrorCode::InvalidHandle);
    assert_eq!(rt.client_create(Protocol::Http).unwrap_err(), NetError::ShuttingDown);
    assert_eq!(rt.webrtc_create().unwrap_err(), NetError::ShuttingDown);

    assert!(!cleaner.join().unwrap());
    assert!(worker.join().unwrap().is_err());
}

#[test]
fn force_shutdown_aborts_immediately() {
    let rt = Arc::new(stub_runtime(Arc::new(HangingTransport)));
    let handles: Vec<u64> = (0..3).map(|_| client(&rt)).collect();
    let workers: Vec<_> = handles.iter().map(|&h| spawn_request(&rt, h)).collect();
    assert!(wait_until(Duration::from_secs(2), || rt.active_operations() == 3));

    let started = Instant::now();
    rt.force_shutdown();
    for worker in workers {
        assert_eq!(worker.join().unwrap(), Err(NetError::Aborted));
    }
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(rt.active_operations(), 0);
    assert!(rt.is_shutdown_requested());
    for h in handles {
        assert_eq!(rt.client_destroy(h).unwrap_err(), NetError::InvalidHandle);
    }
}

#[test]
fn destroy_during_request_cancels_it() {
    let rt = Arc::new(stub_runtime(Arc::new(HangingTransport)));
    let h = client(&rt);
    let worker = spawn_request(&rt, h);
    assert!(wait_until(Duration::from_secs(2), || rt.active_operations() == 1));

    rt.client_destroy(h).unwrap();
    assert_eq!(worker.join().unwrap(), Err(NetError::InvalidHandle));
    assert_eq!(rt.client_destroy(h).unwrap_err(), NetError::InvalidHandle);
    assert_eq!(rt.active_operations(), 0);
}

#[test]
fn waiting_for_subscriber_does_not_block_the_session() {
    let signaling = StubSignaling::default();
    let rt = Arc::new(
        NetRuntime::builder()
            .config(common::test_config())
            .signaling(Arc::new(signaling.clone()))
            .media(Arc::new(common::StubMedia))
            .build()
            .unwrap(),
    );
    let h = rt.webrtc_create().unwrap();
    rt.webrtc_connect(h, "ws://stub/signal").unwrap();
    let id = rt.webrtc_create_session(h).unwrap();
    rt.webrtc_publish_session(h, &id).unwrap();

    let waiter = {
        let rt = Arc::clone(&rt);
        std::thread::spawn(move || rt.webrtc_wait_for_subscriber(h, 5))
    };
    assert!(wait_until(Duration::from_secs(2), || rt.active_operations() == 1));

    // other calls on the same handle proceed while the wait is pending
    let started = Instant::now();
    assert_eq!(rt.webrtc_state(h).unwrap(), SessionState::Publishing);
    assert!(started.elapsed() < Duration::from_secs(1));

    signaling.subscribers.send_modify(|n| *n += 1);
    waiter.join().unwrap().unwrap();
}

#[test]
fn wait_for_subscriber_times_out() {
    let rt = stub_runtime(Arc::new(EchoTransport));
    let h = rt.webrtc_create().unwrap();
    rt.webrtc_connect(h, "ws://stub/signal").unwrap();
    let id = rt.webrtc_create_session(h).unwrap();
    rt.webrtc_publish_session(h, &id).unwrap();

    let started = Instant::now();
    assert_eq!(rt.webrtc_wait_for_subscriber(h, 1).unwrap_err(), NetError::Timeout);
    assert!(started.elapsed() >= Duration::from_millis(900));
    assert!(matches!(rt.webrtc_wait_for_subscriber(h, -1), Err(NetError::InvalidParam(_))));
    assert_eq!(rt.active_operations(), 0);
}

#[test]
fn destroy_during_wait_releases_waiter() {
    let rt = Arc::new(stub_runtime(Arc::new(EchoTransport)));
    let h = rt.webrtc_create().unwrap();
    rt.webrtc_connect(h, "ws://stub/signal").unwrap();
    let id = rt.webrtc_create_session(h).unwrap();
    rt.webrtc_publish_session(h, &id).unwrap();

    let waiter = {
        let rt = Arc::clone(&rt);
        std::thread::spawn(move || rt.webrtc_wait_for_subscriber(h, 30))
    };
    assert!(wait_until(Duration::from_secs(2), || rt.active_operations() == 1));
    let started = Instant::now();
    rt.webrtc_destroy(h).unwrap();
    assert_eq!(waiter.join().unwrap(), Err(NetError::InvalidHandle));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn concurrent_creates_yield_unique_handles() {
    let rt = Arc::new(stub_runtime(Arc::new(EchoTransport)));
    let workers: Vec<_> = (0..8)
        .map(|i| {
            let rt = Arc::clone(&rt);
            std::thread::spawn(move || {
                (0..50)
                    .map(|_| {
                        if i % 2 == 0 {
                            rt.client_create(Protocol::Http).unwrap()
                        } else {
                            rt.webrtc_create().unwrap()
                        }
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let mut all: Vec<u64> = workers.into_iter().flat_map(|w| w.join().unwrap()).collect();
    assert!(all.iter().all(|&h| h != 0));
    let total = all.len();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), total);
    assert_eq!(rt.live_handles(), total);
}
