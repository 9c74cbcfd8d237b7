//! Health checker behavior against a live socket.

mod common;

use std::time::Duration;

use common::MockServer;
use llamad_supervisor::{HealthChecker, ServiceError};

#[tokio::test]
async fn ok_response_is_healthy() {
    let server = MockServer::health(0).await;
    let checker = HealthChecker::new("127.0.0.1", server.port());
    assert!(checker.check().await);
    assert!(checker.is_healthy());
}

#[tokio::test]
async fn service_unavailable_is_not_healthy() {
    let server = MockServer::health(usize::MAX).await;
    let checker = HealthChecker::new("127.0.0.1", server.port());
    assert!(!checker.check().await);
    assert!(!checker.is_healthy());
}

#[tokio::test]
async fn connection_refused_is_not_healthy() {
    // Bind and drop a listener to find a port nothing answers on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let checker = HealthChecker::new("127.0.0.1", port);
    assert!(!checker.check().await);
}

#[tokio::test]
async fn health_flag_tracks_the_latest_probe() {
    let server = MockServer::health(1).await;
    let checker = HealthChecker::new("127.0.0.1", server.port());
    assert!(!checker.check().await);
    assert!(checker.check().await);
    assert!(checker.is_healthy());
}

#[tokio::test]
async fn readiness_succeeds_on_the_last_allowed_attempt() {
    let server = MockServer::health(3).await;
    let checker = HealthChecker::new("127.0.0.1", server.port())
        .with_poll_interval(Duration::from_millis(10));
    checker.wait_for_ready(4).await.unwrap();
    assert_eq!(server.hits(), 4);
    assert!(checker.is_healthy());
}

#[tokio::test]
async fn readiness_fails_when_attempts_run_out() {
    let server = MockServer::health(3).await;
    let checker = HealthChecker::new("127.0.0.1", server.port())
        .with_poll_interval(Duration::from_millis(10));
    let err = checker.wait_for_ready(3).await.unwrap_err();
    assert!(matches!(err, ServiceError::ReadinessTimeout { attempts: 3 }));
    assert_eq!(server.hits(), 3);
    assert!(!checker.is_healthy());
}
