//! Loopback relay behaviour with an echoing pod

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{tcp_backend, EchoDialer, FakeCluster, FakePod, RefusingDialer};
use podtunnel::errors::PodtunnelError;
use podtunnel::k8s::{
    find_available_port, ForwardTarget, LabelSelector, PortForward, PortMapping, Relay, RelayError,
    SessionState, StreamDialer, TcpRelay,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

async fn echo_roundtrip(port: u16, payload: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    stream.read_exact(&mut buf).await.unwrap();
    buf
}

#[tokio::test]
async fn test_tcp_relay_forwards_and_stops() {
    let port = find_available_port().unwrap();
    let dialer: Arc<dyn StreamDialer> = Arc::new(EchoDialer::new("web-7f9"));
    let (stop_tx, stop_rx) = oneshot::channel();
    let (ready_tx, ready_rx) = oneshot::channel();

    let relay = tokio::spawn(async move {
        TcpRelay
            .forward_ports(dialer, PortMapping::new(port, 8080), stop_rx, ready_tx)
            .await
    });
    ready_rx.await.unwrap();

    assert_eq!(echo_roundtrip(port, b"ping").await, b"ping");
    assert_eq!(echo_roundtrip(port, b"second connection").await, b"second connection");

    stop_tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), relay).await.unwrap().unwrap();
    assert!(result.is_ok());

    // Listener is gone once the relay returns
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test]
async fn test_tcp_relay_bind_failure_never_signals_ready() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let dialer: Arc<dyn StreamDialer> = Arc::new(EchoDialer::new("web-7f9"));
    let (_stop_tx, stop_rx) = oneshot::channel();
    let (ready_tx, ready_rx) = oneshot::channel();

    let result = TcpRelay
        .forward_ports(dialer, PortMapping::new(port, 8080), stop_rx, ready_tx)
        .await;

    match result {
        Err(RelayError::Listen { port: failed, .. }) => assert_eq!(failed, port),
        other => panic!("expected listen error, got {other:?}"),
    }
    assert!(ready_rx.await.is_err());
}

#[tokio::test]
async fn test_session_over_tcp_relay() {
    let cluster = Arc::new(FakeCluster::with_pods(vec![FakePod::running(
        "web-7f9",
        &[("app", "web")],
    )]));
    let target = ForwardTarget::by_labels("default", LabelSelector::from_labels([("app", "web")]), 8080);
    let mut session = PortForward::with_backend(target, tcp_backend(&cluster)).unwrap();

    session.start(&CancellationToken::new()).await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);

    let port = session.listen_port();
    assert_eq!(echo_roundtrip(port, b"hello pod").await, b"hello pod");

    session.stop();
    tokio::time::timeout(Duration::from_secs(5), session.closed())
        .await
        .unwrap()
        .unwrap();
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test]
async fn test_session_reports_busy_listen_port() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let cluster = Arc::new(FakeCluster::default());
    let target = ForwardTarget::by_name("default", "web-7f9", 8080).with_listen_port(port);
    let mut session = PortForward::with_backend(target, tcp_backend(&cluster)).unwrap();

    let err = session.start(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, PodtunnelError::RelayStart(_)));
    let message = err.to_string();
    assert!(message.starts_with("could not create port forward"));
    assert!(message.contains(&format!("127.0.0.1:{port}")));
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn test_tcp_relay_rejected_upgrade_never_signals_ready() {
    let port = find_available_port().unwrap();
    let dialer: Arc<dyn StreamDialer> = Arc::new(RefusingDialer::new("web-7f9"));
    let (_stop_tx, stop_rx) = oneshot::channel();
    let (ready_tx, ready_rx) = oneshot::channel();

    let result = TcpRelay
        .forward_ports(dialer, PortMapping::new(port, 8080), stop_rx, ready_tx)
        .await;

    match result {
        Err(RelayError::Upstream { port: failed, source }) => {
            assert_eq!(failed, 8080);
            assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
        }
        other => panic!("expected upstream error, got {other:?}"),
    }
    assert!(ready_rx.await.is_err());
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test]
async fn test_session_fails_when_pod_stream_is_forbidden() {
    let cluster = Arc::new(FakeCluster {
        pods: vec![FakePod::running("web-7f9", &[("app", "web")])],
        refuse_dial: true,
        ..Default::default()
    });
    let target = ForwardTarget::by_labels("default", LabelSelector::from_labels([("app", "web")]), 8080);
    let mut session = PortForward::with_backend(target, tcp_backend(&cluster)).unwrap();

    let err = session.start(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, PodtunnelError::RelayStart(_)));
    let message = err.to_string();
    assert!(message.starts_with("could not create port forward"));
    assert!(message.contains("403 Forbidden"));
    assert_eq!(session.state(), SessionState::Failed);
    assert!(TcpStream::connect(("127.0.0.1", session.listen_port())).await.is_err());
}
