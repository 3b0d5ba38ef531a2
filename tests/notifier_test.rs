//! Integration tests for the notifier against a real WebSocket peer

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use vr_movement_notifier::{
    CloseKind, ConnectionState, EndpointConfig, Notifier, SocketClient, Transport,
};

/// Accepts connections and reports every text frame with its arrival time.
async fn capture_server() -> (EndpointConfig, mpsc::UnboundedReceiver<(String, Instant)>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind capture server");
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    if let Message::Text(text) = message {
                        let _ = tx.send((text, Instant::now()));
                    }
                }
            });
        }
    });

    (EndpointConfig::new("127.0.0.1", port), rx)
}

async fn open_notifier(endpoint: EndpointConfig, audit: bool) -> Notifier {
    let notifier = Notifier::new(endpoint, audit);
    let state = notifier
        .transport()
        .wait_while_connecting(Duration::from_secs(5))
        .await;
    assert_eq!(state, ConnectionState::Open);
    notifier
}

async fn next_frame(rx: &mut mpsc::UnboundedReceiver<(String, Instant)>) -> (String, Instant) {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timed out waiting for frame")
        .expect("Capture server stopped")
}

#[tokio::test]
async fn test_experiment_started_is_sent_immediately() {
    let (endpoint, mut frames) = capture_server().await;
    let notifier = open_notifier(endpoint, false).await;

    notifier.experiment_started(1000);

    let (text, _) = next_frame(&mut frames).await;
    assert_eq!(text, "ExperimentHasStarted | StartTime | 1000");
    assert_eq!(notifier.stats().sent, 1);
}

#[tokio::test]
async fn test_movement_arrives_after_delay() {
    let (endpoint, mut frames) = capture_server().await;
    let notifier = open_notifier(endpoint, false).await;

    let called_at = Instant::now();
    notifier.movement_occurred(2, 5, 2000);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(frames.try_recv().is_err(), "movement sent before the delay");

    let (text, arrived_at) = next_frame(&mut frames).await;
    assert_eq!(
        text,
        "MovementInfo | Rep, Movement Number, startTimeInFuture | 2, 5, 2000"
    );
    assert!(arrived_at - called_at >= Duration::from_millis(150));
}

#[tokio::test]
async fn test_full_session_order() {
    let (endpoint, mut frames) = capture_server().await;
    let notifier = open_notifier(endpoint, false).await;

    notifier.experiment_started(1);
    for mov in 0..5 {
        notifier.movement_occurred(1, mov, 10 + mov as i64);
    }
    tokio::time::sleep(Duration::from_millis(250)).await;
    notifier.experiment_ended(2);

    let mut received = Vec::new();
    for _ in 0..7 {
        received.push(next_frame(&mut frames).await.0);
    }

    assert_eq!(received[0], "ExperimentHasStarted | StartTime | 1");
    for mov in 0..5 {
        assert_eq!(
            received[1 + mov],
            format!(
                "MovementInfo | Rep, Movement Number, startTimeInFuture | 1, {mov}, {}",
                10 + mov
            )
        );
    }
    assert_eq!(received[6], "ExperimentHasEnded | EndTime | 2");
}

#[tokio::test]
async fn test_audit_mode_transmits_nothing() {
    let (endpoint, mut frames) = capture_server().await;
    // The connection is still opened in audit mode
    let notifier = open_notifier(endpoint, true).await;

    notifier.experiment_started(1000);
    notifier.movement_occurred(1, 0, 1100);
    notifier.experiment_ended(3000);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(frames.try_recv().is_err());
    assert_eq!(notifier.stats().suppressed, 3);
}

#[tokio::test]
async fn test_send_before_open_is_swallowed() {
    let (endpoint, mut frames) = capture_server().await;
    let client = SocketClient::open(endpoint);

    // Nothing has been polled yet, so the handshake cannot have finished
    assert_eq!(client.state(), ConnectionState::Connecting);
    assert!(!client.send("ExperimentHasStarted | StartTime | 1000"));

    let state = client.wait_while_connecting(Duration::from_secs(5)).await;
    assert_eq!(state, ConnectionState::Open);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(frames.try_recv().is_err(), "dropped message was delivered");
}

#[tokio::test]
async fn test_no_reconnect_after_server_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.close(None).await.unwrap();
        while ws.next().await.is_some() {}
    });

    let client = SocketClient::open(EndpointConfig::new("127.0.0.1", port));
    let deadline = Instant::now() + Duration::from_secs(5);
    while !client.state().is_terminal() {
        assert!(Instant::now() < deadline, "connection never closed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(client.state(), ConnectionState::Closed(CloseKind::Clean));
    assert!(!client.send("ExperimentHasEnded | EndTime | 1"));

    // Still closed a while later
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(client.state().is_terminal());
}

#[tokio::test]
async fn test_abrupt_disconnect_is_dropped() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Gone without a close handshake
        drop(ws);
    });

    let client = SocketClient::open(EndpointConfig::new("127.0.0.1", port));
    assert_eq!(
        client.wait_while_connecting(Duration::from_secs(5)).await,
        ConnectionState::Open
    );

    let deadline = Instant::now() + Duration::from_secs(5);
    while !client.state().is_terminal() {
        assert!(Instant::now() < deadline, "connection never closed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(client.state(), ConnectionState::Closed(CloseKind::Dropped));
    assert!(!client.send("ExperimentHasEnded | EndTime | 1"));

    // No reconnect
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.state(), ConnectionState::Closed(CloseKind::Dropped));
}

#[tokio::test]
async fn test_server_replies_are_ignored() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(Message::Text(text))) = ws.next().await {
            let _ = tx.send(text);
            let _ = ws.send(Message::Text("Keep running!".to_string())).await;
        }
    });

    let notifier = open_notifier(EndpointConfig::new("127.0.0.1", port), false).await;
    notifier.experiment_started(1);
    notifier.experiment_ended(2);

    let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    let second = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert_eq!(first.as_deref(), Some("ExperimentHasStarted | StartTime | 1"));
    assert_eq!(second.as_deref(), Some("ExperimentHasEnded | EndTime | 2"));
    assert_eq!(notifier.transport().state(), ConnectionState::Open);
}
