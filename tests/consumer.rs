//! Consumer connection lifecycle against misbehaving servers.

use std::time::Duration;

use artifact_relay::consumer::{ConsumerClient, ConsumerConfig, ConsumerEvent, ConsumerHandle, Phase};
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn next_event(handle: &mut ConsumerHandle) -> ConsumerEvent {
    timeout(WAIT, handle.events().recv())
        .await
        .expect("timed out waiting for consumer event")
        .expect("event channel closed")
}

/// Accepts WebSocket connections and reads forever without ever answering.
async fn silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                    while let Some(Ok(_)) = ws.next().await {}
                }
            });
        }
    });
    format!("ws://{addr}/unity")
}

fn config(server_url: String) -> ConsumerConfig {
    ConsumerConfig {
        server_url,
        poll_enabled: false,
        ping_interval_ms: 50,
        pong_timeout_ms: Some(120),
        reconnect_base_delay_ms: 10,
        max_reconnect_attempts: 1,
        ..ConsumerConfig::default()
    }
}

#[tokio::test]
async fn test_pong_timeout_forces_reconnect() {
    let url = silent_server().await;
    let mut handle = ConsumerClient::new(config(url)).unwrap().connect();

    assert!(matches!(next_event(&mut handle).await, ConsumerEvent::Connected));
    match next_event(&mut handle).await {
        ConsumerEvent::Disconnected { reason } => assert_eq!(reason, "pong timeout"),
        other => panic!("unexpected {other:?}"),
    }
    // The retry reaches the same silent server.
    assert!(matches!(next_event(&mut handle).await, ConsumerEvent::Connected));

    assert_eq!(handle.disconnect().await.phase, Phase::Disconnected);
}

#[tokio::test]
async fn test_pong_timeout_disabled_keeps_session() {
    let url = silent_server().await;
    let cfg = ConsumerConfig {
        pong_timeout_ms: Some(0),
        ..config(url)
    };
    let mut handle = ConsumerClient::new(cfg).unwrap().connect();

    assert!(matches!(next_event(&mut handle).await, ConsumerEvent::Connected));
    let quiet = timeout(Duration::from_millis(400), handle.events().recv()).await;
    assert!(quiet.is_err(), "session should stay up without pongs");
    assert_eq!(handle.state().phase, Phase::Connected);

    handle.disconnect().await;
}

#[tokio::test]
async fn test_unreachable_server_gives_up() {
    // Bind then drop to get a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let cfg = ConsumerConfig {
        max_reconnect_attempts: 3,
        ..config(format!("ws://{addr}/unity"))
    };
    let mut handle = ConsumerClient::new(cfg).unwrap().connect();

    match next_event(&mut handle).await {
        ConsumerEvent::GaveUp { attempts } => assert_eq!(attempts, 3),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(handle.state().phase, Phase::GivenUp);
    assert_eq!(handle.disconnect().await.phase, Phase::Disconnected);
}

#[tokio::test]
async fn test_disconnect_while_backing_off() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let cfg = ConsumerConfig {
        reconnect_base_delay_ms: 60_000,
        max_reconnect_attempts: 5,
        ..config(format!("ws://{addr}/unity"))
    };
    let handle = ConsumerClient::new(cfg).unwrap().connect();
    let mut states = handle.watch_state();
    timeout(WAIT, states.wait_for(|s| s.phase == Phase::Reconnecting))
        .await
        .unwrap()
        .unwrap();

    // Must return promptly even though the next retry is a minute away.
    let state = timeout(Duration::from_secs(1), handle.disconnect())
        .await
        .expect("disconnect hung on backoff timer");
    assert_eq!(state.phase, Phase::Disconnected);
}
