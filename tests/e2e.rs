//! End-to-end: real server on an ephemeral port, real consumer.

use std::net::SocketAddr;
use std::time::Duration;

use artifact_relay::consumer::{
    ConsumerClient, ConsumerConfig, ConsumerEvent, ConsumerHandle, DeliveryChannel, Phase,
};
use artifact_relay::{server, Artifact, Relay};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

const WAIT: Duration = Duration::from_secs(5);

struct Running {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Running {
    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = timeout(WAIT, self.task).await;
    }
}

async fn start(relay: Relay) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        server::serve_with_listener(listener, relay, "/unity", async {
            let _ = stopped.await;
        })
        .await
        .unwrap();
    });
    Running {
        addr,
        stop: Some(stop),
        task,
    }
}

fn consumer_config(addr: SocketAddr) -> ConsumerConfig {
    ConsumerConfig {
        server_url: format!("ws://{addr}/unity"),
        api_base: format!("http://{addr}"),
        ping_interval_ms: 200,
        reconnect_base_delay_ms: 20,
        max_reconnect_attempts: 2,
        poll_interval_ms: 100,
        request_timeout_ms: 2_000,
        ..ConsumerConfig::default()
    }
}

async fn next_event(handle: &mut ConsumerHandle) -> ConsumerEvent {
    timeout(WAIT, handle.events().recv())
        .await
        .expect("timed out waiting for consumer event")
        .expect("event channel closed")
}

async fn wait_for_artifact(handle: &mut ConsumerHandle) -> (Artifact, DeliveryChannel) {
    loop {
        if let ConsumerEvent::Artifact { artifact, via } = next_event(handle).await {
            return (artifact, via);
        }
    }
}

async fn wait_until<F: Fn() -> bool>(cond: F) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        sleep(Duration::from_millis(10)).await;
    }
}

fn artifact(id: &str) -> Artifact {
    Artifact::from_value(json!({ "id": id, "text": "furu ike ya" })).unwrap()
}

#[tokio::test]
async fn test_pushed_artifact_is_not_redelivered_by_poll() {
    let relay = Relay::in_memory();
    let running = start(relay.clone()).await;

    let mut handle = ConsumerClient::new(consumer_config(running.addr))
        .unwrap()
        .connect();
    assert!(matches!(next_event(&mut handle).await, ConsumerEvent::Connected));
    wait_until(|| relay.push().client_count() == 1).await;

    relay.publish(artifact("a1")).await;
    let (received, _) = wait_for_artifact(&mut handle).await;
    assert_eq!(received.id, "a1");
    assert_eq!(received.get("text"), Some(&json!("furu ike ya")));

    // Several poll ticks go by; the pulled copy must be swallowed by dedup.
    wait_until(|| relay.metrics().snapshot().pull_items >= 1).await;
    sleep(Duration::from_millis(300)).await;
    assert!(handle.events().try_recv().is_err());

    let state = handle.disconnect().await;
    assert_eq!(state.phase, Phase::Disconnected);
    running.stop().await;
}

#[tokio::test]
async fn test_artifact_published_while_offline_arrives_by_pull() {
    let relay = Relay::in_memory();
    relay.publish(artifact("offline")).await;
    let running = start(relay.clone()).await;

    let mut handle = ConsumerClient::new(consumer_config(running.addr))
        .unwrap()
        .connect();

    let (received, via) = wait_for_artifact(&mut handle).await;
    assert_eq!(received.id, "offline");
    assert_eq!(via, DeliveryChannel::Pull);

    handle.disconnect().await;
    running.stop().await;
}

#[tokio::test]
async fn test_pushed_sequence_is_acknowledged() {
    let relay = Relay::in_memory();
    relay.change_log().register_consumer("unity-1");
    let running = start(relay.clone()).await;

    let config = ConsumerConfig {
        client_id: Some("unity-1".to_string()),
        poll_enabled: false,
        ..consumer_config(running.addr)
    };
    let mut handle = ConsumerClient::new(config).unwrap().connect();
    assert!(matches!(next_event(&mut handle).await, ConsumerEvent::Connected));
    wait_until(|| relay.push().client_count() == 1).await;

    relay.publish(artifact("acked")).await;
    assert_eq!(relay.change_log().pending("unity-1"), 1);

    let (received, via) = wait_for_artifact(&mut handle).await;
    assert_eq!(received.id, "acked");
    assert_eq!(via, DeliveryChannel::Push);
    wait_until(|| relay.change_log().pending("unity-1") == 0).await;

    handle.disconnect().await;
    running.stop().await;
}

#[tokio::test]
async fn test_server_shutdown_closes_push_connections() {
    let relay = Relay::in_memory();
    let running = start(relay.clone()).await;

    let config = ConsumerConfig {
        poll_enabled: false,
        ..consumer_config(running.addr)
    };
    let mut handle = ConsumerClient::new(config).unwrap().connect();
    assert!(matches!(next_event(&mut handle).await, ConsumerEvent::Connected));
    wait_until(|| relay.push().client_count() == 1).await;

    running.stop().await;

    assert!(matches!(
        next_event(&mut handle).await,
        ConsumerEvent::Disconnected { .. }
    ));
    // Nothing is listening any more: two retries, then give up.
    loop {
        if let ConsumerEvent::GaveUp { attempts } = next_event(&mut handle).await {
            assert_eq!(attempts, 2);
            break;
        }
    }
    assert_eq!(handle.state().phase, Phase::GivenUp);
    assert_eq!(handle.disconnect().await.phase, Phase::Disconnected);
}

#[tokio::test]
async fn test_record_change_over_http_reaches_consumer() {
    let relay = Relay::in_memory();
    let running = start(relay.clone()).await;

    let mut handle = ConsumerClient::new(consumer_config(running.addr))
        .unwrap()
        .connect();

    let response: serde_json::Value = reqwest::Client::new()
        .post(format!("http://{}/record-change", running.addr))
        .json(&json!({ "tsukiuta": { "id": "via-http", "text": "yama" } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response["success"], true);
    assert_eq!(response["changeId"], 1);

    let (received, _) = wait_for_artifact(&mut handle).await;
    assert_eq!(received.id, "via-http");

    handle.disconnect().await;
    running.stop().await;
}
