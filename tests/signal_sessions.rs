//! Integration tests for the client signaling endpoint.
//!
//! Each test binds a real relay on 127.0.0.1 and drives it with real
//! WebSocket clients.

use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use bittorrent_relay::{Relay, RelayConfig, Snapshot};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Atomic port counter for unique port allocation across parallel tests.
static PORT_COUNTER: AtomicU16 = AtomicU16::new(40600);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

const TEST_TIMEOUT: Duration = Duration::from_secs(10);
const HASH: &str = "test-swarm";

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_relay(port: u16) -> Relay {
    let mut config = RelayConfig::new("127.0.0.1", vec![HASH.to_owned()]);
    config.port = port;
    config.server = "127.0.0.1".to_owned();
    Relay::new(config).await.expect("relay failed to start")
}

async fn connect_signal(port: u16, id: &str, want: Option<&str>) -> Client {
    let mut url = format!("ws://127.0.0.1:{}/signal?hash={}&id={}", port, HASH, id);
    if let Some(want) = want {
        url.push_str("&want=");
        url.push_str(want);
    }
    let (socket, _) = timeout(TEST_TIMEOUT, connect_async(url.as_str()))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    socket
}

async fn next_json(socket: &mut Client) -> Value {
    loop {
        let msg = timeout(TEST_TIMEOUT, socket.next())
            .await
            .expect("read timed out")
            .expect("socket ended")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("bad frame");
        }
    }
}

async fn send_json(socket: &mut Client, value: Value) {
    socket
        .send(Message::Text(value.to_string()))
        .await
        .expect("send failed");
}

async fn expect_close(socket: &mut Client) {
    loop {
        match timeout(TEST_TIMEOUT, socket.next()).await.expect("close timed out") {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
            Some(Ok(_)) => {}
        }
    }
}

/// Poll the relay's snapshot until the condition holds.
async fn wait_for(relay: &Relay, cond: impl Fn(&Snapshot) -> bool) {
    timeout(TEST_TIMEOUT, async {
        loop {
            if cond(&relay.snapshot().await) {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[tokio::test]
async fn lone_client_waits_and_second_is_paired() {
    let port = next_port();
    let relay = spawn_relay(port).await;

    let _a = connect_signal(port, "a", Some("2")).await;
    wait_for(&relay, |s| s.clients == 1 && s.waiting[HASH] == 1).await;

    let mut b = connect_signal(port, "b", Some("2")).await;
    let init = next_json(&mut b).await;
    assert_eq!(init["action"], "init");
    assert_eq!(init["req"], "b");
    assert_eq!(init["res"], "a");

    wait_for(&relay, |s| s.waiting[HASH] == 0).await;
}

#[tokio::test]
async fn proc_settles_the_exchange_and_requeues_both() {
    let port = next_port();
    let relay = spawn_relay(port).await;

    let mut a = connect_signal(port, "a", Some("2")).await;
    wait_for(&relay, |s| s.clients == 1).await;
    let mut b = connect_signal(port, "b", Some("2")).await;
    let init = next_json(&mut b).await;
    assert_eq!(init["action"], "init");

    // Shuttle one offer/answer pair through the relay.
    send_json(&mut b, json!({"action":"request","req":"b","res":"a","sdp":"offer-blob"})).await;
    let offer = next_json(&mut a).await;
    assert_eq!(offer["action"], "request");
    assert_eq!(offer["sdp"], "offer-blob");

    send_json(&mut a, json!({"action":"response","req":"b","res":"a","sdp":"answer-blob"})).await;
    let answer = next_json(&mut b).await;
    assert_eq!(answer["sdp"], "answer-blob");

    send_json(&mut b, json!({"action":"proc","req":"b","res":"a"})).await;

    // Both still want one more peering, so both wait again.
    wait_for(&relay, |s| s.waiting[HASH] == 2 && s.clients == 2).await;
}

#[tokio::test]
async fn satisfied_clients_are_disconnected() {
    let port = next_port();
    let relay = spawn_relay(port).await;

    let mut a = connect_signal(port, "a", Some("1")).await;
    wait_for(&relay, |s| s.clients == 1).await;
    let mut b = connect_signal(port, "b", Some("1")).await;
    let init = next_json(&mut b).await;
    assert_eq!(init["action"], "init");

    send_json(&mut b, json!({"action":"proc","req":"b","res":"a"})).await;

    expect_close(&mut a).await;
    expect_close(&mut b).await;
    wait_for(&relay, |s| s.clients == 0).await;
}

#[tokio::test]
async fn disconnect_interrupts_the_pending_partner() {
    let port = next_port();
    let relay = spawn_relay(port).await;

    let a = connect_signal(port, "a", Some("2")).await;
    wait_for(&relay, |s| s.clients == 1).await;
    let mut b = connect_signal(port, "b", Some("2")).await;
    let init = next_json(&mut b).await;
    assert_eq!(init["action"], "init");

    drop(a);

    let interrupt = next_json(&mut b).await;
    assert_eq!(interrupt["action"], "interrupt");
    assert_eq!(interrupt["id"], "a");

    // The survivor goes back into the pool under its own hash.
    wait_for(&relay, |s| s.clients == 1 && s.waiting[HASH] == 1).await;
}

#[tokio::test]
async fn missing_params_are_refused() {
    let port = next_port();
    let _relay = spawn_relay(port).await;

    let url = format!("ws://127.0.0.1:{}/signal?hash={}", port, HASH);
    let (mut socket, _) = connect_async(url.as_str()).await.expect("connect failed");
    let err = next_json(&mut socket).await;
    assert_eq!(err["action"], "error");
    assert_eq!(err["error"], "hash and id are required");
    expect_close(&mut socket).await;
}

#[tokio::test]
async fn unsubscribed_hash_is_refused() {
    let port = next_port();
    let _relay = spawn_relay(port).await;

    let url = format!("ws://127.0.0.1:{}/signal?hash=other-swarm&id=a", port);
    let (mut socket, _) = connect_async(url.as_str()).await.expect("connect failed");
    let err = next_json(&mut socket).await;
    assert_eq!(err["action"], "error");
    assert_eq!(err["error"], "hash is not supported");
    expect_close(&mut socket).await;
}

#[tokio::test]
async fn colliding_client_id_is_refused() {
    let port = next_port();
    let relay = spawn_relay(port).await;

    let _a = connect_signal(port, "a", None).await;
    wait_for(&relay, |s| s.clients == 1).await;

    let mut imposter = connect_signal(port, "a", None).await;
    let err = next_json(&mut imposter).await;
    assert_eq!(err["action"], "error");
    assert_eq!(err["error"], "id is not available");
    expect_close(&mut imposter).await;

    // The original session is untouched.
    wait_for(&relay, |s| s.clients == 1).await;
}

#[tokio::test]
async fn unknown_actions_are_ignored_but_garbage_closes() {
    let port = next_port();
    let relay = spawn_relay(port).await;

    let mut a = connect_signal(port, "a", None).await;
    wait_for(&relay, |s| s.clients == 1).await;

    send_json(&mut a, json!({"action":"scrape"})).await;
    sleep(Duration::from_millis(100)).await;
    wait_for(&relay, |s| s.clients == 1).await;

    a.send(Message::Text("not json".to_owned())).await.expect("send failed");
    expect_close(&mut a).await;
    wait_for(&relay, |s| s.clients == 0).await;
}

#[tokio::test]
async fn unknown_route_is_told_off_in_band() {
    let port = next_port();
    let _relay = spawn_relay(port).await;

    let url = format!("ws://127.0.0.1:{}/announce", port);
    let (mut socket, _) = connect_async(url.as_str()).await.expect("connect failed");
    let err = next_json(&mut socket).await;
    assert_eq!(err["action"], "error");
    assert_eq!(err["error"], "route is not supported");
    expect_close(&mut socket).await;
}
