//! Connection lifecycle tests against real local WebSocket servers:
//! reconnection after failure, keepalive-driven dead-connection detection,
//! and message flow through the actor.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use pulse_client::{ClientConfig, Keepalive, SocketActor, State};
use pulse_proto::{Envelope, EventKind, PING, PONG};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

/// Serves a router on an ephemeral port.
async fn spawn_app(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

/// Server that greets with a presence envelope, answers keepalive pings,
/// and echoes every other text frame verbatim.
fn responsive_app() -> Router {
    async fn handler(ws: WebSocketUpgrade) -> impl IntoResponse {
        ws.on_upgrade(|mut socket: WebSocket| async move {
            let greeting = Envelope::new(EventKind::SignedInUsersIds, json!([7]))
                .encode()
                .expect("encode greeting");
            if socket.send(Message::Text(greeting.into())).await.is_err() {
                return;
            }
            while let Some(Ok(msg)) = socket.recv().await {
                if let Message::Text(text) = msg {
                    let reply = if text.as_str() == PING {
                        PONG.to_string()
                    } else {
                        text.to_string()
                    };
                    if socket.send(Message::Text(reply.into())).await.is_err() {
                        break;
                    }
                }
            }
        })
    }
    Router::new().route("/ws", get(handler))
}

/// Server that accepts connections but never answers anything — including
/// keepalive pings.
fn mute_app() -> Router {
    async fn handler(ws: WebSocketUpgrade) -> impl IntoResponse {
        ws.on_upgrade(|mut socket: WebSocket| async move {
            while let Some(Ok(_)) = socket.recv().await {}
        })
    }
    Router::new().route("/ws", get(handler))
}

async fn wait_for_state(
    rx: &mut tokio::sync::watch::Receiver<State>,
    timeout: Duration,
    predicate: impl FnMut(&State) -> bool,
) -> State {
    *tokio::time::timeout(timeout, rx.wait_for(predicate))
        .await
        .expect("timed out waiting for state")
        .expect("actor stopped")
}

#[tokio::test]
async fn unreachable_endpoint_fails_then_reconnects() {
    // Reserve a port, then release it so the first attempts are refused.
    let parked = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = parked.local_addr().expect("local addr");
    drop(parked);

    let config = ClientConfig::new(format!("ws://{}/ws", addr))
        .with_retry_delay(Duration::from_millis(200));
    let (actor, _messages) = SocketActor::start(config);
    let mut state_rx = actor.watch_state();

    wait_for_state(&mut state_rx, Duration::from_secs(2), |s| {
        *s == State::ConnectionError
    })
    .await;

    // Bring the endpoint up on the same port; the actor recovers within a
    // retry window plus connect time.
    let listener = TcpListener::bind(addr).await.expect("rebind");
    tokio::spawn(async move {
        axum::serve(listener, responsive_app()).await.expect("serve");
    });

    let state = wait_for_state(&mut state_rx, Duration::from_secs(3), |s| s.is_open()).await;
    assert_eq!(state, State::Open(Keepalive::PongReceived));

    actor.stop().await;
}

#[tokio::test]
async fn missed_pong_is_treated_as_dead_connection() {
    let addr = spawn_app(mute_app()).await;

    let config = ClientConfig::new(format!("ws://{}/ws", addr))
        .with_ping_interval(Duration::from_millis(150))
        .with_retry_delay(Duration::from_millis(200));
    let (actor, _messages) = SocketActor::start(config);
    let mut state_rx = actor.watch_state();

    wait_for_state(&mut state_rx, Duration::from_secs(2), |s| s.is_open()).await;

    // First timer fire sends a ping; the second, unanswered, kills the
    // connection.
    wait_for_state(&mut state_rx, Duration::from_secs(2), |s| {
        *s == State::ConnectionError
    })
    .await;

    // And the machine keeps trying: it reaches open again on its own.
    wait_for_state(&mut state_rx, Duration::from_secs(2), |s| s.is_open()).await;

    actor.stop().await;
}

#[tokio::test]
async fn keepalive_pongs_keep_the_connection_open() {
    let addr = spawn_app(responsive_app()).await;

    let config = ClientConfig::new(format!("ws://{}/ws", addr))
        .with_ping_interval(Duration::from_millis(100));
    let (actor, mut messages) = SocketActor::start(config);
    let mut state_rx = actor.watch_state();

    wait_for_state(&mut state_rx, Duration::from_secs(2), |s| s.is_open()).await;
    let _ = messages.recv().await; // greeting

    // Several keepalive cycles pass without a drop.
    tokio::time::sleep(Duration::from_millis(450)).await;
    assert!(actor.state().is_open());

    actor.stop().await;
}

#[tokio::test]
async fn messages_round_trip_through_the_actor() {
    let addr = spawn_app(responsive_app()).await;

    let (actor, mut messages) = SocketActor::start(ClientConfig::new(format!("ws://{}/ws", addr)));
    let mut state_rx = actor.watch_state();
    wait_for_state(&mut state_rx, Duration::from_secs(2), |s| s.is_open()).await;

    // The greeting arrives decoded.
    let greeting = tokio::time::timeout(Duration::from_secs(2), messages.recv())
        .await
        .expect("timed out")
        .expect("channel open");
    assert_eq!(greeting.kind, EventKind::SignedInUsersIds);
    assert_eq!(greeting.payload, json!([7]));

    // A send while open is forwarded; the echo server mirrors it back.
    actor
        .send(EventKind::Echo, json!("round-trip"))
        .expect("send while open");
    let reply = tokio::time::timeout(Duration::from_secs(2), messages.recv())
        .await
        .expect("timed out")
        .expect("channel open");
    assert_eq!(reply.kind, EventKind::Echo);
    assert_eq!(reply.payload, json!("round-trip"));

    actor.stop().await;
}

#[tokio::test]
async fn sends_outside_open_are_dropped_silently() {
    // Nothing listens here; the actor sits in the retry cycle.
    let parked = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = parked.local_addr().expect("local addr");
    drop(parked);

    let config = ClientConfig::new(format!("ws://{}/ws", addr))
        .with_retry_delay(Duration::from_millis(100));
    let (actor, _messages) = SocketActor::start(config);
    let mut state_rx = actor.watch_state();
    wait_for_state(&mut state_rx, Duration::from_secs(2), |s| {
        *s == State::ConnectionError
    })
    .await;

    // Queuing succeeds; the machine drops the frame without error.
    actor
        .send(EventKind::Echo, json!("into the void"))
        .expect("queueing is always accepted");

    actor.stop().await;
}

#[tokio::test]
async fn stop_tears_down_cleanly() {
    let addr = spawn_app(responsive_app()).await;

    let (actor, mut messages) = SocketActor::start(ClientConfig::new(format!("ws://{}/ws", addr)));
    let mut state_rx = actor.watch_state();
    wait_for_state(&mut state_rx, Duration::from_secs(2), |s| s.is_open()).await;

    actor.stop().await;

    // The message channel closes once the driver is gone.
    loop {
        match tokio::time::timeout(Duration::from_secs(2), messages.recv()).await {
            Ok(Some(_)) => continue, // drain the greeting
            Ok(None) => break,
            Err(_) => panic!("message channel did not close after stop"),
        }
    }
}
