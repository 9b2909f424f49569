//! Presence lifecycle tests: handshake registration, sign-in/sign-out
//! broadcasts, and disconnect pruning.

use futures_util::{SinkExt, StreamExt};
use pulse_identity::{compose_value, Keyring};
use pulse_proto::{Envelope, EventKind};
use pulse_server::{app, AppState};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const KEYS: [&str; 2] = ["test-key-current", "test-key-previous"];

fn keyring() -> Keyring {
    Keyring::from_keys(KEYS).expect("valid keys")
}

async fn spawn_server() -> SocketAddr {
    let state = AppState::new(keyring());
    let app = app(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

async fn connect(addr: SocketAddr) -> WsClient {
    let url = format!("ws://{}/ws", addr);
    let (ws, _) = connect_async(url).await.expect("connect");
    ws
}

async fn connect_with_session(addr: SocketAddr, user_id: i64) -> WsClient {
    let ring = keyring();
    let cookie = compose_value(&user_id.to_string(), &ring.sign(&user_id.to_string()));
    let mut request = format!("ws://{}/ws", addr)
        .into_client_request()
        .expect("client request");
    request.headers_mut().insert(
        "Cookie",
        format!("session={}", cookie).parse().expect("header value"),
    );
    let (ws, _) = connect_async(request).await.expect("connect with cookie");
    ws
}

async fn recv_envelope(ws: &mut WsClient) -> Envelope {
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for frame")
        .expect("stream ended")
        .expect("transport error");
    match msg {
        Message::Text(text) => Envelope::decode(&text).expect("valid envelope"),
        other => panic!("expected text frame, got {:?}", other),
    }
}

fn ids_of(envelope: &Envelope) -> Vec<i64> {
    assert_eq!(envelope.kind, EventKind::SignedInUsersIds);
    let mut ids: Vec<i64> = envelope.payload_as().expect("id list payload");
    ids.sort_unstable();
    ids
}

async fn send_envelope(ws: &mut WsClient, envelope: Envelope) {
    ws.send(Message::Text(envelope.encode().expect("encode").into()))
        .await
        .expect("send");
}

fn sign_in(user_id: i64) -> Envelope {
    let ring = keyring();
    Envelope::new(
        EventKind::SignIn,
        json!({ "userId": user_id, "signature": ring.sign(&user_id.to_string()) }),
    )
}

#[tokio::test]
async fn handshake_cookie_registers_and_broadcasts() {
    let addr = spawn_server().await;

    let mut signed = connect_with_session(addr, 7).await;
    assert_eq!(ids_of(&recv_envelope(&mut signed).await), vec![7]);

    // A later observer sees the current list on connect.
    let mut observer = connect(addr).await;
    assert_eq!(ids_of(&recv_envelope(&mut observer).await), vec![7]);
}

#[tokio::test]
async fn handshake_with_bad_signature_joins_as_observer() {
    let addr = spawn_server().await;

    let mut request = format!("ws://{}/ws", addr)
        .into_client_request()
        .expect("client request");
    request
        .headers_mut()
        .insert("Cookie", "session=7.forged".parse().expect("header value"));
    let (mut ws, _) = connect_async(request).await.expect("connect");

    // Observer gets the (empty) list unicast, and is not counted in it.
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out")
        .expect("stream ended")
        .expect("transport error");
    let envelope = match msg {
        Message::Text(text) => Envelope::decode(&text).expect("valid envelope"),
        other => panic!("expected text frame, got {:?}", other),
    };
    assert_eq!(ids_of(&envelope), Vec::<i64>::new());
}

#[tokio::test]
async fn sign_in_broadcasts_to_every_socket() {
    let addr = spawn_server().await;

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    assert_eq!(ids_of(&recv_envelope(&mut a).await), Vec::<i64>::new());
    assert_eq!(ids_of(&recv_envelope(&mut b).await), Vec::<i64>::new());

    send_envelope(&mut a, sign_in(7)).await;

    assert_eq!(ids_of(&recv_envelope(&mut a).await), vec![7]);
    assert_eq!(ids_of(&recv_envelope(&mut b).await), vec![7]);
}

#[tokio::test]
async fn disconnect_without_sign_out_prunes_presence() {
    let addr = spawn_server().await;

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let _ = recv_envelope(&mut a).await;
    let _ = recv_envelope(&mut b).await;

    send_envelope(&mut a, sign_in(7)).await;
    let _ = recv_envelope(&mut a).await;
    assert_eq!(ids_of(&recv_envelope(&mut b).await), vec![7]);

    a.close(None).await.expect("close");

    assert_eq!(ids_of(&recv_envelope(&mut b).await), Vec::<i64>::new());
}

#[tokio::test]
async fn sign_out_unregisters_and_broadcasts() {
    let addr = spawn_server().await;

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let _ = recv_envelope(&mut a).await;
    let _ = recv_envelope(&mut b).await;

    send_envelope(&mut a, sign_in(7)).await;
    let _ = recv_envelope(&mut a).await;
    let _ = recv_envelope(&mut b).await;
    send_envelope(&mut b, sign_in(8)).await;
    let _ = recv_envelope(&mut a).await;
    let _ = recv_envelope(&mut b).await;

    // signOut carries no signature: any client may drop any id.
    send_envelope(&mut a, Envelope::new(EventKind::SignOut, json!({ "id": 7 }))).await;

    assert_eq!(ids_of(&recv_envelope(&mut a).await), vec![8]);
    assert_eq!(ids_of(&recv_envelope(&mut b).await), vec![8]);
}

#[tokio::test]
async fn sign_in_with_bad_signature_is_ignored() {
    let addr = spawn_server().await;

    let mut a = connect(addr).await;
    let _ = recv_envelope(&mut a).await;

    send_envelope(
        &mut a,
        Envelope::new(
            EventKind::SignIn,
            json!({ "userId": 7, "signature": "forged" }),
        ),
    )
    .await;

    // No broadcast resulted; the next reply is the echo we request here.
    send_envelope(&mut a, Envelope::new(EventKind::Echo, json!("still-here"))).await;
    let reply = recv_envelope(&mut a).await;
    assert_eq!(reply.kind, EventKind::Echo);
    assert_eq!(reply.payload, json!("still-here"));
}

#[tokio::test]
async fn duplicate_sign_in_replaces_earlier_connection() {
    let addr = spawn_server().await;

    let mut first = connect_with_session(addr, 7).await;
    let _ = recv_envelope(&mut first).await;

    let mut second = connect_with_session(addr, 7).await;
    // Registry re-broadcasts on the overwrite; the list stays [7].
    assert_eq!(ids_of(&recv_envelope(&mut second).await), vec![7]);
    assert_eq!(ids_of(&recv_envelope(&mut first).await), vec![7]);

    // The superseded connection closing must not prune user 7.
    first.close(None).await.expect("close");

    let mut observer = connect(addr).await;
    assert_eq!(ids_of(&recv_envelope(&mut observer).await), vec![7]);
}
