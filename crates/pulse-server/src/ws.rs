//! WebSocket endpoint: handshake identity check, per-connection dispatch,
//! and close cleanup.

use crate::registry::ConnectionId;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, WebSocketUpgrade,
    },
    http::header::COOKIE,
    http::HeaderMap,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use pulse_identity::identity_from_cookie_header;
use pulse_proto::{
    Envelope, EventKind, NotifyNewMessagePayload, ProtoError, SignInPayload, SignOutPayload, PING,
    PONG,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Capacity of the per-connection outbound channel. Beyond this the client
/// is too slow and messages are dropped.
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// `GET /ws` — upgrades to a WebSocket connection.
///
/// Identity comes from the `session` cookie on the handshake request. A
/// valid signature registers the user and broadcasts presence; anything
/// else joins as an unauthenticated observer that receives broadcasts but
/// is not counted.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let user_id = headers
        .get(COOKIE)
        .and_then(|value| value.to_str().ok())
        .map(|raw| identity_from_cookie_header(raw, &state.keyring))
        .and_then(|identity| {
            if !identity.signature_valid {
                return None;
            }
            // A signed id that is not numeric cannot be registered.
            identity.user_id.as_deref().and_then(|id| id.parse::<i64>().ok())
        });

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

/// Sends an `error` envelope to the client behind `tx`.
fn send_error(tx: &mpsc::Sender<String>, message: String) {
    match Envelope::new(EventKind::Error, serde_json::Value::String(message)).encode() {
        Ok(text) => {
            if let Err(e) = tx.try_send(text) {
                tracing::warn!("failed to send error to client: {}", e);
            }
        }
        Err(e) => {
            tracing::error!("failed to encode error envelope: {}", e);
        }
    }
}

/// Encodes an envelope and queues it on `tx`, logging failures.
fn send_envelope(tx: &mpsc::Sender<String>, envelope: &Envelope) {
    match envelope.encode() {
        Ok(text) => {
            if let Err(e) = tx.try_send(text) {
                tracing::warn!("dropping reply for slow consumer: {}", e);
            }
        }
        Err(e) => {
            tracing::error!(kind = %envelope.kind, "failed to encode reply: {}", e);
        }
    }
}

/// Handles one WebSocket connection for its whole lifetime.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: Option<i64>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_CHANNEL_CAPACITY);

    let conn_id = state.registry.add_connection(tx.clone()).await;
    tracing::debug!(%conn_id, authenticated = user_id.is_some(), "client connected");

    // Forward queued outbound frames to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    match user_id {
        Some(user_id) => {
            // Registration broadcasts the updated list to everyone,
            // including this new connection.
            state.registry.register(user_id, conn_id).await;
        }
        None => {
            // Observers see the current list but are not counted in it.
            let envelope = state.registry.presence_envelope().await;
            send_envelope(&tx, &envelope);
        }
    }

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            AxumMessage::Text(text) => {
                // Keepalive tokens bypass the envelope codec entirely.
                if text.as_str() == PING {
                    if let Err(e) = tx.try_send(PONG.to_string()) {
                        tracing::warn!(%conn_id, "failed to queue pong: {}", e);
                    }
                    continue;
                }
                dispatch(&state, conn_id, &tx, text.as_str()).await;
            }
            AxumMessage::Close(_) => break,
            _ => {}
        }
    }

    tracing::debug!(%conn_id, "client disconnected");
    state.registry.remove_connection(conn_id).await;
    state.registry.unregister_by_connection(conn_id).await;
    send_task.abort();
}

/// Decodes one text frame and applies the event it carries.
async fn dispatch(
    state: &Arc<AppState>,
    conn_id: ConnectionId,
    tx: &mpsc::Sender<String>,
    text: &str,
) {
    let envelope = match Envelope::decode(text) {
        Ok(envelope) => envelope,
        Err(ProtoError::UnknownKind(kind)) => {
            tracing::debug!(%conn_id, %kind, "unsupported event type");
            send_error(
                tx,
                format!(r#"message with type "{}" is not supported"#, kind),
            );
            return;
        }
        Err(e) => {
            tracing::warn!(%conn_id, "undecodable frame: {}", e);
            send_error(tx, "invalid message format".to_string());
            return;
        }
    };

    match envelope.kind {
        EventKind::Echo => {
            send_envelope(tx, &Envelope::new(EventKind::Echo, envelope.payload));
        }
        EventKind::SignIn => {
            let payload: SignInPayload = match envelope.payload_as() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(%conn_id, "malformed signIn payload: {}", e);
                    return;
                }
            };
            if state
                .keyring
                .verify(&payload.user_id.to_string(), &payload.signature)
            {
                state.registry.register(payload.user_id, conn_id).await;
            } else {
                tracing::warn!(%conn_id, user_id = payload.user_id, "signIn signature rejected");
            }
        }
        EventKind::SignOut => {
            let payload: SignOutPayload = match envelope.payload_as() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(%conn_id, "malformed signOut payload: {}", e);
                    return;
                }
            };
            // No signature re-check: any client may sign out any id.
            state.registry.unregister(payload.id).await;
        }
        EventKind::GetSignedInUsersIds => {
            let envelope = state.registry.presence_envelope().await;
            send_envelope(tx, &envelope);
        }
        EventKind::NotifyNewMessage => {
            let payload: NotifyNewMessagePayload = match envelope.payload_as() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(%conn_id, "malformed notifyNewMessage payload: {}", e);
                    return;
                }
            };
            let notification = Envelope::new(
                EventKind::NewMessagesArrived,
                serde_json::json!({ "senderId": payload.sender_id }),
            );
            match notification.encode() {
                Ok(text) => {
                    // Fire and forget: an offline receiver drops the message
                    // with no error to the sender.
                    let delivered = state.registry.send_to_user(payload.receiver_id, text).await;
                    if !delivered {
                        tracing::debug!(
                            receiver_id = payload.receiver_id,
                            "notification receiver offline"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!("failed to encode notification: {}", e);
                }
            }
        }
        kind => {
            send_error(
                tx,
                format!(r#"message with type "{}" is not supported"#, kind),
            );
        }
    }
}
