//! In-memory presence registry.
//!
//! Tracks every connected socket plus the subset that has proven an
//! identity. Presence changes are announced by re-broadcasting the full
//! signed-in id list to *all* connected sockets — unauthenticated observers
//! included — as a full-replacement list, not a diff.

use pulse_proto::{Envelope, EventKind};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Identifier for one live socket connection.
pub type ConnectionId = Uuid;

/// Registry of live connections and signed-in users.
///
/// Owned by [`crate::AppState`]; constructed at startup, dropped at
/// shutdown. All mutation goes through these methods so every presence
/// change is followed by exactly one broadcast decision.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    /// Every connected socket: connection id -> outbound sender.
    connections: Arc<RwLock<HashMap<ConnectionId, mpsc::Sender<String>>>>,
    /// Signed-in users: user id -> connection id. At most one entry per id.
    signed_in: Arc<RwLock<HashMap<i64, ConnectionId>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a socket to the connection set and returns its id.
    pub async fn add_connection(&self, sender: mpsc::Sender<String>) -> ConnectionId {
        let id = Uuid::new_v4();
        self.connections.write().await.insert(id, sender);
        id
    }

    /// Removes a socket from the connection set.
    pub async fn remove_connection(&self, conn_id: ConnectionId) {
        self.connections.write().await.remove(&conn_id);
    }

    /// Registers a user as signed in on the given connection, then
    /// broadcasts the updated presence list.
    ///
    /// A later sign-in for the same id overwrites the earlier connection
    /// reference without closing it (last-writer-wins). The superseded
    /// socket stays in the connection set and keeps receiving broadcasts.
    pub async fn register(&self, user_id: i64, conn_id: ConnectionId) {
        let replaced = self
            .signed_in
            .write()
            .await
            .insert(user_id, conn_id)
            .is_some();
        if replaced {
            tracing::info!(user_id, "replaced existing presence entry");
        } else {
            tracing::info!(user_id, "user signed in");
        }
        self.broadcast_presence().await;
    }

    /// Removes a user's presence entry, then broadcasts the updated list.
    pub async fn unregister(&self, user_id: i64) {
        self.signed_in.write().await.remove(&user_id);
        tracing::info!(user_id, "user signed out");
        self.broadcast_presence().await;
    }

    /// Removes the presence entry bound to a closing connection, if any.
    ///
    /// Used on transport close when the user id is not separately known.
    /// Broadcasts only when an entry was actually removed; a connection
    /// whose registration was superseded by a later sign-in no longer maps
    /// here and produces no broadcast.
    pub async fn unregister_by_connection(&self, conn_id: ConnectionId) -> bool {
        let removed = {
            let mut signed_in = self.signed_in.write().await;
            let user_id = signed_in
                .iter()
                .find_map(|(id, c)| (*c == conn_id).then_some(*id));
            match user_id {
                Some(id) => {
                    signed_in.remove(&id);
                    Some(id)
                }
                None => None,
            }
        };
        match removed {
            Some(user_id) => {
                tracing::info!(user_id, "user disconnected");
                self.broadcast_presence().await;
                true
            }
            None => false,
        }
    }

    /// Current signed-in user ids. Order is not significant.
    pub async fn signed_in_ids(&self) -> Vec<i64> {
        self.signed_in.read().await.keys().copied().collect()
    }

    /// Encodes the current presence list as a `signedInUsersIds` envelope.
    pub async fn presence_envelope(&self) -> Envelope {
        Envelope::new(EventKind::SignedInUsersIds, json!(self.signed_in_ids().await))
    }

    /// Broadcasts the full presence list to every connected socket.
    ///
    /// Iterates a snapshot of the sender set so connection churn during the
    /// broadcast cannot invalidate the iteration.
    pub async fn broadcast_presence(&self) {
        let envelope = self.presence_envelope().await;
        let text = match envelope.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("failed to encode presence broadcast: {}", e);
                return;
            }
        };
        let senders: Vec<mpsc::Sender<String>> =
            self.connections.read().await.values().cloned().collect();
        for sender in senders {
            if let Err(e) = sender.try_send(text.clone()) {
                tracing::warn!("dropping presence broadcast for slow consumer: {}", e);
            }
        }
    }

    /// Sends a text frame to one connection.
    pub async fn send_to(&self, conn_id: ConnectionId, text: String) {
        if let Some(sender) = self.connections.read().await.get(&conn_id) {
            if let Err(e) = sender.try_send(text) {
                tracing::warn!(%conn_id, "dropping direct message for slow consumer: {}", e);
            }
        }
    }

    /// Sends a text frame to a signed-in user's connection.
    ///
    /// Returns false when the user is not registered (receiver offline);
    /// the message is silently dropped in that case.
    pub async fn send_to_user(&self, user_id: i64, text: String) -> bool {
        let conn_id = { self.signed_in.read().await.get(&user_id).copied() };
        match conn_id {
            Some(conn_id) => {
                self.send_to(conn_id, text).await;
                true
            }
            None => false,
        }
    }
}
