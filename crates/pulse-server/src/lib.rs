//! Pulse realtime server library logic.
//!
//! One WebSocket endpoint (`/ws`) tracks which users are currently signed
//! in, broadcasts presence changes to every connected socket, and relays
//! new-message notifications between connected clients. A `/health` probe
//! serves external orchestration.

pub mod config;
pub mod registry;
pub mod ws;

use axum::{routing::get, Extension, Router};
use pulse_identity::Keyring;
use registry::PresenceRegistry;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all connection handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session signing keyring.
    pub keyring: Arc<Keyring>,
    /// Presence registry, owned here for the process lifetime.
    pub registry: PresenceRegistry,
}

impl AppState {
    pub fn new(keyring: Keyring) -> Self {
        Self {
            keyring: Arc::new(keyring),
            registry: PresenceRegistry::new(),
        }
    }
}

/// Health check handler.
///
/// Returns `200 OK` with a static body. Used by load balancers and
/// monitoring to verify the server is running.
async fn health() -> &'static str {
    "hi"
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
