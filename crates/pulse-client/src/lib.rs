//! Client connection management for the Pulse realtime layer.
//!
//! A [`SocketActor`] owns one WebSocket connection at a time and keeps it
//! alive on the application's behalf: automatic reconnection with a fixed
//! retry delay, dead-connection detection via a ping/pong keepalive cycle,
//! and a send/receive surface independent of application message semantics.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = ClientConfig::new("ws://localhost:8090/ws");
//! let (actor, mut messages) = SocketActor::start(config);
//!
//! actor.send_empty(EventKind::GetSignedInUsersIds)?;
//!
//! while let Some(envelope) = messages.recv().await {
//!     match envelope.kind {
//!         EventKind::SignedInUsersIds => { /* refresh presence view */ }
//!         EventKind::NewMessagesArrived => { /* show a badge */ }
//!         _ => {}
//!     }
//! }
//! ```

pub mod actor;
pub mod machine;
pub mod transport;

pub use actor::{ClientConfig, ClientError, SocketActor};
pub use machine::{Keepalive, State};
