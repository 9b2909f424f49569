//! Wire protocol for the Pulse realtime layer.
//!
//! Every application-level message is a JSON text frame of the shape
//! `{ "type": <EventKind>, "payload": <any> }`. Payload-less events carry an
//! empty string payload, matching what every existing client sends.
//!
//! The keepalive tokens [`PING`] and [`PONG`] are deliberately *not* part of
//! the envelope format: they travel as bare text frames and must be checked
//! before decoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Literal keepalive request token, sent as a bare text frame.
pub const PING: &str = "ping";

/// Literal keepalive response token, sent as a bare text frame.
pub const PONG: &str = "pong";

/// Errors that can occur while encoding or decoding envelopes.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// JSON serialization or deserialization failed.
    #[error("protocol serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The frame was a well-formed envelope, but its `type` string is not a
    /// known [`EventKind`]. Carries the offending type string.
    #[error(r#"unknown event type "{0}""#)]
    UnknownKind(String),
}

/// The fixed set of event kinds understood by the realtime layer.
///
/// Serialized as the camelCase strings the wire protocol uses
/// (`"signIn"`, `"signedInUsersIds"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "echo")]
    Echo,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "signIn")]
    SignIn,
    #[serde(rename = "signOut")]
    SignOut,
    #[serde(rename = "signedInUsersIds")]
    SignedInUsersIds,
    #[serde(rename = "getSignedInUsersIds")]
    GetSignedInUsersIds,
    #[serde(rename = "notifyNewMessage")]
    NotifyNewMessage,
    #[serde(rename = "newMessagesArrived")]
    NewMessagesArrived,
}

impl EventKind {
    /// Looks a kind up by its wire name. Returns `None` for anything outside
    /// the known set.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "error" => Some(Self::Error),
            "echo" => Some(Self::Echo),
            "ping" => Some(Self::Ping),
            "pong" => Some(Self::Pong),
            "signIn" => Some(Self::SignIn),
            "signOut" => Some(Self::SignOut),
            "signedInUsersIds" => Some(Self::SignedInUsersIds),
            "getSignedInUsersIds" => Some(Self::GetSignedInUsersIds),
            "notifyNewMessage" => Some(Self::NotifyNewMessage),
            "newMessagesArrived" => Some(Self::NewMessagesArrived),
            _ => None,
        }
    }

    /// Returns the wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Echo => "echo",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::SignIn => "signIn",
            Self::SignOut => "signOut",
            Self::SignedInUsersIds => "signedInUsersIds",
            Self::GetSignedInUsersIds => "getSignedInUsersIds",
            Self::NotifyNewMessage => "notifyNewMessage",
            Self::NewMessagesArrived => "newMessagesArrived",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn empty_payload() -> Value {
    Value::String(String::new())
}

/// A single decoded wire message.
///
/// Envelopes are transient: constructed per message, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    /// The event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// The untyped payload. Defaults to `""` when the sender omits it.
    pub payload: Value,
}

/// Decode-side shape of an envelope: the `type` field stays a raw string so
/// unknown kinds can be reported by name instead of as a parse failure.
#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default = "empty_payload")]
    payload: Value,
}

impl Envelope {
    /// Creates an envelope with an explicit payload.
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    /// Creates an envelope with the conventional empty-string payload.
    pub fn empty(kind: EventKind) -> Self {
        Self {
            kind,
            payload: empty_payload(),
        }
    }

    /// Serializes the envelope to its wire text form.
    pub fn encode(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses an envelope from its wire text form.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::UnknownKind`] for a structurally valid envelope
    /// whose `type` string is not a known kind, and
    /// [`ProtoError::Serialization`] for anything that is not an envelope
    /// at all.
    pub fn decode(text: &str) -> Result<Self, ProtoError> {
        let wire: WireEnvelope = serde_json::from_str(text)?;
        let kind = EventKind::from_wire(&wire.kind)
            .ok_or(ProtoError::UnknownKind(wire.kind))?;
        Ok(Self {
            kind,
            payload: wire.payload,
        })
    }

    /// Extracts the payload as a typed value.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProtoError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Payload of a `signIn` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignInPayload {
    #[serde(rename = "userId")]
    pub user_id: i64,
    pub signature: String,
}

/// Payload of a `signOut` request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignOutPayload {
    pub id: i64,
}

/// Payload of a `notifyNewMessage` request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NotifyNewMessagePayload {
    #[serde(rename = "receiverId")]
    pub receiver_id: i64,
    #[serde(rename = "senderId")]
    pub sender_id: i64,
}

/// Payload of a `newMessagesArrived` notification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NewMessagesArrivedPayload {
    #[serde(rename = "senderId")]
    pub sender_id: i64,
}
