//! Wire protocol between hub and clients.
//!
//! Every frame is a JSON envelope `{"type": ..., "action"?: ..., "data": {...}}`.
//! Incoming frames decode in two steps: the loose [`Envelope`] first, then
//! the typed [`ClientMessage`] selected by `type`. Outgoing frames are
//! [`ServerMessage`] values serialized straight into the same envelope shape.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::event::{Event, UnknownEventType};

/// Client message type tags.
pub mod message_types {
    /// Replace the session's subscription.
    pub const SUBSCRIBE: &str = "subscribe";
    /// Narrow or clear the session's subscription.
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    /// Application-level keepalive.
    pub const PING: &str = "ping";
}

/// Reasons an incoming frame is rejected.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not JSON, or not an envelope.
    #[error("invalid message format: {0}")]
    Malformed(#[source] serde_json::Error),
    /// Envelope `type` outside the client vocabulary.
    #[error("unknown message type: {0}")]
    UnknownType(String),
    /// Payload does not fit the message type.
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        /// Message type whose payload failed.
        kind: &'static str,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
    /// Subscription names an event type outside the catalogue.
    #[error(transparent)]
    UnknownEventType(#[from] UnknownEventType),
}

// ─────────────────────────────────────────────────────────────────────────────
// Client → server
// ─────────────────────────────────────────────────────────────────────────────

/// Loosely typed envelope, the first decoding step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional action qualifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Type-specific payload.
    #[serde(default)]
    pub data: Value,
}

/// Payload of `subscribe` and `unsubscribe`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionRequest {
    /// Event type tags of interest; empty means all.
    pub event_types: Vec<String>,
    /// Entity types of interest; empty means all.
    pub entity_types: Vec<String>,
    /// Entity IDs of interest; empty means all.
    pub entity_ids: Vec<String>,
    /// Attribute filters (`projectId`, `teamId`, ...).
    pub filters: BTreeMap<String, String>,
    /// Deliver `*.read` events too.
    pub include_reads: bool,
}

impl SubscriptionRequest {
    fn from_data(kind: &'static str, data: Value) -> Result<Self, ProtocolError> {
        if data.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(data).map_err(|source| ProtocolError::InvalidPayload { kind, source })
    }
}

/// A decoded client message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    /// Replace the current subscription wholesale.
    Subscribe(SubscriptionRequest),
    /// Drop the listed event types, or everything when none are listed.
    Unsubscribe(SubscriptionRequest),
    /// Keepalive; answered with `pong`.
    Ping,
}

impl ClientMessage {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
        match envelope.kind.as_str() {
            message_types::SUBSCRIBE => Ok(Self::Subscribe(SubscriptionRequest::from_data(
                message_types::SUBSCRIBE,
                envelope.data,
            )?)),
            message_types::UNSUBSCRIBE => Ok(Self::Unsubscribe(SubscriptionRequest::from_data(
                message_types::UNSUBSCRIBE,
                envelope.data,
            )?)),
            message_types::PING => Ok(Self::Ping),
            _ => Err(ProtocolError::UnknownType(envelope.kind)),
        }
    }

    /// Tag of this message, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => message_types::SUBSCRIBE,
            Self::Unsubscribe(_) => message_types::UNSUBSCRIBE,
            Self::Ping => message_types::PING,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server → client
// ─────────────────────────────────────────────────────────────────────────────

/// A message the hub sends to a session.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerMessage {
    /// Acknowledges a subscribe/unsubscribe.
    Ack {
        /// The acknowledged message type.
        action: String,
        /// Whether it took effect.
        success: bool,
        /// Human-readable detail.
        message: String,
    },
    /// A broadcast event.
    Event(Arc<Event>),
    /// Reply to a client `ping`.
    Pong {
        /// Server time of the reply.
        time: DateTime<Utc>,
    },
    /// A rejected client message; the connection stays open.
    Error {
        /// What went wrong.
        message: String,
    },
}

impl ServerMessage {
    /// Successful acknowledgement for `action`.
    pub fn ack(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Ack {
            action: action.into(),
            success: true,
            message: message.into(),
        }
    }

    /// Pong stamped with the current time.
    pub fn pong() -> Self {
        Self::Pong { time: Utc::now() }
    }

    /// Error frame.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Serialize)]
struct Outbound<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<&'a str>,
    data: T,
}

#[derive(Serialize)]
struct AckData<'a> {
    success: bool,
    message: &'a str,
}

#[derive(Serialize)]
struct PongData {
    time: DateTime<Utc>,
}

#[derive(Serialize)]
struct ErrorData<'a> {
    message: &'a str,
}

impl Serialize for ServerMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Ack {
                action,
                success,
                message,
            } => Outbound {
                kind: "ack",
                action: Some(action.as_str()),
                data: AckData {
                    success: *success,
                    message,
                },
            }
            .serialize(serializer),
            Self::Event(event) => Outbound {
                kind: "event",
                action: Some(event.action.as_str()),
                data: &**event,
            }
            .serialize(serializer),
            Self::Pong { time } => Outbound {
                kind: "pong",
                action: Some("pong"),
                data: PongData { time: *time },
            }
            .serialize(serializer),
            Self::Error { message } => Outbound {
                kind: "error",
                action: None,
                data: ErrorData { message },
            }
            .serialize(serializer),
        }
    }
}
