//! Inbound message dispatch: decodes one text frame and applies it to the
//! session.

use helix_events::protocol::message_types;
use helix_events::{ClientMessage, ServerMessage, Subscription, parse_event_types};
use tracing::{debug, instrument, warn};

use crate::session::Session;

/// Result of handling one inbound message.
#[derive(Debug)]
pub struct HandleResult {
    /// Message type, or `"invalid"` when decoding failed.
    pub kind: &'static str,
    /// Reply to queue for the client.
    pub reply: ServerMessage,
}

/// Decode `text` and apply it to `session`.
///
/// Undecodable input gets an `error` reply; the connection stays open.
#[instrument(skip_all, fields(session_id = %session.id(), kind))]
pub fn handle_message(session: &Session, text: &str) -> HandleResult {
    let message = match ClientMessage::decode(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "rejected client message");
            return HandleResult {
                kind: "invalid",
                reply: ServerMessage::error(e.to_string()),
            };
        }
    };
    let kind = message.kind();
    let _ = tracing::Span::current().record("kind", kind);

    let reply = match message {
        ClientMessage::Subscribe(request) => match Subscription::try_from(request) {
            Ok(subscription) => {
                debug!(
                    event_types = subscription.event_types.len(),
                    entity_types = subscription.entity_types.len(),
                    entity_ids = subscription.entity_ids.len(),
                    "subscription updated"
                );
                session.subscribe(subscription);
                ServerMessage::ack(message_types::SUBSCRIBE, "Subscription updated")
            }
            Err(e) => ServerMessage::error(e.to_string()),
        },
        ClientMessage::Unsubscribe(request) => match parse_event_types(&request.event_types) {
            Ok(types) => {
                session.unsubscribe(&types);
                ServerMessage::ack(message_types::UNSUBSCRIBE, "Unsubscribed")
            }
            Err(e) => ServerMessage::error(e.to_string()),
        },
        ClientMessage::Ping => {
            session.mark_keepalive();
            ServerMessage::pong()
        }
    };
    HandleResult { kind, reply }
}
