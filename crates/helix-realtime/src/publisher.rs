//! Publish-side API for the rest of the process.
//!
//! Handlers that mutate entities call [`Publisher::publish_entity_event`]
//! after the change is committed. When the realtime hub is disabled the
//! [`Publisher::Disabled`] variant accepts everything and does nothing.

use helix_events::{Event, EventContext, EventType};
use serde_json::Value;
use tracing::debug;

use crate::errors::HubError;
use crate::hub::Hub;

/// Event publisher.
#[derive(Clone)]
pub enum Publisher {
    /// Forwards to a running hub.
    Live(Hub),
    /// Realtime delivery is turned off.
    Disabled,
}

impl Publisher {
    /// Publisher for `hub`, or the disabled variant when the hub's config
    /// turns realtime delivery off.
    pub fn for_hub(hub: &Hub) -> Self {
        if hub.config().enabled {
            Self::Live(hub.clone())
        } else {
            Self::Disabled
        }
    }

    /// Whether published events go anywhere.
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Live(_))
    }

    /// Publish a pre-built event.
    pub async fn publish_event(&self, event: Event) -> Result<(), HubError> {
        let Self::Live(hub) = self else {
            return Ok(());
        };
        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            action = %event.action,
            entity_type = %event.entity_type,
            entity_id = %event.entity_id,
            username = %event.username,
            "publishing event"
        );
        hub.broadcast(event).await
    }

    /// Publish the event for a CRUD `action` on an entity. The event type is
    /// derived from `action` and `entity_type`.
    pub async fn publish_entity_event(
        &self,
        action: &str,
        entity_type: &str,
        entity_id: &str,
        username: &str,
        payload: Value,
        context: EventContext,
    ) -> Result<(), HubError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let event = Event::new(
            EventType::from_action(action, entity_type),
            action,
            entity_type,
            entity_id,
            username,
        )
        .with_payload(payload)
        .with_context(context);
        self.publish_event(event).await
    }
}
