//! The broadcast event envelope and its fixed type catalogue.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use helix_core::EventId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// CRUD action names as emitted by the tracker's entity handlers.
pub mod actions {
    /// Entity created.
    pub const CREATE: &str = "create";
    /// Entity modified.
    pub const MODIFY: &str = "modify";
    /// Entity removed.
    pub const REMOVE: &str = "remove";
    /// Entity read.
    pub const READ: &str = "read";
    /// Session connected to the hub.
    pub const CONNECT: &str = "connect";
}

/// An event type tag outside the catalogue.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

macro_rules! event_types {
    ($( $variant:ident => $tag:literal, )*) => {
        /// Fixed catalogue of `<entity>.<verb>` event tags.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EventType {
            $(
                #[doc = concat!("`", $tag, "`")]
                $variant,
            )*
        }

        impl EventType {
            /// Every tag in the catalogue.
            pub const ALL: &'static [EventType] = &[$(EventType::$variant,)*];

            /// Wire spelling, e.g. `"ticket.created"`.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $tag,)*
                }
            }
        }

        impl FromStr for EventType {
            type Err = UnknownEventType;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($tag => Ok(Self::$variant),)*
                    _ => Err(UnknownEventType(s.to_owned())),
                }
            }
        }
    };
}

event_types! {
    EntityCreated => "entity.created",
    EntityUpdated => "entity.updated",
    EntityDeleted => "entity.deleted",
    EntityRead => "entity.read",

    TicketCreated => "ticket.created",
    TicketUpdated => "ticket.updated",
    TicketDeleted => "ticket.deleted",
    TicketRead => "ticket.read",

    ProjectCreated => "project.created",
    ProjectUpdated => "project.updated",
    ProjectDeleted => "project.deleted",
    ProjectRead => "project.read",

    CommentCreated => "comment.created",
    CommentUpdated => "comment.updated",
    CommentDeleted => "comment.deleted",
    CommentRead => "comment.read",

    PriorityCreated => "priority.created",
    PriorityUpdated => "priority.updated",
    PriorityDeleted => "priority.deleted",
    PriorityRead => "priority.read",

    ResolutionCreated => "resolution.created",
    ResolutionUpdated => "resolution.updated",
    ResolutionDeleted => "resolution.deleted",
    ResolutionRead => "resolution.read",

    VersionCreated => "version.created",
    VersionUpdated => "version.updated",
    VersionDeleted => "version.deleted",
    VersionRead => "version.read",
    VersionReleased => "version.released",
    VersionArchived => "version.archived",

    WatcherAdded => "watcher.added",
    WatcherRemoved => "watcher.removed",

    FilterSaved => "filter.saved",
    FilterUpdated => "filter.updated",
    FilterDeleted => "filter.deleted",
    FilterShared => "filter.shared",

    CustomFieldCreated => "customfield.created",
    CustomFieldUpdated => "customfield.updated",
    CustomFieldDeleted => "customfield.deleted",
    CustomFieldRead => "customfield.read",

    BoardCreated => "board.created",
    BoardUpdated => "board.updated",
    BoardDeleted => "board.deleted",

    CycleCreated => "cycle.created",
    CycleUpdated => "cycle.updated",
    CycleDeleted => "cycle.deleted",

    WorkflowCreated => "workflow.created",
    WorkflowUpdated => "workflow.updated",
    WorkflowDeleted => "workflow.deleted",

    AccountCreated => "account.created",
    AccountUpdated => "account.updated",
    AccountDeleted => "account.deleted",

    OrganizationCreated => "organization.created",
    OrganizationUpdated => "organization.updated",
    OrganizationDeleted => "organization.deleted",

    TeamCreated => "team.created",
    TeamUpdated => "team.updated",
    TeamDeleted => "team.deleted",

    UserCreated => "user.created",
    UserUpdated => "user.updated",
    UserDeleted => "user.deleted",

    SystemHealthCheck => "system.health_check",
    SystemError => "system.error",
    SystemShutdown => "system.shutdown",

    ConnectionEstablished => "connection.established",
    ConnectionClosed => "connection.closed",
    ConnectionError => "connection.error",
}

impl EventType {
    /// Whether this is one of the `*.read` tags, which subscribers only
    /// receive when they opt in with `includeReads`.
    pub fn is_read(self) -> bool {
        matches!(
            self,
            Self::EntityRead
                | Self::TicketRead
                | Self::ProjectRead
                | Self::CommentRead
                | Self::PriorityRead
                | Self::ResolutionRead
                | Self::VersionRead
                | Self::CustomFieldRead
        )
    }

    /// Derive the tag for a CRUD `action` on `entity_type`.
    ///
    /// Entity types without a dedicated tag fall back to `entity.*`; an
    /// unknown action yields `entity.created`. Creating a filter is
    /// `filter.saved`. Only entities with a read tag get one; every other
    /// read is `entity.read`.
    pub fn from_action(action: &str, entity_type: &str) -> Self {
        match action {
            actions::CREATE => Self::created(entity_type),
            actions::MODIFY => Self::updated(entity_type),
            actions::REMOVE => Self::deleted(entity_type),
            actions::READ => Self::read(entity_type),
            _ => Self::EntityCreated,
        }
    }

    fn created(entity_type: &str) -> Self {
        match entity_type {
            "ticket" => Self::TicketCreated,
            "project" => Self::ProjectCreated,
            "comment" => Self::CommentCreated,
            "priority" => Self::PriorityCreated,
            "resolution" => Self::ResolutionCreated,
            "version" => Self::VersionCreated,
            "filter" => Self::FilterSaved,
            "customfield" => Self::CustomFieldCreated,
            "board" => Self::BoardCreated,
            "cycle" => Self::CycleCreated,
            "workflow" => Self::WorkflowCreated,
            "account" => Self::AccountCreated,
            "organization" => Self::OrganizationCreated,
            "team" => Self::TeamCreated,
            "user" => Self::UserCreated,
            _ => Self::EntityCreated,
        }
    }

    fn updated(entity_type: &str) -> Self {
        match entity_type {
            "ticket" => Self::TicketUpdated,
            "project" => Self::ProjectUpdated,
            "comment" => Self::CommentUpdated,
            "priority" => Self::PriorityUpdated,
            "resolution" => Self::ResolutionUpdated,
            "version" => Self::VersionUpdated,
            "filter" => Self::FilterUpdated,
            "customfield" => Self::CustomFieldUpdated,
            "board" => Self::BoardUpdated,
            "cycle" => Self::CycleUpdated,
            "workflow" => Self::WorkflowUpdated,
            "account" => Self::AccountUpdated,
            "organization" => Self::OrganizationUpdated,
            "team" => Self::TeamUpdated,
            "user" => Self::UserUpdated,
            _ => Self::EntityUpdated,
        }
    }

    fn deleted(entity_type: &str) -> Self {
        match entity_type {
            "ticket" => Self::TicketDeleted,
            "project" => Self::ProjectDeleted,
            "comment" => Self::CommentDeleted,
            "priority" => Self::PriorityDeleted,
            "resolution" => Self::ResolutionDeleted,
            "version" => Self::VersionDeleted,
            "filter" => Self::FilterDeleted,
            "customfield" => Self::CustomFieldDeleted,
            "board" => Self::BoardDeleted,
            "cycle" => Self::CycleDeleted,
            "workflow" => Self::WorkflowDeleted,
            "account" => Self::AccountDeleted,
            "organization" => Self::OrganizationDeleted,
            "team" => Self::TeamDeleted,
            "user" => Self::UserDeleted,
            _ => Self::EntityDeleted,
        }
    }

    fn read(entity_type: &str) -> Self {
        match entity_type {
            "ticket" => Self::TicketRead,
            "project" => Self::ProjectRead,
            "comment" => Self::CommentRead,
            "priority" => Self::PriorityRead,
            "resolution" => Self::ResolutionRead,
            "version" => Self::VersionRead,
            "customfield" => Self::CustomFieldRead,
            _ => Self::EntityRead,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Context
// ─────────────────────────────────────────────────────────────────────────────

/// Scope and permission requirements attached to an event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    /// Owning project, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Owning organization, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    /// Owning team, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    /// Owning account, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Permission levels a session must hold to see the event.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

impl EventContext {
    /// Context for a project-scoped event.
    pub fn project(project_id: impl Into<String>, permissions: Vec<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            permissions,
            ..Self::default()
        }
    }

    /// Context for an organization-scoped event.
    pub fn organization(organization_id: impl Into<String>, permissions: Vec<String>) -> Self {
        Self {
            organization_id: Some(organization_id.into()),
            permissions,
            ..Self::default()
        }
    }

    /// Context for a team event; teams always belong to an organization.
    pub fn team(
        team_id: impl Into<String>,
        organization_id: impl Into<String>,
        permissions: Vec<String>,
    ) -> Self {
        Self {
            team_id: Some(team_id.into()),
            organization_id: Some(organization_id.into()),
            permissions,
            ..Self::default()
        }
    }

    /// Context for an account-scoped event.
    pub fn account(account_id: impl Into<String>, permissions: Vec<String>) -> Self {
        Self {
            account_id: Some(account_id.into()),
            permissions,
            ..Self::default()
        }
    }

    /// Context with every scope set. Empty strings are treated as unset.
    pub fn full(
        project_id: &str,
        organization_id: &str,
        team_id: &str,
        account_id: &str,
        permissions: Vec<String>,
    ) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_owned());
        Self {
            project_id: non_empty(project_id),
            organization_id: non_empty(organization_id),
            team_id: non_empty(team_id),
            account_id: non_empty(account_id),
            permissions,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event
// ─────────────────────────────────────────────────────────────────────────────

/// An immutable notification of a domain state change.
///
/// Built once by the publisher and shared behind an `Arc` during fan-out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event ID.
    pub id: EventId,
    /// Catalogue tag, e.g. `ticket.created`.
    pub event_type: EventType,
    /// Originating CRUD action.
    pub action: String,
    /// Target entity type (`ticket`, `project`, ...).
    pub entity_type: String,
    /// Target entity ID.
    pub entity_id: String,
    /// Acting user.
    pub username: String,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Opaque payload supplied by the publisher.
    #[serde(default)]
    pub payload: Value,
    /// Scope and permission requirements.
    #[serde(default)]
    pub context: EventContext,
}

impl Event {
    /// Create an event with a fresh ID, the current time, no payload and an
    /// empty context.
    pub fn new(
        event_type: EventType,
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            username: username.into(),
            timestamp: Utc::now(),
            payload: Value::Null,
            context: EventContext::default(),
        }
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Attach a context.
    #[must_use]
    pub fn with_context(mut self, context: EventContext) -> Self {
        self.context = context;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn tags_parse_back() {
        for ty in EventType::ALL {
            assert_eq!(ty.as_str().parse::<EventType>(), Ok(*ty));
        }
    }

    #[test]
    fn tags_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for ty in EventType::ALL {
            assert!(seen.insert(ty.as_str()), "duplicate tag {ty}");
        }
    }

    #[test]
    fn unknown_tag_rejected() {
        assert_matches!("ticket.exploded".parse::<EventType>(), Err(UnknownEventType(t)) if t == "ticket.exploded");
    }

    #[test]
    fn read_tags() {
        let reads: Vec<_> = EventType::ALL.iter().filter(|t| t.is_read()).collect();
        assert_eq!(reads.len(), 8);
        assert!(reads.iter().all(|t| t.as_str().ends_with(".read")));
        assert!(!EventType::TicketCreated.is_read());
    }

    #[test]
    fn from_action_known_entities() {
        assert_eq!(EventType::from_action("create", "ticket"), EventType::TicketCreated);
        assert_eq!(EventType::from_action("modify", "priority"), EventType::PriorityUpdated);
        assert_eq!(EventType::from_action("remove", "team"), EventType::TeamDeleted);
        assert_eq!(EventType::from_action("read", "comment"), EventType::CommentRead);
    }

    #[test]
    fn from_action_fallbacks() {
        assert_eq!(EventType::from_action("create", "label"), EventType::EntityCreated);
        assert_eq!(EventType::from_action("modify", "label"), EventType::EntityUpdated);
        assert_eq!(EventType::from_action("remove", "label"), EventType::EntityDeleted);
        assert_eq!(EventType::from_action("archive", "ticket"), EventType::EntityCreated);
    }

    #[test]
    fn creating_a_filter_saves_it() {
        assert_eq!(EventType::from_action("create", "filter"), EventType::FilterSaved);
    }

    #[test]
    fn read_without_dedicated_tag() {
        assert_eq!(EventType::from_action("read", "board"), EventType::EntityRead);
        assert_eq!(EventType::from_action("read", "user"), EventType::EntityRead);
        assert_eq!(EventType::from_action("read", "customfield"), EventType::CustomFieldRead);
    }

    #[test]
    fn event_json_shape() {
        let event = Event::new(EventType::TicketCreated, "create", "ticket", "T1", "alice")
            .with_payload(json!({"title": "Broken login"}))
            .with_context(EventContext::project("P1", vec!["READ".into()]));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["eventType"], "ticket.created");
        assert_eq!(value["entityType"], "ticket");
        assert_eq!(value["entityId"], "T1");
        assert_eq!(value["username"], "alice");
        assert_eq!(value["payload"]["title"], "Broken login");
        assert_eq!(value["context"]["projectId"], "P1");
        assert_eq!(value["context"]["permissions"], json!(["READ"]));
        assert!(value["context"].get("teamId").is_none());
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn team_context_carries_organization() {
        let ctx = EventContext::team("T9", "O1", vec![]);
        assert_eq!(ctx.team_id.as_deref(), Some("T9"));
        assert_eq!(ctx.organization_id.as_deref(), Some("O1"));
        assert!(ctx.project_id.is_none());
    }

    #[test]
    fn full_context_skips_empty() {
        let ctx = EventContext::full("P1", "", "T1", "", vec!["ALL".into()]);
        assert_eq!(ctx.project_id.as_deref(), Some("P1"));
        assert!(ctx.organization_id.is_none());
        assert_eq!(ctx.team_id.as_deref(), Some("T1"));
        assert!(ctx.account_id.is_none());
        assert_eq!(ctx.permissions, vec!["ALL".to_string()]);
    }

    #[test]
    fn account_and_organization_contexts() {
        assert_eq!(EventContext::account("A1", vec![]).account_id.as_deref(), Some("A1"));
        assert_eq!(
            EventContext::organization("O1", vec![]).organization_id.as_deref(),
            Some("O1")
        );
    }
}
