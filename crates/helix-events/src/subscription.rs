//! Per-session interest filters and the matcher.

use std::collections::{BTreeMap, HashSet};

use crate::event::{Event, EventType};
use crate::protocol::{ProtocolError, SubscriptionRequest};

/// Filter-map keys compared against the event context.
pub mod filter_keys {
    /// Matches `context.projectId`.
    pub const PROJECT_ID: &str = "projectId";
    /// Matches `context.organizationId`.
    pub const ORGANIZATION_ID: &str = "organizationId";
    /// Matches `context.teamId`.
    pub const TEAM_ID: &str = "teamId";
    /// Matches `context.accountId`.
    pub const ACCOUNT_ID: &str = "accountId";
    /// Matches the acting username.
    pub const USERNAME: &str = "username";
    /// Matches the originating action.
    pub const ACTION: &str = "action";
}

/// A session's interest filter. Empty sets mean "any".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Subscription {
    /// Event types of interest.
    pub event_types: HashSet<EventType>,
    /// Entity types of interest.
    pub entity_types: HashSet<String>,
    /// Entity IDs of interest.
    pub entity_ids: HashSet<String>,
    /// Attribute filters; unknown keys always pass.
    pub filters: BTreeMap<String, String>,
    /// Deliver `*.read` events too.
    pub include_reads: bool,
}

impl Subscription {
    /// Subscription to exactly the given event types.
    pub fn for_types(types: impl IntoIterator<Item = EventType>) -> Self {
        Self {
            event_types: types.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Whether `event` passes every dimension of this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if !self.entity_types.is_empty() && !self.entity_types.contains(&event.entity_type) {
            return false;
        }
        if !self.entity_ids.is_empty() && !self.entity_ids.contains(&event.entity_id) {
            return false;
        }
        if !self.include_reads && event.event_type.is_read() {
            return false;
        }
        self.filters
            .iter()
            .all(|(key, expected)| filter_passes(event, key, expected))
    }

    /// Apply an `unsubscribe` for `types`.
    ///
    /// Returns `None` (receive nothing) when `types` is empty, when the
    /// current subscription is a wildcard over types, or when no explicit
    /// type remains after removal.
    #[must_use]
    pub fn without_types(mut self, types: &HashSet<EventType>) -> Option<Self> {
        if types.is_empty() || self.event_types.is_empty() {
            return None;
        }
        self.event_types.retain(|t| !types.contains(t));
        (!self.event_types.is_empty()).then_some(self)
    }
}

impl TryFrom<SubscriptionRequest> for Subscription {
    type Error = ProtocolError;

    fn try_from(req: SubscriptionRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            event_types: parse_event_types(&req.event_types)?,
            entity_types: req.entity_types.into_iter().collect(),
            entity_ids: req.entity_ids.into_iter().collect(),
            filters: req.filters,
            include_reads: req.include_reads,
        })
    }
}

/// Parse wire tags into catalogue types, rejecting unknown tags.
pub fn parse_event_types(tags: &[String]) -> Result<HashSet<EventType>, ProtocolError> {
    tags.iter()
        .map(|t| t.parse::<EventType>().map_err(ProtocolError::from))
        .collect()
}

fn filter_passes(event: &Event, key: &str, expected: &str) -> bool {
    let actual = match key {
        filter_keys::PROJECT_ID => event.context.project_id.as_deref(),
        filter_keys::ORGANIZATION_ID => event.context.organization_id.as_deref(),
        filter_keys::TEAM_ID => event.context.team_id.as_deref(),
        filter_keys::ACCOUNT_ID => event.context.account_id.as_deref(),
        filter_keys::USERNAME => Some(event.username.as_str()),
        filter_keys::ACTION => Some(event.action.as_str()),
        _ => return true,
    };
    actual.unwrap_or_default() == expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventContext;
    use assert_matches::assert_matches;

    fn ticket_created(id: &str) -> Event {
        Event::new(EventType::TicketCreated, "create", "ticket", id, "alice")
    }

    fn set<T: std::hash::Hash + Eq>(items: impl IntoIterator<Item = T>) -> HashSet<T> {
        items.into_iter().collect()
    }

    #[test]
    fn empty_subscription_matches_everything_but_reads() {
        let sub = Subscription::default();
        assert!(sub.matches(&ticket_created("T1")));
        let read = Event::new(EventType::TicketRead, "read", "ticket", "T1", "alice");
        assert!(!sub.matches(&read));
    }

    #[test]
    fn include_reads_admits_read_events() {
        let sub = Subscription {
            include_reads: true,
            ..Subscription::default()
        };
        let read = Event::new(EventType::ProjectRead, "read", "project", "P1", "bob");
        assert!(sub.matches(&read));
    }

    #[test]
    fn type_filter() {
        let sub = Subscription::for_types([EventType::TicketCreated]);
        assert!(sub.matches(&ticket_created("T1")));
        let other = Event::new(EventType::PriorityCreated, "create", "priority", "PR1", "alice");
        assert!(!sub.matches(&other));
    }

    #[test]
    fn entity_type_and_id_filters() {
        let sub = Subscription {
            entity_types: set(["ticket".to_string()]),
            entity_ids: set(["T1".to_string()]),
            ..Subscription::default()
        };
        assert!(sub.matches(&ticket_created("T1")));
        assert!(!sub.matches(&ticket_created("T2")));
        let project = Event::new(EventType::ProjectCreated, "create", "project", "T1", "alice");
        assert!(!sub.matches(&project));
    }

    #[test]
    fn context_filters() {
        let mut filters = BTreeMap::new();
        let _ = filters.insert("projectId".to_string(), "P1".to_string());
        let sub = Subscription {
            filters,
            ..Subscription::default()
        };
        let in_scope = ticket_created("T1").with_context(EventContext::project("P1", vec![]));
        let out_of_scope = ticket_created("T2").with_context(EventContext::project("P2", vec![]));
        let unscoped = ticket_created("T3");
        assert!(sub.matches(&in_scope));
        assert!(!sub.matches(&out_of_scope));
        assert!(!sub.matches(&unscoped));
    }

    #[test]
    fn username_and_action_filters() {
        let mut filters = BTreeMap::new();
        let _ = filters.insert("username".to_string(), "alice".to_string());
        let _ = filters.insert("action".to_string(), "create".to_string());
        let sub = Subscription {
            filters,
            ..Subscription::default()
        };
        assert!(sub.matches(&ticket_created("T1")));
        let by_bob = Event::new(EventType::TicketCreated, "create", "ticket", "T1", "bob");
        assert!(!sub.matches(&by_bob));
    }

    #[test]
    fn unknown_filter_keys_pass() {
        let mut filters = BTreeMap::new();
        let _ = filters.insert("colour".to_string(), "blue".to_string());
        let sub = Subscription {
            filters,
            ..Subscription::default()
        };
        assert!(sub.matches(&ticket_created("T1")));
    }

    #[test]
    fn from_request_parses_types() {
        let req = SubscriptionRequest {
            event_types: vec!["ticket.created".into(), "priority.created".into()],
            entity_ids: vec!["T1".into()],
            ..SubscriptionRequest::default()
        };
        let sub = Subscription::try_from(req).unwrap();
        assert_eq!(
            sub.event_types,
            set([EventType::TicketCreated, EventType::PriorityCreated])
        );
        assert!(sub.entity_ids.contains("T1"));
    }

    #[test]
    fn from_request_rejects_unknown_type() {
        let req = SubscriptionRequest {
            event_types: vec!["ticket.melted".into()],
            ..SubscriptionRequest::default()
        };
        assert_matches!(
            Subscription::try_from(req),
            Err(ProtocolError::UnknownEventType(_))
        );
    }

    #[test]
    fn unsubscribe_empty_clears() {
        let sub = Subscription::for_types([EventType::TicketCreated]);
        assert_eq!(sub.without_types(&HashSet::new()), None);
    }

    #[test]
    fn unsubscribe_removes_listed_types() {
        let sub = Subscription::for_types([EventType::TicketCreated, EventType::TicketUpdated]);
        let left = sub
            .without_types(&set([EventType::TicketCreated]))
            .unwrap();
        assert_eq!(left.event_types, set([EventType::TicketUpdated]));
    }

    #[test]
    fn unsubscribe_last_type_clears() {
        let sub = Subscription::for_types([EventType::TicketCreated]);
        assert_eq!(sub.without_types(&set([EventType::TicketCreated])), None);
    }

    #[test]
    fn unsubscribe_from_wildcard_clears() {
        let sub = Subscription::default();
        assert_eq!(sub.without_types(&set([EventType::TicketCreated])), None);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;
        use proptest::sample::select;

        fn event_type() -> impl Strategy<Value = EventType> {
            select(EventType::ALL)
        }

        proptest! {
            #[test]
            fn type_set_membership_decides(
                subscribed in proptest::collection::hash_set(event_type(), 1..6),
                published in event_type(),
            ) {
                let sub = Subscription {
                    event_types: subscribed.clone(),
                    include_reads: true,
                    ..Subscription::default()
                };
                let event = Event::new(published, "create", "ticket", "T1", "alice");
                prop_assert_eq!(sub.matches(&event), subscribed.contains(&published));
            }

            #[test]
            fn removed_types_never_match(
                subscribed in proptest::collection::hash_set(event_type(), 1..6),
                removed in proptest::collection::hash_set(event_type(), 1..6),
            ) {
                let sub = Subscription {
                    event_types: subscribed,
                    include_reads: true,
                    ..Subscription::default()
                };
                if let Some(left) = sub.without_types(&removed) {
                    for ty in &removed {
                        let event = Event::new(*ty, "create", "ticket", "T1", "alice");
                        prop_assert!(!left.matches(&event));
                    }
                }
            }
        }
    }
}
