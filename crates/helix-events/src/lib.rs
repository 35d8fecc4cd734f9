//! # helix-events
//!
//! Pure data for the realtime hub:
//!
//! - [`Event`] envelope with the fixed [`EventType`] catalogue and [`EventContext`]
//! - [`Subscription`] interest filters and the matcher
//! - Wire protocol: [`ClientMessage`] in, [`ServerMessage`] out

#![deny(unsafe_code)]

pub mod event;
pub mod protocol;
pub mod subscription;

pub use event::{Event, EventContext, EventType, UnknownEventType, actions};
pub use protocol::{ClientMessage, Envelope, ProtocolError, ServerMessage, SubscriptionRequest};
pub use subscription::{Subscription, parse_event_types};
