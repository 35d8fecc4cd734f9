//! # helix-core
//!
//! Foundation types shared by every Helix hub crate:
//!
//! - **Branded IDs**: `SessionId`, `EventId` as newtypes over UUID v7 strings
//! - **Permissions**: [`PermissionLevel`] with the tracker's numeric levels
//! - **Errors**: machine-readable [`ApiErrorCode`] and the JSON error body
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` stack

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod permissions;

pub use errors::{ApiError, ApiErrorCode, ErrorBody};
pub use ids::{EventId, SessionId};
pub use permissions::{ParsePermissionError, PermissionLevel};
