//! Per-session permission filtering of broadcast events.
//!
//! Local claims are checked first; an enabled [`PermissionChecker`] then gets
//! the final word. Every required level is checked concurrently under one
//! deadline. Any checker error or timeout denies the event.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use helix_core::PermissionLevel;
use helix_events::Event;
use tracing::warn;

use crate::auth::Identity;
use crate::errors::PermissionCheckError;

/// External permission-evaluation service.
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// Whether live checks should be made at all.
    fn is_enabled(&self) -> bool;

    /// Whether `username` holds `level` on `resource`.
    async fn check_permission(
        &self,
        username: &str,
        resource: &str,
        level: PermissionLevel,
    ) -> Result<bool, PermissionCheckError>;
}

/// Outcome of evaluating one session against one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Deliver.
    Allow,
    /// Do not deliver.
    Deny,
    /// The external check failed; do not deliver and count an error.
    Error,
}

impl Verdict {
    /// Whether the event may be delivered.
    pub fn allowed(self) -> bool {
        self == Self::Allow
    }
}

/// Decides whether a session may see an event.
#[derive(Clone)]
pub struct PermissionFilter {
    checker: Option<Arc<dyn PermissionChecker>>,
    timeout: Duration,
}

impl PermissionFilter {
    /// Filter using only locally cached claims.
    pub fn local(timeout: Duration) -> Self {
        Self {
            checker: None,
            timeout,
        }
    }

    /// Filter that also consults `checker` when it is enabled.
    pub fn with_checker(checker: Arc<dyn PermissionChecker>, timeout: Duration) -> Self {
        Self {
            checker: Some(checker),
            timeout,
        }
    }

    /// Evaluate `identity` against the permissions `event` requires.
    pub async fn evaluate(&self, identity: &Identity, event: &Event) -> Verdict {
        let required = &event.context.permissions;
        if required.is_empty() {
            return Verdict::Allow;
        }

        let mut levels = Vec::with_capacity(required.len());
        for raw in required {
            match raw.parse::<PermissionLevel>() {
                Ok(level) => levels.push(level),
                Err(_) => return Verdict::Deny,
            }
        }
        if !levels.iter().all(|level| identity.has_permission(*level)) {
            return Verdict::Deny;
        }

        let Some(checker) = self.checker.as_ref().filter(|c| c.is_enabled()) else {
            return Verdict::Allow;
        };
        let checks = levels
            .iter()
            .map(|level| checker.check_permission(&identity.username, &event.entity_type, *level));
        match tokio::time::timeout(self.timeout, try_join_all(checks)).await {
            Ok(Ok(answers)) if answers.iter().all(|granted| *granted) => Verdict::Allow,
            Ok(Ok(_)) => Verdict::Deny,
            Ok(Err(e)) => {
                warn!(username = %identity.username, entity_type = %event.entity_type, error = %e, "permission check failed");
                Verdict::Error
            }
            Err(_) => {
                warn!(username = %identity.username, entity_type = %event.entity_type, "permission check timed out");
                Verdict::Error
            }
        }
    }
}
