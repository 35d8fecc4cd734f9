//! Session identity and token validation.
//!
//! The hub never inspects tokens itself; it asks a [`TokenValidator`] and
//! caches the returned [`IdentityClaims`] on the session for local
//! permission checks.

use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use helix_core::PermissionLevel;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::errors::AuthError;

/// Username given to sessions opened without a token.
pub const ANONYMOUS: &str = "anonymous";

// ─────────────────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Claims carried by a validated token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Login name.
    pub username: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Role label.
    #[serde(default)]
    pub role: String,
    /// Comma-separated permission levels, e.g. `"READ,CREATE"` or `"5"`.
    #[serde(default)]
    pub permissions: String,
}

impl IdentityClaims {
    /// Highest level named in `permissions`. Unparseable entries are ignored.
    pub fn permission_level(&self) -> Option<PermissionLevel> {
        self.permissions
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .filter_map(|p| p.parse::<PermissionLevel>().ok())
            .max()
    }

    /// Whether the claims grant at least `required`.
    pub fn has_permission(&self, required: PermissionLevel) -> bool {
        self.permission_level()
            .is_some_and(|held| held.satisfies(required))
    }
}

/// Who a session belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Login name, or [`ANONYMOUS`].
    pub username: String,
    /// Validated claims; `None` for anonymous sessions.
    pub claims: Option<IdentityClaims>,
}

impl Identity {
    /// Identity for a session opened without a token.
    pub fn anonymous() -> Self {
        Self {
            username: ANONYMOUS.to_string(),
            claims: None,
        }
    }

    /// Identity from validated claims.
    pub fn from_claims(claims: IdentityClaims) -> Self {
        Self {
            username: claims.username.clone(),
            claims: Some(claims),
        }
    }

    /// Whether the session has no validated claims.
    pub fn is_anonymous(&self) -> bool {
        self.claims.is_none()
    }

    /// Whether the cached claims grant at least `required`.
    pub fn has_permission(&self, required: PermissionLevel) -> bool {
        self.claims
            .as_ref()
            .is_some_and(|c| c.has_permission(required))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validators
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves a bearer token to identity claims.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate `token` and return its claims.
    async fn validate_token(&self, token: &str) -> Result<IdentityClaims, AuthError>;
}

/// HS256 shared-secret JWT validation. `exp` is required.
pub struct JwtTokenValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtTokenValidator {
    /// Validator for tokens signed with `secret`.
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl TokenValidator for JwtTokenValidator {
    async fn validate_token(&self, token: &str) -> Result<IdentityClaims, AuthError> {
        let data = decode::<IdentityClaims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;
        if data.claims.username.is_empty() {
            return Err(AuthError::InvalidToken("token has no username".into()));
        }
        Ok(data.claims)
    }
}

/// Validator used when no secret is configured: every token is rejected.
pub struct UnconfiguredValidator;

#[async_trait]
impl TokenValidator for UnconfiguredValidator {
    async fn validate_token(&self, _token: &str) -> Result<IdentityClaims, AuthError> {
        Err(AuthError::NotConfigured)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token extraction
// ─────────────────────────────────────────────────────────────────────────────

/// Where a handshake token was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenSource {
    /// `?token=` query parameter.
    Query,
    /// `Authorization: Bearer` header.
    Bearer,
    /// First entry of `Sec-WebSocket-Protocol`.
    Protocol,
}

/// Find the handshake token: query parameter, then bearer header, then the
/// first offered subprotocol.
pub fn extract_token(query: Option<&str>, headers: &HeaderMap) -> Option<(String, TokenSource)> {
    if let Some(token) = query.filter(|t| !t.is_empty()) {
        return Some((token.to_string(), TokenSource::Query));
    }
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return Some((token.to_string(), TokenSource::Bearer));
    }
    headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| (t.to_string(), TokenSource::Protocol))
}
