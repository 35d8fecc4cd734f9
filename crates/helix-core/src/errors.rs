//! HTTP-facing error codes and the JSON error body.
//!
//! Every rejection the hub answers over plain HTTP (before a `WebSocket`
//! exists) carries `{"error": {"code": "...", "message": "..."}}`.

use serde::{Deserialize, Serialize};
use std::fmt;

// ─────────────────────────────────────────────────────────────────────────────
// Error codes
// ─────────────────────────────────────────────────────────────────────────────

/// Machine-readable rejection codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiErrorCode {
    /// Authentication required but no token supplied.
    #[serde(rename = "MISSING_TOKEN")]
    MissingToken,
    /// Token supplied but rejected by the validator.
    #[serde(rename = "INVALID_TOKEN")]
    InvalidToken,
    /// `Origin` header not in the allow list.
    #[serde(rename = "ORIGIN_NOT_ALLOWED")]
    OriginNotAllowed,
    /// Hub disabled or not running.
    #[serde(rename = "SERVICE_UNAVAILABLE")]
    ServiceUnavailable,
}

impl ApiErrorCode {
    /// Wire spelling of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingToken => "MISSING_TOKEN",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::OriginNotAllowed => "ORIGIN_NOT_ALLOWED",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }
}

impl fmt::Display for ApiErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error body
// ─────────────────────────────────────────────────────────────────────────────

/// A coded rejection with a human-readable message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Machine-readable error code.
    pub code: ApiErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ApiError {
    /// Create a new error.
    #[must_use]
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Wrap into the top-level response body.
    #[must_use]
    pub fn into_body(self) -> ErrorBody {
        ErrorBody { error: self }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Top-level JSON body: `{"error": {...}}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// The wrapped error.
    pub error: ApiError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_display_matches_serde() {
        for code in [
            ApiErrorCode::MissingToken,
            ApiErrorCode::InvalidToken,
            ApiErrorCode::OriginNotAllowed,
            ApiErrorCode::ServiceUnavailable,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json.trim_matches('"'), code.to_string());
        }
    }

    #[test]
    fn body_shape() {
        let body = ApiError::new(ApiErrorCode::MissingToken, "authentication required").into_body();
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["error"]["code"], "MISSING_TOKEN");
        assert_eq!(value["error"]["message"], "authentication required");
    }

    #[test]
    fn error_display() {
        let err = ApiError::new(ApiErrorCode::InvalidToken, "expired");
        assert_eq!(err.to_string(), "[INVALID_TOKEN] expired");
    }
}
