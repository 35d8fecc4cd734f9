//! Handshake: availability, origin and identity checks, then upgrade.

use std::sync::Arc;

use axum::Json;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use helix_core::{ApiError, ApiErrorCode};
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::session::{SessionTiming, run_session};
use crate::auth::{Identity, TokenSource, TokenValidator, extract_token};
use crate::config::HubConfig;
use crate::errors::{AuthError, HubError};
use crate::hub::Hub;
use crate::metrics::WS_HANDSHAKE_REJECTIONS_TOTAL;
use crate::server::AppState;
use crate::session::CloseReason;

/// Query string accepted on the upgrade path.
#[derive(Debug, Default, Deserialize)]
pub struct UpgradeQuery {
    /// Handshake token.
    pub token: Option<String>,
}

/// `GET {path}`: validate the handshake and upgrade.
#[instrument(skip_all)]
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<UpgradeQuery>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let config = state.hub.config();
    if !config.enabled || !state.hub.is_running() {
        return reject(
            StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorCode::ServiceUnavailable,
            "realtime events are not available",
        );
    }

    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !config.origin_allowed(origin) {
        warn!(origin = origin.unwrap_or_default(), "origin not allowed");
        return reject(
            StatusCode::FORBIDDEN,
            ApiErrorCode::OriginNotAllowed,
            "origin not allowed",
        );
    }

    let token = extract_token(query.token.as_deref(), &headers);
    let identity = match authenticate(
        state.validator.as_ref(),
        token.as_ref().map(|(t, _)| t.as_str()),
        config,
    )
    .await
    {
        Ok(identity) => identity,
        Err(AuthError::MissingToken) => {
            return reject(
                StatusCode::UNAUTHORIZED,
                ApiErrorCode::MissingToken,
                AuthError::MissingToken.to_string(),
            );
        }
        Err(e) => {
            warn!(error = %e, "handshake authentication failed");
            return reject(
                StatusCode::UNAUTHORIZED,
                ApiErrorCode::InvalidToken,
                e.to_string(),
            );
        }
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };
    let mut upgrade = upgrade
        .read_buffer_size(config.read_buffer_size)
        .write_buffer_size(config.write_buffer_size)
        .max_message_size(config.max_message_size);
    if let Some((token, TokenSource::Protocol)) = token {
        upgrade = upgrade.protocols([token]);
    }

    debug!(username = %identity.username, "upgrading connection");
    let hub = state.hub.clone();
    upgrade.on_upgrade(move |socket| serve_socket(hub, socket, identity))
}

/// Resolve the session identity.
///
/// A presented token must validate even when authentication is optional;
/// only a missing token falls back to an anonymous identity.
async fn authenticate(
    validator: &dyn TokenValidator,
    token: Option<&str>,
    config: &HubConfig,
) -> Result<Identity, AuthError> {
    let Some(token) = token else {
        return if config.require_auth {
            Err(AuthError::MissingToken)
        } else {
            Ok(Identity::anonymous())
        };
    };
    match tokio::time::timeout(config.handshake_timeout, validator.validate_token(token)).await {
        Ok(Ok(claims)) => Ok(Identity::from_claims(claims)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(AuthError::Timeout),
    }
}

/// Register the upgraded connection and run it. A connection the hub
/// refuses is closed without starting its loops.
#[instrument(skip_all, fields(username = %identity.username))]
async fn serve_socket(hub: Hub, mut socket: WebSocket, identity: Identity) {
    let (session, outbound) = hub.create_session(identity);
    match hub.register(Arc::clone(&session)).await {
        Ok(()) => run_session(socket, session, outbound, SessionTiming::from(hub.config())).await,
        Err(e) => {
            warn!(session_id = %session.id(), error = %e, "registration failed; closing connection");
            let _ = session.close(CloseReason::RegistrationFailed);
            if matches!(e, HubError::Timeout { .. }) {
                let _ = hub.unregister(&session).await;
            }
            session.mark_closed();
            drop(outbound);
            let frame = CloseFrame {
                code: close_code::AGAIN,
                reason: e.to_string().into(),
            };
            let _ = socket.send(Message::Close(Some(frame))).await;
        }
    }
}

fn reject(status: StatusCode, code: ApiErrorCode, message: impl Into<String>) -> Response {
    counter!(WS_HANDSHAKE_REJECTIONS_TOTAL, "code" => code.as_str()).increment(1);
    (status, Json(ApiError::new(code, message).into_body())).into_response()
}
