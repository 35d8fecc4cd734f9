//! Per-connection session state.
//!
//! A [`Session`] is shared between the coordinator (which indexes it and
//! pushes events), the read loop (which updates its subscription and
//! keepalive) and the write loop (which drains its outbound queue). The
//! outbound queue is bounded; a full queue is reported, never waited on.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use helix_core::SessionId;
use helix_events::{Event, EventType, ServerMessage, Subscription};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::auth::Identity;
use crate::errors::HubError;
use crate::hub::{Hub, HubShared};

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// Session lifecycle. Transitions only move forward and every path to
/// `Closed` passes through `Closing`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet accepted by the coordinator.
    Connecting,
    /// Indexed by the coordinator.
    Registered,
    /// Read and write loops running.
    Active,
    /// Close requested; loops winding down.
    Closing,
    /// Fully torn down.
    Closed,
}

impl SessionState {
    fn can_move_to(self, next: Self) -> bool {
        use SessionState::{Active, Closed, Closing, Connecting, Registered};
        matches!(
            (self, next),
            (Connecting, Registered | Closing)
                | (Registered, Active | Closing)
                | (Active, Closing)
                | (Closing, Closed)
        )
    }
}

/// Why a session was closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent a close frame or the stream ended.
    ClientClosed,
    /// The transport failed on read.
    ReadError,
    /// No keepalive arrived within the read deadline.
    ReadTimeout,
    /// The transport failed on write.
    WriteError,
    /// The outbound queue was full.
    Overflow,
    /// The stale sweep evicted the session.
    Stale,
    /// The hub stopped.
    Shutdown,
    /// Removed from the registry without a more specific reason.
    Unregistered,
    /// The coordinator refused or never answered registration.
    RegistrationFailed,
}

impl CloseReason {
    /// Short label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::ReadError => "read_error",
            Self::ReadTimeout => "read_timeout",
            Self::WriteError => "write_error",
            Self::Overflow => "overflow",
            Self::Stale => "stale",
            Self::Shutdown => "shutdown",
            Self::Unregistered => "unregistered",
            Self::RegistrationFailed => "registration_failed",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a message could not be queued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushError {
    /// The outbound queue is at capacity.
    Full,
    /// The write side is gone.
    Closed,
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// One connected client.
pub struct Session {
    id: SessionId,
    identity: Identity,
    subscription: RwLock<Option<Subscription>>,
    outbound: mpsc::Sender<Arc<str>>,
    state: Mutex<SessionState>,
    connected_at: DateTime<Utc>,
    last_activity: Mutex<Instant>,
    last_keepalive: Mutex<Instant>,
    closed: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
    dropped_messages: AtomicU64,
    hub: Weak<HubShared>,
}

impl Session {
    pub(crate) fn new(
        identity: Identity,
        capacity: usize,
        hub: Weak<HubShared>,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let now = Instant::now();
        let session = Arc::new(Self {
            id: SessionId::new(),
            identity,
            subscription: RwLock::new(Some(Subscription::default())),
            outbound: tx,
            state: Mutex::new(SessionState::Connecting),
            connected_at: Utc::now(),
            last_activity: Mutex::new(now),
            last_keepalive: Mutex::new(now),
            closed: CancellationToken::new(),
            close_reason: Mutex::new(None),
            dropped_messages: AtomicU64::new(0),
            hub,
        });
        (session, rx)
    }

    /// Session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Owning identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Owning username.
    pub fn username(&self) -> &str {
        &self.identity.username
    }

    /// When the session was created.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    // ── Subscription ────────────────────────────────────────────────────

    /// Current interest filter. Starts as the default (every non-read
    /// event); `None` after a full unsubscribe, which receives nothing.
    pub fn subscription(&self) -> Option<Subscription> {
        self.subscription.read().clone()
    }

    /// Replace the interest filter.
    pub fn subscribe(&self, subscription: Subscription) {
        *self.subscription.write() = Some(subscription);
    }

    /// Drop `types` from the filter, or clear it entirely when `types` is
    /// empty or nothing explicit would remain.
    pub fn unsubscribe(&self, types: &HashSet<EventType>) {
        let mut slot = self.subscription.write();
        *slot = slot.take().and_then(|sub| sub.without_types(types));
    }

    /// Whether the interest filter admits `event`.
    pub fn wants(&self, event: &Event) -> bool {
        self.subscription
            .read()
            .as_ref()
            .is_some_and(|sub| sub.matches(event))
    }

    // ── Outbound ────────────────────────────────────────────────────────

    /// Queue pre-encoded text without waiting.
    pub fn push(&self, text: Arc<str>) -> Result<(), PushError> {
        self.outbound.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                PushError::Full
            }
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }

    /// Encode and queue a message without waiting.
    pub fn send(&self, message: &ServerMessage) -> Result<(), PushError> {
        match message.encode() {
            Ok(text) => self.push(Arc::from(text)),
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "failed to encode message");
                Err(PushError::Closed)
            }
        }
    }

    /// Messages refused because the queue was full.
    pub fn dropped_messages(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    // ── Liveness ────────────────────────────────────────────────────────

    /// Record inbound traffic.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Last inbound traffic.
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    /// Record a keepalive response (pong frame or `ping` message).
    pub fn mark_keepalive(&self) {
        let now = Instant::now();
        *self.last_keepalive.lock() = now;
        *self.last_activity.lock() = now;
    }

    /// Last keepalive response.
    pub fn last_keepalive(&self) -> Instant {
        *self.last_keepalive.lock()
    }

    // ── Close ───────────────────────────────────────────────────────────

    /// Request close. Returns `true` only for the call that initiated it.
    pub fn close(&self, reason: CloseReason) -> bool {
        {
            let mut state = self.state.lock();
            if !state.can_move_to(SessionState::Closing) {
                return false;
            }
            *state = SessionState::Closing;
        }
        *self.close_reason.lock() = Some(reason);
        self.closed.cancel();
        true
    }

    /// Whether close has been requested.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once close has been requested.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Reason passed to the first [`close`](Self::close).
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Leave the hub this session was created by.
    pub async fn leave(self: &Arc<Self>) -> Result<(), HubError> {
        let shared = self.hub.upgrade().ok_or(HubError::NotRunning)?;
        Hub::from_shared(shared).unregister(self).await
    }

    pub(crate) fn mark_registered(&self) -> bool {
        self.advance(SessionState::Registered)
    }

    pub(crate) fn mark_active(&self) -> bool {
        self.advance(SessionState::Active)
    }

    /// Final transition. Closes first if nobody has.
    pub(crate) fn mark_closed(&self) {
        let _ = self.close(CloseReason::Unregistered);
        let _ = self.advance(SessionState::Closed);
    }

    fn advance(&self, next: SessionState) -> bool {
        let mut state = self.state.lock();
        if state.can_move_to(next) {
            *state = next;
            true
        } else {
            false
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("username", &self.identity.username)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
