//! The coordinator.
//!
//! One task owns the session registry. Registration, unregistration,
//! broadcast and the stale sweep are all messages into that task, so they
//! are applied one at a time and events from a single publisher reach every
//! session in acceptance order. [`Hub`] is the cloneable handle the rest of
//! the process talks to.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use helix_core::SessionId;
use helix_events::{Event, EventType, ServerMessage, actions};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::Identity;
use crate::config::HubConfig;
use crate::errors::HubError;
use crate::metrics::{
    EVENTS_BROADCAST_TOTAL, EVENTS_DELIVERED_TOTAL, PERMISSION_CHECK_ERRORS_TOTAL,
    WS_BROADCAST_DROPS_TOTAL, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};
use crate::permission::{PermissionChecker, PermissionFilter, Verdict};
use crate::session::{CloseReason, PushError, Session};
use crate::stats::{HubStats, StatsCell};

const REGISTER_QUEUE: usize = 10;
const UNREGISTER_QUEUE: usize = 10;
const BROADCAST_QUEUE: usize = 256;

/// Entity type of the event sent to each new session.
pub const CONNECTION_ENTITY: &str = "connection";

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

struct RegisterRequest {
    session: Arc<Session>,
    reply: oneshot::Sender<Result<(), HubError>>,
}

struct UnregisterRequest {
    session: Arc<Session>,
    reason: CloseReason,
    reply: oneshot::Sender<()>,
}

#[derive(Clone)]
struct Handles {
    register_tx: mpsc::Sender<RegisterRequest>,
    unregister_tx: mpsc::Sender<UnregisterRequest>,
    broadcast_tx: mpsc::Sender<Arc<Event>>,
}

struct Control {
    handles: Handles,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Hub handle
// ─────────────────────────────────────────────────────────────────────────────

/// State the coordinator task needs. Held separately from [`HubShared`] so
/// the task never keeps the handle alive.
pub(crate) struct HubCore {
    config: HubConfig,
    stats: StatsCell,
    filter: PermissionFilter,
}

pub(crate) struct HubShared {
    core: Arc<HubCore>,
    control: Mutex<Option<Control>>,
}

impl Drop for HubShared {
    fn drop(&mut self) {
        if let Some(control) = self.control.get_mut().take() {
            control.cancel.cancel();
        }
    }
}

/// Cloneable handle to the coordinator.
#[derive(Clone)]
pub struct Hub {
    shared: Arc<HubShared>,
}

impl Hub {
    /// Hub that filters on locally cached claims only.
    pub fn new(config: HubConfig) -> Self {
        let filter = PermissionFilter::local(config.permission_check_timeout);
        Self::with_filter(config, filter)
    }

    /// Hub that also consults an external permission service.
    pub fn with_permission_checker(config: HubConfig, checker: Arc<dyn PermissionChecker>) -> Self {
        let filter = PermissionFilter::with_checker(checker, config.permission_check_timeout);
        Self::with_filter(config, filter)
    }

    fn with_filter(config: HubConfig, filter: PermissionFilter) -> Self {
        Self {
            shared: Arc::new(HubShared {
                core: Arc::new(HubCore {
                    config,
                    stats: StatsCell::new(),
                    filter,
                }),
                control: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<HubShared>) -> Self {
        Self { shared }
    }

    /// Configuration the hub was built with.
    pub fn config(&self) -> &HubConfig {
        &self.shared.core.config
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> HubStats {
        self.shared.core.stats.snapshot()
    }

    /// Whether the coordinator is running.
    pub fn is_running(&self) -> bool {
        self.shared.control.lock().is_some()
    }

    /// Spawn the coordinator. Must be called inside a Tokio runtime.
    pub fn start(&self) -> Result<(), HubError> {
        let mut control = self.shared.control.lock();
        if control.is_some() {
            return Err(HubError::AlreadyRunning);
        }

        let (register_tx, register_rx) = mpsc::channel(REGISTER_QUEUE);
        let (unregister_tx, unregister_rx) = mpsc::channel(UNREGISTER_QUEUE);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_QUEUE);
        let cancel = CancellationToken::new();

        let core = Arc::clone(&self.shared.core);
        core.stats.record_start();
        let coordinator = Coordinator {
            core,
            registry: Registry::default(),
            register_rx,
            unregister_rx,
            broadcast_rx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(coordinator.run());

        *control = Some(Control {
            handles: Handles {
                register_tx,
                unregister_tx,
                broadcast_tx,
            },
            cancel,
            task,
        });

        let config = &self.shared.core.config;
        info!(
            max_clients = config.max_clients,
            path = %config.path,
            "realtime hub started"
        );
        if config.enable_compression {
            info!("compression requested but not negotiated by the transport; sending uncompressed");
        }
        Ok(())
    }

    /// Stop the coordinator and close every session. Idempotent.
    pub async fn stop(&self) {
        let control = self.shared.control.lock().take();
        let Some(Control {
            handles,
            cancel,
            task,
        }) = control
        else {
            return;
        };
        cancel.cancel();
        drop(handles);
        if let Err(e) = task.await {
            warn!(error = %e, "hub coordinator task failed");
        }
        info!("realtime hub stopped");
    }

    /// Create an unregistered session bound to this hub. The receiver is
    /// the session's outbound queue.
    pub fn create_session(&self, identity: Identity) -> (Arc<Session>, mpsc::Receiver<Arc<str>>) {
        Session::new(
            identity,
            self.shared.core.config.send_queue_capacity,
            Arc::downgrade(&self.shared),
        )
    }

    /// Hand `session` to the coordinator and wait for it to be indexed.
    pub async fn register(&self, session: Arc<Session>) -> Result<(), HubError> {
        const OP: &str = "register";
        let handles = self.handles()?;
        let config = &self.shared.core.config;
        if self.shared.core.stats.active_connections() >= config.max_clients {
            return Err(HubError::CapacityReached {
                max: config.max_clients,
            });
        }

        let (reply, answer) = oneshot::channel();
        handles
            .register_tx
            .send_timeout(RegisterRequest { session, reply }, config.register_timeout)
            .await
            .map_err(|e| send_error(&e, OP))?;
        match tokio::time::timeout(config.register_timeout, answer).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HubError::NotRunning),
            Err(_) => Err(HubError::Timeout { operation: OP }),
        }
    }

    /// Remove `session` from the registry and close it. Idempotent.
    pub async fn unregister(&self, session: &Arc<Session>) -> Result<(), HubError> {
        const OP: &str = "unregister";
        let handles = self.handles()?;
        let wait = self.shared.core.config.register_timeout;
        let (reply, done) = oneshot::channel();
        let request = UnregisterRequest {
            session: Arc::clone(session),
            reason: CloseReason::Unregistered,
            reply,
        };
        handles
            .unregister_tx
            .send_timeout(request, wait)
            .await
            .map_err(|e| send_error(&e, OP))?;
        match tokio::time::timeout(wait, done).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(HubError::NotRunning),
            Err(_) => Err(HubError::Timeout { operation: OP }),
        }
    }

    /// Queue `event` for fan-out.
    ///
    /// Returns once the coordinator has accepted the event, not once it has
    /// been delivered. If the broadcast queue stays full for the bounded
    /// wait the event is dropped and counted as an error.
    pub async fn broadcast(&self, event: Event) -> Result<(), HubError> {
        const OP: &str = "broadcast";
        let handles = self.handles()?;
        let event_type = event.event_type;
        let wait = self.shared.core.config.register_timeout;
        handles
            .broadcast_tx
            .send_timeout(Arc::new(event), wait)
            .await
            .map_err(|e| {
                if matches!(e, SendTimeoutError::Timeout(_)) {
                    self.shared.core.stats.record_error();
                    warn!(%event_type, "broadcast queue full; event dropped");
                }
                send_error(&e, OP)
            })
    }

    fn handles(&self) -> Result<Handles, HubError> {
        self.shared
            .control
            .lock()
            .as_ref()
            .map(|c| c.handles.clone())
            .ok_or(HubError::NotRunning)
    }
}

fn send_error<T>(e: &SendTimeoutError<T>, operation: &'static str) -> HubError {
    match e {
        SendTimeoutError::Timeout(_) => HubError::Timeout { operation },
        SendTimeoutError::Closed(_) => HubError::NotRunning,
    }
}

#[allow(clippy::cast_precision_loss)]
fn set_active_gauge(active: usize) {
    gauge!(WS_CONNECTIONS_ACTIVE).set(active as f64);
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Primary index by session ID plus a secondary index by username. Every
/// session in one index is in the other.
#[derive(Default)]
struct Registry {
    by_id: HashMap<SessionId, Arc<Session>>,
    by_username: HashMap<String, Vec<Arc<Session>>>,
}

impl Registry {
    fn insert(&mut self, session: Arc<Session>) {
        self.by_username
            .entry(session.username().to_string())
            .or_default()
            .push(Arc::clone(&session));
        let _ = self.by_id.insert(session.id().clone(), session);
    }

    fn remove(&mut self, id: &SessionId) -> Option<Arc<Session>> {
        let session = self.by_id.remove(id)?;
        if let Some(list) = self.by_username.get_mut(session.username()) {
            list.retain(|s| s.id() != id);
            if list.is_empty() {
                let _ = self.by_username.remove(session.username());
            }
        }
        Some(session)
    }

    fn len(&self) -> usize {
        self.by_id.len()
    }

    fn user_count(&self) -> usize {
        self.by_username.len()
    }

    fn for_username(&self, username: &str) -> &[Arc<Session>] {
        self.by_username.get(username).map_or(&[], Vec::as_slice)
    }

    fn sessions(&self) -> impl Iterator<Item = &Arc<Session>> {
        self.by_id.values()
    }

    fn drain(&mut self) -> Vec<Arc<Session>> {
        self.by_username.clear();
        self.by_id.drain().map(|(_, s)| s).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Coordinator task
// ─────────────────────────────────────────────────────────────────────────────

struct Coordinator {
    core: Arc<HubCore>,
    registry: Registry,
    register_rx: mpsc::Receiver<RegisterRequest>,
    unregister_rx: mpsc::Receiver<UnregisterRequest>,
    broadcast_rx: mpsc::Receiver<Arc<Event>>,
    cancel: CancellationToken,
}

impl Coordinator {
    async fn run(mut self) {
        let period = self.core.config.sweep_interval;
        let mut sweep = tokio::time::interval_at(Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                Some(req) = self.register_rx.recv() => self.on_register(req),
                Some(req) = self.unregister_rx.recv() => self.on_unregister(req),
                Some(event) = self.broadcast_rx.recv() => self.on_broadcast(event).await,
                _ = sweep.tick() => self.sweep(),
            }
        }
        self.shutdown();
    }

    fn on_register(&mut self, req: RegisterRequest) {
        let RegisterRequest { session, reply } = req;
        let max = self.core.config.max_clients;
        if self.registry.len() >= max {
            warn!(username = %session.username(), max, "registration refused: hub full");
            let _ = reply.send(Err(HubError::CapacityReached { max }));
            return;
        }
        if !session.mark_registered() {
            debug!(session_id = %session.id(), "session closed before registration");
            let _ = reply.send(Err(HubError::NotRunning));
            return;
        }

        self.registry.insert(Arc::clone(&session));
        let active = self.registry.len();
        self.core
            .stats
            .record_registered(active, self.registry.user_count());
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        set_active_gauge(active);
        info!(
            session_id = %session.id(),
            username = %session.username(),
            user_sessions = self.registry.for_username(session.username()).len(),
            active,
            "session registered"
        );

        send_established(&session);
        let _ = reply.send(Ok(()));
    }

    fn on_unregister(&mut self, req: UnregisterRequest) {
        let _ = self.evict(&req.session, req.reason);
        let _ = req.reply.send(());
    }

    /// Close and de-index `session`. Returns whether it was indexed.
    fn evict(&mut self, session: &Arc<Session>, reason: CloseReason) -> bool {
        let _ = session.close(reason);
        if self.registry.remove(session.id()).is_none() {
            return false;
        }
        let reason = session.close_reason().unwrap_or(reason);
        if reason == CloseReason::Overflow {
            self.core.stats.record_error();
        }
        let active = self.registry.len();
        self.core
            .stats
            .record_unregistered(active, self.registry.user_count());
        counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
        set_active_gauge(active);
        info!(
            session_id = %session.id(),
            username = %session.username(),
            %reason,
            active,
            connected_secs = (Utc::now() - session.connected_at()).num_seconds(),
            "session unregistered"
        );
        true
    }

    async fn on_broadcast(&mut self, event: Arc<Event>) {
        self.core.stats.record_event();
        counter!(EVENTS_BROADCAST_TOTAL, "event_type" => event.event_type.as_str()).increment(1);

        let text: Arc<str> = match ServerMessage::Event(Arc::clone(&event)).encode() {
            Ok(text) => Arc::from(text),
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "failed to encode event");
                self.core.stats.record_error();
                return;
            }
        };

        let candidates: Vec<Arc<Session>> = self
            .registry
            .sessions()
            .filter(|s| s.wants(&event))
            .cloned()
            .collect();

        // Evaluated concurrently: the loop waits at most one check deadline.
        let filter = &self.core.filter;
        let verdicts = join_all(
            candidates
                .iter()
                .map(|session| filter.evaluate(session.identity(), &event)),
        )
        .await;

        let mut delivered: u64 = 0;
        let mut overflowed = Vec::new();
        let mut gone = Vec::new();
        for (session, verdict) in candidates.into_iter().zip(verdicts) {
            match verdict {
                Verdict::Allow => {}
                Verdict::Deny => continue,
                Verdict::Error => {
                    self.core.stats.record_error();
                    counter!(PERMISSION_CHECK_ERRORS_TOTAL).increment(1);
                    continue;
                }
            }
            match session.push(Arc::clone(&text)) {
                Ok(()) => delivered += 1,
                Err(PushError::Full) => overflowed.push(session),
                Err(PushError::Closed) => gone.push(session),
            }
        }

        for session in overflowed {
            warn!(
                session_id = %session.id(),
                username = %session.username(),
                "outbound queue full; disconnecting session"
            );
            counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
            let _ = self.evict(&session, CloseReason::Overflow);
        }
        for session in gone {
            let _ = self.evict(&session, CloseReason::WriteError);
        }

        counter!(EVENTS_DELIVERED_TOTAL).increment(delivered);
        debug!(
            event_type = %event.event_type,
            entity_id = %event.entity_id,
            recipients = delivered,
            "event broadcast"
        );
    }

    fn sweep(&mut self) {
        let stale_after = self.core.config.stale_after();
        let now = Instant::now();
        let stale: Vec<Arc<Session>> = self
            .registry
            .sessions()
            .filter(|s| now.saturating_duration_since(s.last_keepalive()) > stale_after)
            .cloned()
            .collect();
        for session in stale {
            warn!(
                session_id = %session.id(),
                username = %session.username(),
                idle_ms = now.saturating_duration_since(session.last_activity()).as_millis(),
                "no keepalive; evicting stale session"
            );
            let _ = self.evict(&session, CloseReason::Stale);
        }
    }

    fn shutdown(mut self) {
        self.register_rx.close();
        while let Ok(req) = self.register_rx.try_recv() {
            let _ = req.reply.send(Err(HubError::NotRunning));
        }
        self.unregister_rx.close();
        while let Ok(req) = self.unregister_rx.try_recv() {
            let _ = req.session.close(req.reason);
            let _ = req.reply.send(());
        }
        self.broadcast_rx.close();

        let sessions = self.registry.drain();
        for session in &sessions {
            let _ = session.close(CloseReason::Shutdown);
        }
        self.core.stats.record_unregistered(0, 0);
        set_active_gauge(0);
        info!(closed = sessions.len(), "hub coordinator stopped");
    }
}

fn send_established(session: &Session) {
    let id = session.id().as_str();
    let event = Event::new(
        EventType::ConnectionEstablished,
        actions::CONNECT,
        CONNECTION_ENTITY,
        id,
        session.username(),
    )
    .with_payload(json!({ "clientId": id, "time": Utc::now() }));
    if let Err(e) = session.send(&ServerMessage::Event(Arc::new(event))) {
        debug!(session_id = %id, error = ?e, "could not queue connection event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::IdentityClaims;
    use crate::errors::PermissionCheckError;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use helix_core::PermissionLevel;
    use helix_events::{EventContext, Subscription};
    use serde_json::Value;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn test_config() -> HubConfig {
        HubConfig {
            max_clients: 10,
            send_queue_capacity: 8,
            register_timeout: Duration::from_secs(1),
            sweep_interval: Duration::from_millis(100),
            pong_wait: Duration::from_secs(1),
            ping_period: Duration::from_millis(500),
            enable_compression: false,
            ..HubConfig::default()
        }
    }

    fn started(config: HubConfig) -> Hub {
        let hub = Hub::new(config);
        hub.start().unwrap();
        hub
    }

    fn user(name: &str, permissions: &str) -> Identity {
        Identity::from_claims(IdentityClaims {
            username: name.into(),
            permissions: permissions.into(),
            ..IdentityClaims::default()
        })
    }

    async fn next_json(rx: &mut mpsc::Receiver<Arc<str>>) -> Value {
        let text = tokio::time::timeout(TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("queue closed");
        serde_json::from_str(&text).unwrap()
    }

    /// Register a session and consume its connection event.
    async fn join(hub: &Hub, identity: Identity) -> (Arc<Session>, mpsc::Receiver<Arc<str>>) {
        let (session, mut rx) = hub.create_session(identity);
        hub.register(Arc::clone(&session)).await.unwrap();
        let first = next_json(&mut rx).await;
        assert_eq!(first["data"]["eventType"], "connection.established");
        (session, rx)
    }

    /// Round-trip through the coordinator so everything queued before has
    /// been processed.
    async fn barrier(hub: &Hub) {
        let (s, _rx) = hub.create_session(Identity::anonymous());
        hub.register(Arc::clone(&s)).await.unwrap();
        hub.unregister(&s).await.unwrap();
    }

    fn ticket(id: &str) -> Event {
        Event::new(EventType::TicketCreated, "create", "ticket", id, "alice")
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn start_twice_fails() {
        let hub = started(test_config());
        assert_eq!(hub.start(), Err(HubError::AlreadyRunning));
        hub.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let hub = started(test_config());
        hub.stop().await;
        hub.stop().await;
        assert!(!hub.is_running());
    }

    #[tokio::test]
    async fn operations_fail_when_not_running() {
        let hub = Hub::new(test_config());
        assert_eq!(hub.broadcast(ticket("T1")).await, Err(HubError::NotRunning));
        let (s, _rx) = hub.create_session(Identity::anonymous());
        assert_eq!(hub.register(Arc::clone(&s)).await, Err(HubError::NotRunning));
        assert_eq!(hub.unregister(&s).await, Err(HubError::NotRunning));

        hub.start().unwrap();
        hub.stop().await;
        assert_eq!(hub.broadcast(ticket("T1")).await, Err(HubError::NotRunning));
    }

    #[tokio::test]
    async fn restart_after_stop() {
        let hub = started(test_config());
        hub.stop().await;
        hub.start().unwrap();
        let (_s, _rx) = join(&hub, Identity::anonymous()).await;
        assert_eq!(hub.stats().active_connections, 1);
        hub.stop().await;
    }

    #[tokio::test]
    async fn stop_closes_every_session() {
        let hub = started(test_config());
        let (a, _ra) = join(&hub, user("alice", "READ")).await;
        let (b, _rb) = join(&hub, user("bob", "READ")).await;
        hub.stop().await;
        assert_eq!(a.close_reason(), Some(CloseReason::Shutdown));
        assert_eq!(b.close_reason(), Some(CloseReason::Shutdown));
        assert_eq!(hub.stats().active_connections, 0);
        assert_eq!(hub.stats().active_users, 0);
    }

    // ── Registration ────────────────────────────────────────────────────

    #[tokio::test]
    async fn connection_event_comes_first() {
        let hub = started(test_config());
        let (session, mut rx) = hub.create_session(user("alice", "READ"));
        hub.register(Arc::clone(&session)).await.unwrap();
        let msg = next_json(&mut rx).await;
        assert_eq!(msg["type"], "event");
        assert_eq!(msg["action"], "connect");
        assert_eq!(msg["data"]["entityType"], "connection");
        assert_eq!(msg["data"]["entityId"], session.id().as_str());
        assert_eq!(msg["data"]["payload"]["clientId"], session.id().as_str());
        assert!(msg["data"]["payload"]["time"].is_string());
        hub.stop().await;
    }

    #[tokio::test]
    async fn register_counts_users() {
        let hub = started(test_config());
        let (_a1, _r1) = join(&hub, user("alice", "READ")).await;
        let (_a2, _r2) = join(&hub, user("alice", "READ")).await;
        let (_b, _r3) = join(&hub, user("bob", "READ")).await;
        let stats = hub.stats();
        assert_eq!(stats.active_connections, 3);
        assert_eq!(stats.active_users, 2);
        assert_eq!(stats.total_connections, 3);
        hub.stop().await;
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let hub = started(HubConfig {
            max_clients: 2,
            ..test_config()
        });
        let (a, _ra) = join(&hub, Identity::anonymous()).await;
        let (_b, _rb) = join(&hub, Identity::anonymous()).await;
        let (c, _rc) = hub.create_session(Identity::anonymous());
        assert_matches!(
            hub.register(c).await,
            Err(HubError::CapacityReached { max: 2 })
        );
        assert_eq!(hub.stats().active_connections, 2);
        assert!(!a.is_closed());
        hub.stop().await;
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let hub = started(test_config());
        let (s, _rx) = join(&hub, Identity::anonymous()).await;
        hub.unregister(&s).await.unwrap();
        hub.unregister(&s).await.unwrap();
        assert_eq!(hub.stats().active_connections, 0);
        assert_eq!(s.close_reason(), Some(CloseReason::Unregistered));
        hub.stop().await;
    }

    #[tokio::test]
    async fn session_leaves_through_back_reference() {
        let hub = started(test_config());
        let (s, _rx) = join(&hub, Identity::anonymous()).await;
        s.leave().await.unwrap();
        assert_eq!(hub.stats().active_connections, 0);
        hub.stop().await;
    }

    // ── Broadcast ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn delivers_only_to_matching_sessions_in_order() {
        let hub = started(test_config());
        let (a, mut ra) = join(&hub, user("alice", "READ")).await;
        let (b, mut rb) = join(&hub, user("bob", "READ")).await;
        a.subscribe(Subscription::for_types([EventType::TicketCreated]));
        b.subscribe(Subscription::for_types([EventType::PriorityCreated]));

        for id in ["T1", "T2", "T3"] {
            hub.broadcast(ticket(id)).await.unwrap();
        }
        hub.broadcast(Event::new(
            EventType::PriorityCreated,
            "create",
            "priority",
            "P1",
            "alice",
        ))
        .await
        .unwrap();

        for id in ["T1", "T2", "T3"] {
            assert_eq!(next_json(&mut ra).await["data"]["entityId"], id);
        }
        assert_eq!(next_json(&mut rb).await["data"]["entityId"], "P1");
        barrier(&hub).await;
        assert!(ra.try_recv().is_err());
        assert!(rb.try_recv().is_err());
        assert_eq!(hub.stats().total_events, 4);
        hub.stop().await;
    }

    #[tokio::test]
    async fn fresh_session_receives_everything_but_reads() {
        let hub = started(test_config());
        let (_s, mut rx) = join(&hub, Identity::anonymous()).await;
        hub.broadcast(Event::new(EventType::TicketRead, "read", "ticket", "T0", "alice"))
            .await
            .unwrap();
        hub.broadcast(ticket("T1")).await.unwrap();

        let msg = next_json(&mut rx).await;
        assert_eq!(msg["data"]["eventType"], "ticket.created");
        assert_eq!(msg["data"]["entityId"], "T1");
        barrier(&hub).await;
        assert!(rx.try_recv().is_err());
        hub.stop().await;
    }

    #[tokio::test]
    async fn unsubscribed_session_receives_nothing() {
        let hub = started(test_config());
        let (s, mut rx) = join(&hub, Identity::anonymous()).await;
        s.unsubscribe(&std::collections::HashSet::new());
        hub.broadcast(ticket("T1")).await.unwrap();
        barrier(&hub).await;
        assert!(rx.try_recv().is_err());
        hub.stop().await;
    }

    #[tokio::test]
    async fn permission_context_filters_recipients() {
        let hub = started(test_config());
        let (reader, mut rr) = join(&hub, user("alice", "READ")).await;
        let (anon, mut ra) = join(&hub, Identity::anonymous()).await;
        reader.subscribe(Subscription::default());
        anon.subscribe(Subscription::default());

        let event = ticket("T1").with_context(EventContext::project("P1", vec!["READ".into()]));
        hub.broadcast(event).await.unwrap();

        assert_eq!(next_json(&mut rr).await["data"]["entityId"], "T1");
        barrier(&hub).await;
        assert!(ra.try_recv().is_err());
        hub.stop().await;
    }

    struct BrokenChecker;

    #[async_trait]
    impl PermissionChecker for BrokenChecker {
        fn is_enabled(&self) -> bool {
            true
        }

        async fn check_permission(
            &self,
            _username: &str,
            _resource: &str,
            _level: PermissionLevel,
        ) -> Result<bool, PermissionCheckError> {
            Err(PermissionCheckError("unreachable".into()))
        }
    }

    #[tokio::test]
    async fn permission_service_errors_deny_and_count() {
        let hub = Hub::with_permission_checker(test_config(), Arc::new(BrokenChecker));
        hub.start().unwrap();
        let (s, mut rx) = join(&hub, user("alice", "ALL")).await;
        s.subscribe(Subscription::default());

        let event = ticket("T1").with_context(EventContext::project("P1", vec!["READ".into()]));
        hub.broadcast(event).await.unwrap();
        barrier(&hub).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(hub.stats().total_errors, 1);
        assert!(!s.is_closed());
        hub.stop().await;
    }

    struct SlowChecker;

    #[async_trait]
    impl PermissionChecker for SlowChecker {
        fn is_enabled(&self) -> bool {
            true
        }

        async fn check_permission(
            &self,
            _username: &str,
            _resource: &str,
            _level: PermissionLevel,
        ) -> Result<bool, PermissionCheckError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(true)
        }
    }

    #[tokio::test]
    async fn slow_permission_service_does_not_block_registration() {
        let config = HubConfig {
            permission_check_timeout: Duration::from_millis(500),
            ..test_config()
        };
        let hub = Hub::with_permission_checker(config, Arc::new(SlowChecker));
        hub.start().unwrap();
        let mut receivers = Vec::new();
        for name in ["a", "b", "c", "d", "e"] {
            let (_s, rx) = join(&hub, user(name, "ALL")).await;
            receivers.push(rx);
        }

        let event = ticket("T1").with_context(EventContext::project(
            "P1",
            vec!["READ".into(), "UPDATE".into()],
        ));
        hub.broadcast(event).await.unwrap();
        let (late, _late_rx) = hub.create_session(user("late", "READ"));
        assert_eq!(hub.register(late).await, Ok(()));

        for rx in &mut receivers {
            assert_eq!(next_json(rx).await["data"]["entityId"], "T1");
        }
        assert_eq!(hub.stats().total_errors, 0);
        hub.stop().await;
    }

    #[tokio::test]
    async fn overflow_while_replying_counts_as_error() {
        let hub = started(test_config());
        let (s, _rx) = join(&hub, Identity::anonymous()).await;
        let _ = s.close(CloseReason::Overflow);
        s.leave().await.unwrap();
        let stats = hub.stats();
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_errors, 1);
        hub.stop().await;
    }

    #[tokio::test]
    async fn full_queue_evicts_only_the_slow_session() {
        let hub = started(HubConfig {
            send_queue_capacity: 2,
            ..test_config()
        });
        let (slow, _slow_rx) = join(&hub, user("slow", "READ")).await;
        let (fast, mut fast_rx) = join(&hub, user("fast", "READ")).await;
        slow.subscribe(Subscription::default());
        fast.subscribe(Subscription::default());

        for id in ["T1", "T2", "T3"] {
            hub.broadcast(ticket(id)).await.unwrap();
            assert_eq!(next_json(&mut fast_rx).await["data"]["entityId"], id);
        }

        tokio::time::timeout(TIMEOUT, slow.closed()).await.unwrap();
        assert_eq!(slow.close_reason(), Some(CloseReason::Overflow));
        assert!(!fast.is_closed());
        barrier(&hub).await;
        let stats = hub.stats();
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.total_errors, 1);
        hub.stop().await;
    }

    // ── Sweep ───────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_silent_sessions() {
        let hub = started(test_config());
        let (silent, _rx) = join(&hub, Identity::anonymous()).await;
        tokio::time::timeout(Duration::from_secs(10), silent.closed())
            .await
            .unwrap();
        assert_eq!(silent.close_reason(), Some(CloseReason::Stale));
        barrier(&hub).await;
        assert_eq!(hub.stats().active_connections, 0);
        assert_eq!(hub.stats().total_errors, 0);
        hub.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_spares_sessions_with_keepalive() {
        let hub = started(test_config());
        let (alive, _rx) = join(&hub, Identity::anonymous()).await;
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            alive.mark_keepalive();
        }
        assert!(!alive.is_closed());
        hub.stop().await;
    }

    // ── Registry ────────────────────────────────────────────────────────

    fn loose_session(name: &str) -> Arc<Session> {
        Session::new(user(name, "READ"), 4, std::sync::Weak::new()).0
    }

    #[test]
    fn registry_indexes_stay_consistent() {
        let mut reg = Registry::default();
        let a1 = loose_session("alice");
        let a2 = loose_session("alice");
        let b = loose_session("bob");
        reg.insert(Arc::clone(&a1));
        reg.insert(Arc::clone(&a2));
        reg.insert(Arc::clone(&b));
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.user_count(), 2);
        assert_eq!(reg.for_username("alice").len(), 2);

        assert!(reg.remove(a1.id()).is_some());
        assert_eq!(reg.for_username("alice").len(), 1);
        assert!(reg.remove(a1.id()).is_none());

        assert!(reg.remove(a2.id()).is_some());
        assert!(reg.for_username("alice").is_empty());
        assert_eq!(reg.user_count(), 1);
    }

    #[test]
    fn registry_drain_empties_both_indexes() {
        let mut reg = Registry::default();
        reg.insert(loose_session("alice"));
        reg.insert(loose_session("bob"));
        assert_eq!(reg.drain().len(), 2);
        assert_eq!(reg.len(), 0);
        assert_eq!(reg.user_count(), 0);
    }
}
