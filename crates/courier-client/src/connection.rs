//! Lifecycle of the single logical connection a client process holds.
//!
//! [`ConnectionManager::connect`] spawns one background task per connection.
//! The task opens the transport, pumps frames into the [`Dispatcher`], and on
//! any transport failure sleeps with [`Backoff`] before trying again. Every
//! await in the task races a [`CancellationToken`], so `disconnect` and role
//! switches stop it promptly and no frame is dispatched after cancellation.

use std::sync::Arc;
use std::time::Duration;

use courier_core::errors::{HandlerError, TransportError};
use courier_core::events::{Event, EventName};
use courier_core::ids::ConnectionId;
use courier_core::protocol::Handshake;
use courier_core::security::{Credential, Role};
use courier_telemetry::MetricsRecorder;
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::registry::{Subscription, SubscriptionRegistry};
use crate::transport::{FrameStream, Inbound, Transport};

/// Observable connectivity. Errors never reach callers; this is all they see.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32, next_delay: Duration },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting { .. } => "reconnecting",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// End-user role without a credential. Nothing was sent.
    MissingCredential,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new connection task was started.
    Opened,
    /// A live connection with the same role already exists.
    AlreadyConnected,
    Rejected(RejectReason),
}

#[derive(Clone, Debug)]
struct Session {
    id: ConnectionId,
    role: Role,
}

struct ActiveConnection {
    id: ConnectionId,
    role: Role,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the connection, the dispatcher and the subscription registry.
///
/// Constructed explicitly and shared by reference (or `Arc`) with consumers.
/// Independent instances do not share any state.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    dispatcher: Arc<Dispatcher>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    session: Arc<RwLock<Option<Session>>>,
    active: Mutex<Option<ActiveConnection>>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let dispatcher = Dispatcher::new(SubscriptionRegistry::new(), config.dedup_capacity);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            config,
            dispatcher: Arc::new(dispatcher),
            state_tx: Arc::new(state_tx),
            session: Arc::new(RwLock::new(None)),
            active: Mutex::new(None),
            metrics: None,
        }
    }

    /// Attach a metrics recorder. Must be called before the first `connect`.
    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        let registry = self.dispatcher.registry().clone();
        self.dispatcher = Arc::new(
            Dispatcher::new(registry, self.config.dedup_capacity).with_metrics(Arc::clone(&metrics)),
        );
        self.metrics = Some(metrics);
        self
    }

    /// Open a connection for `role`, replacing any connection held for another role.
    pub async fn connect(&self, role: Role, credential: Option<Credential>) -> ConnectOutcome {
        let credential = credential.filter(|c| !c.is_empty());
        if role.requires_credential() && credential.is_none() {
            warn!(role = %role, "refusing to connect without a credential");
            return ConnectOutcome::Rejected(RejectReason::MissingCredential);
        }
        let credential = if role.requires_credential() {
            credential
        } else {
            None
        };

        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref() {
            if current.role == role && !current.task.is_finished() {
                debug!(role = %role, connection_id = %current.id, "already connected with this role");
                return ConnectOutcome::AlreadyConnected;
            }
        }
        if let Some(previous) = active.take() {
            if previous.role != role {
                info!(from = %previous.role, to = %role, "switching connection role");
            }
            self.teardown(previous).await;
        }

        self.dispatcher.reset_dedup();
        let id = ConnectionId::new();
        let cancel = CancellationToken::new();
        *self.session.write() = Some(Session {
            id: id.clone(),
            role,
        });

        let task = ConnectionTask {
            id: id.clone(),
            handshake: Handshake::new(role, credential),
            transport: Arc::clone(&self.transport),
            dispatcher: Arc::clone(&self.dispatcher),
            state_tx: Arc::clone(&self.state_tx),
            session: Arc::clone(&self.session),
            config: self.config.clone(),
            cancel: cancel.clone(),
            metrics: self.metrics.clone(),
        };
        info!(role = %role, connection_id = %id, "opening connection");
        let task = tokio::spawn(task.run());
        *active = Some(ActiveConnection {
            id,
            role,
            cancel,
            task,
        });
        ConnectOutcome::Opened
    }

    /// Tear down the connection, if any. Subscriptions are left untouched.
    pub async fn disconnect(&self) {
        let mut active = self.active.lock().await;
        let Some(conn) = active.take() else {
            debug!("disconnect without an active connection");
            return;
        };
        info!(role = %conn.role, connection_id = %conn.id, "disconnecting");
        self.teardown(conn).await;
    }

    async fn teardown(&self, conn: ActiveConnection) {
        conn.cancel.cancel();
        if let Err(e) = conn.task.await {
            if e.is_panic() {
                error!(connection_id = %conn.id, "connection task panicked");
            }
        }
        *self.session.write() = None;
        let _ = self.state_tx.send_replace(ConnectionState::Disconnected);
        if let Some(metrics) = &self.metrics {
            metrics.gauge_set("connection.connected", &[], 0.0);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Role of the current connection. `None` when disconnected or after a rejection.
    pub fn role(&self) -> Option<Role> {
        self.session.read().as_ref().map(|s| s.role)
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.session.read().as_ref().map(|s| s.id.clone())
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        self.dispatcher.registry()
    }

    pub fn on<F>(&self, name: EventName, handler: F) -> Subscription
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.registry().on(name, handler)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(conn) = self.active.get_mut().take() {
            conn.cancel.cancel();
            conn.task.abort();
        }
    }
}

enum PumpExit {
    Cancelled,
    Dropped(TransportError),
}

struct ConnectionTask {
    id: ConnectionId,
    handshake: Handshake,
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    session: Arc<RwLock<Option<Session>>>,
    config: ClientConfig,
    cancel: CancellationToken,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl ConnectionTask {
    async fn run(self) {
        let role = self.handshake.role;
        let mut backoff = Backoff::new(self.config.backoff.clone());
        loop {
            if backoff.attempt() == 0 {
                self.set_state(ConnectionState::Connecting);
            }

            let opened = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                result = tokio::time::timeout(
                    self.config.handshake_timeout,
                    self.transport.open(&self.handshake),
                ) => result.unwrap_or(Err(TransportError::HandshakeTimeout(self.config.handshake_timeout))),
            };

            match opened {
                Ok(stream) => {
                    backoff.reset();
                    info!(role = %role, connection_id = %self.id, "connected");
                    self.set_state(ConnectionState::Connected);
                    if let Some(metrics) = &self.metrics {
                        metrics.counter_inc("connection.opened", &[("role", role.as_str())], 1);
                        metrics.gauge_set("connection.connected", &[], 1.0);
                    }
                    match self.pump(stream).await {
                        PumpExit::Cancelled => return,
                        PumpExit::Dropped(err) => {
                            warn!(role = %role, connection_id = %self.id, error = %err, "transport dropped");
                            if let Some(metrics) = &self.metrics {
                                metrics.gauge_set("connection.connected", &[], 0.0);
                            }
                        }
                    }
                }
                Err(err) if !err.is_retryable() => {
                    error!(
                        role = %role,
                        connection_id = %self.id,
                        error = %err,
                        kind = err.error_kind(),
                        "connection refused, not retrying"
                    );
                    self.give_up();
                    return;
                }
                Err(err) => {
                    warn!(
                        role = %role,
                        attempt = backoff.attempt(),
                        error = %err,
                        kind = err.error_kind(),
                        "connect attempt failed"
                    );
                }
            }

            let next_delay = backoff.next_delay();
            let attempt = backoff.attempt();
            info!(role = %role, attempt, delay_ms = next_delay.as_millis() as u64, "reconnecting");
            self.set_state(ConnectionState::Reconnecting {
                attempt,
                next_delay,
            });
            if let Some(metrics) = &self.metrics {
                metrics.counter_inc("connection.reconnect_attempts", &[], 1);
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(next_delay) => {}
            }
        }
    }

    /// Dispatch frames until the link ends, goes silent, or the task is cancelled.
    async fn pump(&self, mut stream: FrameStream) -> PumpExit {
        let idle = self.config.read_idle_timeout;
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return PumpExit::Cancelled,
                frame = tokio::time::timeout(idle, stream.next()) => match frame {
                    Err(_) => return PumpExit::Dropped(TransportError::IdleTimeout(idle)),
                    Ok(Some(Ok(Inbound::Event(raw)))) => {
                        if self.cancel.is_cancelled() {
                            return PumpExit::Cancelled;
                        }
                        let _ = self.dispatcher.dispatch(raw);
                    }
                    Ok(Some(Ok(Inbound::Heartbeat))) => {
                        trace!(connection_id = %self.id, "heartbeat");
                    }
                    Ok(Some(Err(err))) => return PumpExit::Dropped(err),
                    Ok(None) => return PumpExit::Dropped(TransportError::Closed),
                },
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        if self.cancel.is_cancelled() {
            return;
        }
        let _ = self.state_tx.send_replace(state);
    }

    fn give_up(&self) {
        {
            let mut session = self.session.write();
            if session.as_ref().is_some_and(|s| s.id == self.id) {
                *session = None;
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffConfig;
    use crate::testing::MockTransport;
    use parking_lot::Mutex as PlMutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> ClientConfig {
        ClientConfig {
            backoff: BackoffConfig::default().without_jitter(),
            ..ClientConfig::default()
        }
    }

    fn manager(mock: &MockTransport) -> ConnectionManager {
        ConnectionManager::new(Arc::new(mock.clone()), config())
    }

    /// Let spawned tasks run to their next suspension point.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn wait_until(manager: &ConnectionManager, pred: impl Fn(&ConnectionState) -> bool) {
        let mut rx = manager.watch_state();
        tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| pred(s)))
            .await
            .expect("state not reached in time")
            .expect("state sender dropped");
    }

    fn counting(manager: &ConnectionManager, name: EventName) -> (Arc<AtomicUsize>, Subscription) {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let sub = manager.on(name, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (calls, sub)
    }

    fn created(id: &str) -> serde_json::Value {
        json!({"notification": {"id": id, "title": "Order shipped"}})
    }

    #[tokio::test(start_paused = true)]
    async fn end_user_without_credential_is_rejected_locally() {
        let mock = MockTransport::new();
        let manager = manager(&mock);

        let outcome = manager.connect(Role::EndUser, None).await;
        assert_eq!(outcome, ConnectOutcome::Rejected(RejectReason::MissingCredential));
        let outcome = manager.connect(Role::EndUser, Some(Credential::new(""))).await;
        assert_eq!(outcome, ConnectOutcome::Rejected(RejectReason::MissingCredential));

        settle().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(mock.open_count(), 0);
        assert!(mock.handshakes().is_empty());
        assert_eq!(manager.role(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credential_leaves_existing_connection_alone() {
        let mock = MockTransport::new();
        let manager = manager(&mock);
        manager.connect(Role::Operator, None).await;
        wait_until(&manager, ConnectionState::is_connected).await;

        let outcome = manager.connect(Role::EndUser, None).await;
        assert_eq!(outcome, ConnectOutcome::Rejected(RejectReason::MissingCredential));
        assert_eq!(manager.role(), Some(Role::Operator));
        assert!(manager.state().is_connected());
        assert_eq!(mock.live_links(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_carries_role_and_credential() {
        let mock = MockTransport::new();
        let manager = manager(&mock);
        let outcome = manager
            .connect(Role::EndUser, Some(Credential::new("tok-1")))
            .await;
        assert_eq!(outcome, ConnectOutcome::Opened);
        wait_until(&manager, ConnectionState::is_connected).await;

        let handshakes = mock.handshakes();
        assert_eq!(handshakes.len(), 1);
        assert_eq!(handshakes[0].role, Role::EndUser);
        assert_eq!(
            handshakes[0].credential.as_ref().map(Credential::expose),
            Some("tok-1")
        );
        assert_eq!(manager.role(), Some(Role::EndUser));
        assert!(manager.connection_id().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn operator_handshake_sends_no_credential() {
        let mock = MockTransport::new();
        let manager = manager(&mock);
        manager
            .connect(Role::Operator, Some(Credential::new("ignored")))
            .await;
        wait_until(&manager, ConnectionState::is_connected).await;
        assert!(mock.handshakes()[0].credential.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_with_same_role_is_idempotent() {
        let mock = MockTransport::new();
        let manager = manager(&mock);
        assert_eq!(manager.connect(Role::Operator, None).await, ConnectOutcome::Opened);
        wait_until(&manager, ConnectionState::is_connected).await;
        let id = manager.connection_id();

        assert_eq!(
            manager.connect(Role::Operator, None).await,
            ConnectOutcome::AlreadyConnected
        );
        settle().await;
        assert_eq!(mock.open_count(), 1);
        assert_eq!(manager.connection_id(), id);
    }

    #[tokio::test(start_paused = true)]
    async fn role_switch_leaves_exactly_one_connection() {
        let mock = MockTransport::new();
        let manager = manager(&mock);
        let (calls, _sub) = counting(&manager, EventName::TicketUpdated);

        manager.connect(Role::Operator, None).await;
        wait_until(&manager, ConnectionState::is_connected).await;
        let operator_id = manager.connection_id();

        let outcome = manager
            .connect(Role::EndUser, Some(Credential::new("tok-1")))
            .await;
        assert_eq!(outcome, ConnectOutcome::Opened);
        wait_until(&manager, ConnectionState::is_connected).await;

        assert_eq!(mock.live_links(), 1);
        assert_eq!(mock.open_count(), 2);
        assert_eq!(manager.role(), Some(Role::EndUser));
        assert_ne!(manager.connection_id(), operator_id);
        assert_eq!(mock.handshakes()[1].role, Role::EndUser);

        assert!(mock.emit("ticket-updated", json!({})));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn subscriptions_survive_automatic_reconnect() {
        let mock = MockTransport::new();
        let manager = manager(&mock);
        let (calls, sub) = counting(&manager, EventName::UnreadCountChanged);

        manager.connect(Role::Operator, None).await;
        wait_until(&manager, ConnectionState::is_connected).await;
        assert!(mock.emit("unread-count-changed", json!({"unreadCount": 1})));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(mock.drop_link());
        wait_until(&manager, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;
        wait_until(&manager, ConnectionState::is_connected).await;

        assert!(mock.emit("unread-count-changed", json!({"unreadCount": 2})));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(mock.open_count(), 2);
        assert!(!sub.is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn redelivery_after_reconnect_is_suppressed() {
        let mock = MockTransport::new();
        let manager = manager(&mock);
        let (calls, _sub) = counting(&manager, EventName::NotificationCreated);

        manager.connect(Role::Operator, None).await;
        wait_until(&manager, ConnectionState::is_connected).await;
        mock.emit("notification-created", created("n1"));
        settle().await;

        mock.close_link();
        wait_until(&manager, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;
        wait_until(&manager, ConnectionState::is_connected).await;
        mock.emit("notification-created", created("n1"));
        mock.emit("notification-created", created("n2"));
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_connection_starts_with_empty_dedup() {
        let mock = MockTransport::new();
        let manager = manager(&mock);
        let (calls, _sub) = counting(&manager, EventName::NotificationCreated);

        manager.connect(Role::Operator, None).await;
        wait_until(&manager, ConnectionState::is_connected).await;
        mock.emit("notification-created", created("n1"));
        settle().await;

        manager.disconnect().await;
        manager.connect(Role::Operator, None).await;
        wait_until(&manager, ConnectionState::is_connected).await;
        mock.emit("notification-created", created("n1"));
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_and_caps() {
        let mock = MockTransport::new();
        for _ in 0..6 {
            mock.fail_next(TransportError::Connect("refused".into()));
        }
        let manager = manager(&mock);
        manager.connect(Role::Operator, None).await;
        settle().await;

        let expected = [1u64, 2, 4, 8, 10, 10];
        for (n, secs) in expected.iter().enumerate() {
            assert_eq!(
                manager.state(),
                ConnectionState::Reconnecting {
                    attempt: n as u32 + 1,
                    next_delay: Duration::from_secs(*secs),
                }
            );
            assert_eq!(mock.open_count(), n + 1);
            tokio::time::advance(Duration::from_secs(*secs)).await;
            settle().await;
        }
        assert!(manager.state().is_connected());
        assert_eq!(mock.open_count(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_connect_resets_backoff() {
        let mock = MockTransport::new();
        mock.fail_next(TransportError::Connect("refused".into()));
        mock.fail_next(TransportError::Connect("refused".into()));
        let manager = manager(&mock);
        manager.connect(Role::Operator, None).await;
        wait_until(&manager, ConnectionState::is_connected).await;

        mock.drop_link();
        settle().await;
        assert_eq!(
            manager.state(),
            ConnectionState::Reconnecting {
                attempt: 1,
                next_delay: Duration::from_secs(1),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn silent_link_is_treated_as_dropped() {
        let mock = MockTransport::new();
        let manager = manager(&mock);
        manager.connect(Role::Operator, None).await;
        wait_until(&manager, ConnectionState::is_connected).await;

        let idle = manager.config().read_idle_timeout;
        tokio::time::advance(idle - Duration::from_secs(1)).await;
        settle().await;
        assert!(manager.state().is_connected());

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(
            manager.state(),
            ConnectionState::Reconnecting {
                attempt: 1,
                next_delay: Duration::from_secs(1),
            }
        );
        assert_eq!(mock.live_links(), 0);

        wait_until(&manager, ConnectionState::is_connected).await;
        assert_eq!(mock.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_keep_a_quiet_link_open() {
        let mock = MockTransport::new();
        let manager = manager(&mock);
        manager.connect(Role::Operator, None).await;
        wait_until(&manager, ConnectionState::is_connected).await;

        let step = manager.config().read_idle_timeout * 2 / 3;
        for _ in 0..3 {
            tokio::time::advance(step).await;
            assert!(mock.heartbeat());
            settle().await;
        }
        assert!(manager.state().is_connected());
        assert_eq!(mock.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_triggers_reconnect() {
        let mock = MockTransport::new();
        mock.hang_next();
        let manager = manager(&mock);
        manager.connect(Role::Operator, None).await;

        wait_until(&manager, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;
        assert_eq!(
            manager.state(),
            ConnectionState::Reconnecting {
                attempt: 1,
                next_delay: Duration::from_secs(1),
            }
        );
        wait_until(&manager, ConnectionState::is_connected).await;
        assert_eq!(mock.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn server_rejection_is_terminal() {
        let mock = MockTransport::new();
        mock.reject_with("invalid credential");
        let manager = manager(&mock);

        let outcome = manager
            .connect(Role::EndUser, Some(Credential::new("expired")))
            .await;
        assert_eq!(outcome, ConnectOutcome::Opened);
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.role(), None);

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(mock.open_count(), 1);

        // a later connect with the same role starts over
        mock.accept_all();
        let outcome = manager
            .connect(Role::EndUser, Some(Credential::new("fresh")))
            .await;
        assert_eq!(outcome, ConnectOutcome::Opened);
        wait_until(&manager, ConnectionState::is_connected).await;
        assert_eq!(mock.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let mock = MockTransport::new();
        mock.fail_next(TransportError::Network("reset".into()));
        let manager = manager(&mock);
        manager.connect(Role::Operator, None).await;
        settle().await;
        assert!(matches!(manager.state(), ConnectionState::Reconnecting { .. }));

        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(mock.open_count(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_idempotent_and_keeps_subscriptions() {
        let mock = MockTransport::new();
        let manager = manager(&mock);
        let (_calls, _sub) = counting(&manager, EventName::TicketUpdated);

        manager.disconnect().await;
        manager.connect(Role::Operator, None).await;
        wait_until(&manager, ConnectionState::is_connected).await;
        manager.disconnect().await;
        manager.disconnect().await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.role(), None);
        assert_eq!(mock.live_links(), 0);
        assert!(manager.registry().has_subscribers(EventName::TicketUpdated));
    }

    #[tokio::test(start_paused = true)]
    async fn frames_after_teardown_are_not_dispatched() {
        let mock = MockTransport::new();
        let manager = manager(&mock);
        let (calls, _sub) = counting(&manager, EventName::TicketUpdated);
        manager.connect(Role::Operator, None).await;
        wait_until(&manager, ConnectionState::is_connected).await;

        manager.disconnect().await;
        assert!(!mock.emit("ticket-updated", json!({})));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn handler_failure_does_not_stop_the_pump() {
        let mock = MockTransport::new();
        let manager = manager(&mock);
        let _bad = manager.on(EventName::TicketUpdated, |_| panic!("render failed"));
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _good = manager.on(EventName::UnreadCountChanged, move |e| {
            s.lock().push(e.payload["unreadCount"].as_u64());
            Ok(())
        });

        manager.connect(Role::Operator, None).await;
        wait_until(&manager, ConnectionState::is_connected).await;
        mock.emit("ticket-updated", json!({}));
        mock.emit("unread-count-changed", json!({"unreadCount": 3}));
        settle().await;

        assert!(manager.state().is_connected());
        assert_eq!(*seen.lock(), vec![Some(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_track_lifecycle() {
        let mock = MockTransport::new();
        mock.fail_next(TransportError::Connect("refused".into()));
        let metrics = Arc::new(MetricsRecorder::new());
        let manager = manager(&mock).with_metrics(Arc::clone(&metrics));

        manager.connect(Role::Operator, None).await;
        wait_until(&manager, ConnectionState::is_connected).await;
        assert_eq!(metrics.counter_get("connection.reconnect_attempts", &[]), 1);
        assert_eq!(metrics.counter_get("connection.opened", &[("role", "operator")]), 1);
        assert_eq!(metrics.gauge_get("connection.connected", &[]), 1.0);

        manager.disconnect().await;
        assert_eq!(metrics.gauge_get("connection.connected", &[]), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn independent_managers_share_nothing() {
        let mock_a = MockTransport::new();
        let mock_b = MockTransport::new();
        let a = manager(&mock_a);
        let b = manager(&mock_b);
        let (calls_a, _sa) = counting(&a, EventName::TicketUpdated);

        a.connect(Role::Operator, None).await;
        b.connect(Role::EndUser, Some(Credential::new("tok-2"))).await;
        wait_until(&a, ConnectionState::is_connected).await;
        wait_until(&b, ConnectionState::is_connected).await;

        mock_b.emit("ticket-updated", json!({}));
        settle().await;
        assert_eq!(calls_a.load(Ordering::SeqCst), 0);
        assert_eq!(a.role(), Some(Role::Operator));
        assert_eq!(b.role(), Some(Role::EndUser));
    }
}
