use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use chrono::{DateTime, Utc};
use courier_core::ids::ConnectionId;
use courier_core::security::Role;
use courier_telemetry::MetricsRecorder;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::Principal;
use crate::publisher::Audience;

/// An authenticated WebSocket client.
pub struct Client {
    pub id: ConnectionId,
    pub principal: Principal,
    pub connected_at: DateTime<Utc>,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_seen: AtomicU64,
}

impl Client {
    fn new(id: ConnectionId, principal: Principal, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            principal,
            connected_at: Utc::now(),
            tx,
            connected: AtomicBool::new(true),
            last_seen: AtomicU64::new(now_secs()),
        }
    }

    pub fn role(&self) -> Role {
        self.principal.role
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Any inbound frame (pong included) counts as a sign of life.
    pub fn record_activity(&self) {
        self.last_seen.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_seen.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }

    pub fn matches(&self, audience: &Audience) -> bool {
        audience.matches(&self.principal)
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all authenticated clients.
pub struct ClientRegistry {
    clients: DashMap<ConnectionId, Arc<Client>>,
    max_send_queue: usize,
    client_timeout: Duration,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize, client_timeout: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
            client_timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register an authenticated client and return it with its outbound queue.
    pub fn register(&self, principal: Principal) -> (Arc<Client>, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let client = Arc::new(Client::new(id.clone(), principal, tx));
        let _ = self.clients.insert(id, Arc::clone(&client));
        self.record_count();
        (client, rx)
    }

    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let removed = match self.clients.remove(id) {
            Some((_, client)) => {
                client.connected.store(false, Ordering::Relaxed);
                true
            }
            None => false,
        };
        if removed {
            self.record_count();
        }
        removed
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Client>> {
        self.clients.get(id).map(|c| Arc::clone(c.value()))
    }

    /// Queue a message for one client. A full queue drops the message.
    pub fn send_to(&self, id: &ConnectionId, message: String) -> bool {
        match self.get(id) {
            Some(client) => self.enqueue(&client, message),
            None => false,
        }
    }

    /// Queue a message for every connected client in `audience`. Returns how many accepted it.
    pub fn broadcast(&self, audience: &Audience, message: &str) -> usize {
        let targets: Vec<Arc<Client>> = self
            .clients
            .iter()
            .filter(|entry| entry.value().is_connected() && entry.value().matches(audience))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        targets
            .iter()
            .filter(|client| self.enqueue(client, message.to_string()))
            .count()
    }

    fn enqueue(&self, client: &Client, message: String) -> bool {
        match client.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    connection_id = %client.id,
                    msg_len = msg.len(),
                    "send queue full, dropping message"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.counter_inc("gateway.dropped", &[], 1);
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    pub fn count_for_role(&self, role: Role) -> usize {
        self.clients.iter().filter(|c| c.value().role() == role).count()
    }

    pub fn ids_for(&self, audience: &Audience) -> Vec<ConnectionId> {
        self.clients
            .iter()
            .filter(|c| c.value().matches(audience))
            .map(|c| c.key().clone())
            .collect()
    }

    /// Remove clients that have been silent for longer than the client timeout.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<ConnectionId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive(self.client_timeout))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for id in dead {
            if self.unregister(&id) {
                removed += 1;
                tracing::info!(connection_id = %id, "cleaned up dead client");
            }
        }
        removed
    }

    fn record_count(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.gauge_set("gateway.clients", &[], self.clients.len() as f64);
        }
    }
}

/// Drive an accepted socket: queued frames and pings out, liveness in.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client: Arc<Client>,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    heartbeat_interval: Duration,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_client = Arc::clone(&client);
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat_interval);
        ping_interval.tick().await; // first tick is immediate

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
                msg = rx.recv() => match msg {
                    Some(text) => {
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                },
                _ = ping_interval.tick() => {
                    // unregistered by the cleanup task
                    if !writer_client.is_connected() {
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_client.id, "sent ping");
                }
            }
        }
        writer_client.connected.store(false, Ordering::Relaxed);
    });

    let reader_client = Arc::clone(&client);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            reader_client.record_activity();
            match msg {
                WsMessage::Text(_) => {
                    tracing::debug!(connection_id = %reader_client.id, "ignoring client frame after handshake");
                }
                WsMessage::Close(_) => break,
                // axum answers pings itself; pongs only refresh liveness
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    let _ = registry.unregister(&client.id);
    tracing::info!(connection_id = %client.id, role = %client.role(), "client disconnected");
}

/// Periodically drop clients that stopped answering pings.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = registry.cleanup_dead_clients();
                    if removed > 0 {
                        tracing::info!(removed, "dead client cleanup");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ClientRegistry {
        ClientRegistry::new(32, Duration::from_secs(90))
    }

    #[test]
    fn register_and_unregister() {
        let registry = registry();
        assert_eq!(registry.count(), 0);

        let (a, _rx1) = registry.register(Principal::operator());
        let (b, _rx2) = registry.register(Principal::end_user("customer-1"));
        assert_eq!(registry.count(), 2);
        assert!(a.id.as_str().starts_with("conn_"));

        assert!(registry.unregister(&a.id));
        assert!(!registry.unregister(&a.id));
        assert!(!a.is_connected());
        assert_eq!(registry.count(), 1);

        registry.unregister(&b.id);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn broadcast_respects_audience() {
        let registry = registry();
        let (_op, mut op_rx) = registry.register(Principal::operator());
        let (_alice, mut alice_rx) = registry.register(Principal::end_user("alice"));
        let (_bob, mut bob_rx) = registry.register(Principal::end_user("bob"));

        assert_eq!(registry.broadcast(&Audience::Role(Role::Operator), "ops"), 1);
        assert_eq!(op_rx.try_recv().unwrap(), "ops");
        assert!(alice_rx.try_recv().is_err());

        assert_eq!(registry.broadcast(&Audience::Subject("alice".into()), "hi alice"), 1);
        assert_eq!(alice_rx.try_recv().unwrap(), "hi alice");
        assert!(bob_rx.try_recv().is_err());

        assert_eq!(registry.broadcast(&Audience::All, "everyone"), 3);
        assert_eq!(bob_rx.try_recv().unwrap(), "everyone");
    }

    #[test]
    fn send_to_specific_client() {
        let registry = registry();
        let (client, mut rx) = registry.register(Principal::operator());
        assert!(registry.send_to(&client.id, "test message".into()));
        assert_eq!(rx.try_recv().unwrap(), "test message");
        assert!(!registry.send_to(&ConnectionId::new(), "nobody".into()));
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let metrics = Arc::new(MetricsRecorder::new());
        let registry = ClientRegistry::new(2, Duration::from_secs(90)).with_metrics(Arc::clone(&metrics));
        let (client, _rx) = registry.register(Principal::operator());

        assert!(registry.send_to(&client.id, "msg1".into()));
        assert!(registry.send_to(&client.id, "msg2".into()));
        assert!(!registry.send_to(&client.id, "msg3".into()));
        assert_eq!(metrics.counter_get("gateway.dropped", &[]), 1);
        assert_eq!(metrics.gauge_get("gateway.clients", &[]), 1.0);
    }

    #[test]
    fn counts_by_role() {
        let registry = registry();
        let (_a, _ra) = registry.register(Principal::operator());
        let (_b, _rb) = registry.register(Principal::end_user("x"));
        let (_c, _rc) = registry.register(Principal::end_user("y"));
        assert_eq!(registry.count_for_role(Role::EndUser), 2);
        assert_eq!(registry.ids_for(&Audience::Role(Role::Operator)).len(), 1);
    }

    #[test]
    fn cleanup_removes_silent_clients() {
        let registry = registry();
        let (silent, _rx1) = registry.register(Principal::operator());
        let (_active, _rx2) = registry.register(Principal::operator());
        silent.last_seen.store(0, Ordering::Relaxed);

        assert_eq!(registry.cleanup_dead_clients(), 1);
        assert_eq!(registry.count(), 1);
        assert!(registry.get(&silent.id).is_none());
    }

    #[test]
    fn activity_keeps_client_alive() {
        let registry = registry();
        let (client, _rx) = registry.register(Principal::operator());
        client.last_seen.store(0, Ordering::Relaxed);
        client.record_activity();
        assert!(client.is_alive(Duration::from_secs(90)));
    }

    #[tokio::test]
    async fn cleanup_task_stops_on_shutdown() {
        let registry = Arc::new(registry());
        let shutdown = CancellationToken::new();
        let handle = start_cleanup_task(registry, Duration::from_millis(10), shutdown.clone());
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("cleanup task did not stop")
            .unwrap();
    }
}
