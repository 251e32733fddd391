use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use courier_core::protocol::{self, ClientFrame, ServerFrame};
use courier_core::security::Role;
use courier_telemetry::MetricsRecorder;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::CredentialVerifier;
use crate::client::{self, ClientRegistry};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::publisher::{self, Publisher};

/// Shared state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub config: Arc<GatewayConfig>,
    pub shutdown: CancellationToken,
    pub started_at: DateTime<Utc>,
    pub metrics: Option<Arc<MetricsRecorder>>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn start(
    config: GatewayConfig,
    verifier: Arc<dyn CredentialVerifier>,
) -> Result<GatewayHandle, GatewayError> {
    start_with_metrics(config, verifier, None).await
}

/// Bind, spawn the server, event bridge and cleanup tasks, and return a handle to them.
pub async fn start_with_metrics(
    config: GatewayConfig,
    verifier: Arc<dyn CredentialVerifier>,
    metrics: Option<Arc<MetricsRecorder>>,
) -> Result<GatewayHandle, GatewayError> {
    let mut registry = ClientRegistry::new(config.max_send_queue, config.client_timeout);
    if let Some(metrics) = &metrics {
        registry = registry.with_metrics(Arc::clone(metrics));
    }
    let registry = Arc::new(registry);
    let shutdown = CancellationToken::new();

    let publisher = Publisher::new(config.publish_buffer);
    let bridge = publisher::start_bridge(Arc::clone(&registry), publisher.subscribe(), shutdown.clone());
    let cleanup = client::start_cleanup_task(Arc::clone(&registry), config.cleanup_interval, shutdown.clone());

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| GatewayError::Bind {
            addr: addr.clone(),
            source,
        })?;
    let local_addr = listener.local_addr().map_err(GatewayError::LocalAddr)?;

    let state = AppState {
        registry: Arc::clone(&registry),
        verifier,
        config: Arc::new(config),
        shutdown: shutdown.clone(),
        started_at: Utc::now(),
        metrics,
    };
    let router = build_router(state);

    let graceful = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(async move { graceful.cancelled().await })
            .await
        {
            tracing::error!(error = %e, "gateway server failed");
        }
    });

    tracing::info!(port = local_addr.port(), "courier gateway started");

    Ok(GatewayHandle {
        port: local_addr.port(),
        publisher,
        registry,
        shutdown,
        tasks: vec![server, bridge, cleanup],
    })
}

/// Handle returned by `start()`. Dropping it stops the gateway without waiting.
pub struct GatewayHandle {
    pub port: u16,
    publisher: Publisher,
    registry: Arc<ClientRegistry>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl GatewayHandle {
    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Close every socket and wait for the background tasks to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "gateway task ended abnormally");
            }
        }
        tracing::info!("courier gateway stopped");
    }
}

impl Drop for GatewayHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Authenticate the first frame, then hand the socket to the client pump.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let hello = tokio::time::timeout(state.config.handshake_timeout, read_handshake(&mut socket)).await;
    let (role, credential) = match hello {
        Ok(Ok(hello)) => hello,
        Ok(Err(reason)) => {
            tracing::debug!(reason = %reason, "handshake failed");
            reject(socket, &reason).await;
            return;
        }
        Err(_) => {
            tracing::warn!("handshake timed out");
            reject(socket, "handshake timeout").await;
            return;
        }
    };

    let principal = match state.verifier.verify(role, credential.as_deref()).await {
        Ok(principal) => principal,
        Err(err) => {
            tracing::warn!(role = %role, error = %err, "handshake rejected");
            reject(socket, &err.to_string()).await;
            return;
        }
    };

    let (client, rx) = state.registry.register(principal);
    let ready = match protocol::encode(&ServerFrame::Ready {
        connection_id: client.id.clone(),
    }) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode ready frame");
            let _ = state.registry.unregister(&client.id);
            return;
        }
    };
    if socket.send(Message::Text(ready.into())).await.is_err() {
        let _ = state.registry.unregister(&client.id);
        return;
    }

    tracing::info!(
        connection_id = %client.id,
        role = %client.role(),
        subject = client.principal.subject.as_deref().unwrap_or("-"),
        "client connected"
    );
    client::handle_ws_connection(
        socket,
        client,
        rx,
        state.registry,
        state.config.heartbeat_interval,
        state.shutdown,
    )
    .await;
}

async fn read_handshake(socket: &mut WebSocket) -> Result<(Role, Option<String>), String> {
    while let Some(msg) = socket.recv().await {
        match msg.map_err(|e| e.to_string())? {
            Message::Text(text) => {
                return match protocol::decode_client(text.as_str()) {
                    Ok(ClientFrame::Handshake { role, credential }) => Ok((role, credential)),
                    Err(e) => Err(e.to_string()),
                };
            }
            Message::Close(_) => break,
            _ => continue,
        }
    }
    Err("closed before handshake".into())
}

async fn reject(mut socket: WebSocket, reason: &str) {
    let frame = ServerFrame::Rejected {
        reason: reason.to_string(),
    };
    if let Ok(text) = protocol::encode(&frame) {
        let _ = socket.send(Message::Text(text.into())).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "clients": state.registry.count(),
        "operators": state.registry.count_for_role(Role::Operator),
        "endUsers": state.registry.count_for_role(Role::EndUser),
        "startedAt": state.started_at.to_rfc3339(),
    }))
}

/// Every recorded series, or an empty list when metrics are disabled.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let series = state
        .metrics
        .as_ref()
        .map(|m| m.snapshot())
        .unwrap_or_default();
    Json(serde_json::json!({
        "enabled": state.metrics.is_some(),
        "metrics": series,
    }))
}
