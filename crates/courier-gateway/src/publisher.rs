use std::sync::Arc;

use courier_core::errors::TransportError;
use courier_core::events::EventName;
use courier_core::protocol::{self, ServerFrame};
use courier_core::security::Role;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::auth::Principal;
use crate::client::ClientRegistry;

/// Which connected clients an event is for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Audience {
    All,
    Role(Role),
    /// A single end user, across all of their open sockets.
    Subject(String),
}

impl Audience {
    pub fn matches(&self, principal: &Principal) -> bool {
        match self {
            Self::All => true,
            Self::Role(role) => principal.role == *role,
            Self::Subject(subject) => principal.subject.as_deref() == Some(subject.as_str()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Envelope {
    pub audience: Audience,
    pub name: String,
    pub payload: Value,
}

impl Envelope {
    pub fn to_frame_text(&self) -> Result<String, TransportError> {
        protocol::encode(&ServerFrame::event(self.name.clone(), self.payload.clone()))
    }
}

/// Entry point for whatever originates events. Cheap to clone.
#[derive(Clone)]
pub struct Publisher {
    tx: broadcast::Sender<Envelope>,
}

impl Publisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Queue an event for delivery. `false` when no bridge is listening.
    pub fn publish(&self, audience: Audience, name: impl Into<String>, payload: Value) -> bool {
        let envelope = Envelope {
            audience,
            name: name.into(),
            payload,
        };
        tracing::debug!(event = %envelope.name, audience = ?envelope.audience, "publishing");
        self.tx.send(envelope).is_ok()
    }

    /// Publish a typed payload under one of the known event names.
    pub fn publish_event<T: Serialize>(
        &self,
        audience: Audience,
        name: EventName,
        payload: &T,
    ) -> Result<bool, serde_json::Error> {
        let payload = serde_json::to_value(payload)?;
        Ok(self.publish(audience, name.as_str(), payload))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}

/// Forward published envelopes to the matching clients until shutdown.
pub fn start_bridge(
    registry: Arc<ClientRegistry>,
    mut rx: broadcast::Receiver<Envelope>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                () = shutdown.cancelled() => break,
                received = rx.recv() => received,
            };
            match received {
                Ok(envelope) => match envelope.to_frame_text() {
                    Ok(text) => {
                        let delivered = registry.broadcast(&envelope.audience, &text);
                        tracing::trace!(event = %envelope.name, delivered, "event fanned out");
                    }
                    Err(e) => tracing::warn!(event = %envelope.name, error = %e, "unencodable event"),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event bridge lagged, dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("event bridge channel closed");
                    break;
                }
            }
        }
    })
}
