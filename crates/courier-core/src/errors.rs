use std::time::Duration;

/// Failures of the persistent channel itself.
/// Classifies errors as retryable (reconnect with backoff) or terminal.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TransportError {
    // Terminal: retrying with the same handshake cannot succeed
    #[error("handshake rejected: {0}")]
    Rejected(String),
    #[error("protocol error: {0}")]
    Protocol(String),

    // Retryable
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    #[error("no frames received for {0:?}")]
    IdleTimeout(Duration),
    #[error("connection closed by peer")]
    Closed,
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect(_)
                | Self::Network(_)
                | Self::HandshakeTimeout(_)
                | Self::IdleTimeout(_)
                | Self::Closed
        )
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Rejected(_) => "rejected",
            Self::Protocol(_) => "protocol",
            Self::Connect(_) => "connect",
            Self::Network(_) => "network",
            Self::HandshakeTimeout(_) => "handshake_timeout",
            Self::IdleTimeout(_) => "idle_timeout",
            Self::Closed => "closed",
        }
    }
}

/// Error returned by an event handler. Always isolated to that handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("malformed {event} payload: {source}")]
    Payload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}
