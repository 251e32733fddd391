use std::time::Duration;

use courier_core::settings::ClientSettings;

use crate::backoff::BackoffConfig;

/// Runtime configuration for a [`ConnectionManager`](crate::ConnectionManager).
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Gateway endpoint. Only consulted by callers that build a [`WsTransport`](crate::WsTransport).
    pub url: String,
    /// Upper bound on transport open + handshake round trip.
    pub handshake_timeout: Duration,
    /// Longest gap between inbound frames (pings included) before the link counts as dead.
    pub read_idle_timeout: Duration,
    pub backoff: BackoffConfig,
    pub dedup_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&ClientSettings::default())
    }
}

impl From<&ClientSettings> for ClientConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            url: settings.url.clone(),
            handshake_timeout: Duration::from_millis(settings.handshake_timeout_ms.max(1)),
            read_idle_timeout: Duration::from_millis(settings.read_idle_timeout_ms.max(1)),
            backoff: BackoffConfig::from(&settings.reconnect),
            dedup_capacity: settings.dedup_capacity,
        }
    }
}
