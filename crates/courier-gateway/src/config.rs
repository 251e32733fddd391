use std::time::Duration;

use courier_core::settings::GatewaySettings;

/// Gateway configuration.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub host: String,
    /// 0 picks a free port.
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    /// Clients silent for longer than this are dropped by the cleanup task.
    pub client_timeout: Duration,
    pub handshake_timeout: Duration,
    pub cleanup_interval: Duration,
    /// Capacity of the publish → bridge broadcast channel.
    pub publish_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from(&GatewaySettings::default())
    }
}

impl From<&GatewaySettings> for GatewayConfig {
    fn from(s: &GatewaySettings) -> Self {
        let heartbeat_interval = Duration::from_secs(s.heartbeat_interval_secs.max(1));
        Self {
            host: s.host.clone(),
            port: s.port,
            max_send_queue: s.max_send_queue.max(1),
            heartbeat_interval,
            client_timeout: Duration::from_secs(s.client_timeout_secs.max(1)),
            handshake_timeout: Duration::from_millis(s.handshake_timeout_ms.max(1)),
            cleanup_interval: heartbeat_interval * 2,
            publish_buffer: 1024,
        }
    }
}

impl GatewayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
