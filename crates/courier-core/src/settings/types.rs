use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CourierSettings {
    pub client: ClientSettings,
    pub gateway: GatewaySettings,
    pub telemetry: TelemetrySettings,
}

/// Client-side connection, dedup and cache settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientSettings {
    /// WebSocket endpoint of the gateway.
    pub url: String,
    pub handshake_timeout_ms: u64,
    /// Silence on an open link after which it is treated as dropped.
    /// Should exceed the gateway heartbeat interval.
    pub read_idle_timeout_ms: u64,
    pub reconnect: ReconnectSettings,
    /// Recorded ids above which the dedup cache evicts its oldest half.
    pub dedup_capacity: usize,
    /// Maximum length of a cached notification list.
    pub list_cap: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9190/ws".into(),
            handshake_timeout_ms: 5_000,
            read_idle_timeout_ms: 90_000,
            reconnect: ReconnectSettings::default(),
            dedup_capacity: 500,
            list_cap: 50,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconnectSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Fraction of the delay randomized in either direction (0.0 disables).
    pub jitter_factor: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter_factor: 0.5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewaySettings {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
    pub handshake_timeout_ms: u64,
    /// End-user credential → subject. Empty means no end-user can connect.
    pub end_user_tokens: BTreeMap<String, String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9190,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 90,
            handshake_timeout_ms: 5_000,
            end_user_tokens: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TelemetrySettings {
    /// Default level; `RUST_LOG` wins when set.
    pub log_level: String,
    /// Per-module overrides, e.g. `{"courier_client": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
    pub json: bool,
    pub metrics_enabled: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            module_levels: BTreeMap::new(),
            json: true,
            metrics_enabled: true,
        }
    }
}
