use std::time::Duration;

use courier_core::settings::ReconnectSettings;
use rand::Rng;

/// Reconnect delay policy: exponential growth from `initial_delay`, capped at `max_delay`.
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.5,
        }
    }
}

impl BackoffConfig {
    /// Same curve without randomization. Used where timing must be predictable.
    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }
}

impl From<&ReconnectSettings> for BackoffConfig {
    fn from(s: &ReconnectSettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(s.initial_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms.max(s.initial_delay_ms)),
            multiplier: s.multiplier.max(1.0),
            jitter_factor: s.jitter_factor.clamp(0.0, 1.0),
        }
    }
}

/// Attempt counter for one connection. Attempts are unbounded; only the delay is capped.
#[derive(Clone, Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Failed attempts since the last successful connect.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay before the next attempt. Advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.jittered(base)
    }

    /// Un-jittered delay for a given attempt: `initial * multiplier^attempt`, capped.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let initial_ms = self.config.initial_delay.as_millis() as f64;
        let max_ms = self.config.max_delay.as_millis() as f64;
        // powi saturates to inf for large attempts; min() brings it back to the cap
        let exp_ms = initial_ms * self.config.multiplier.powi(attempt.min(64) as i32);
        Duration::from_millis(exp_ms.min(max_ms) as u64)
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return base;
        }
        let base_ms = base.as_millis() as f64;
        let range = base_ms * self.config.jitter_factor;
        let offset = rand::thread_rng().gen_range(-range..=range);
        let max_ms = self.config.max_delay.as_millis() as f64;
        Duration::from_millis((base_ms + offset).clamp(0.0, max_ms) as u64)
    }
}
