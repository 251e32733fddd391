use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use courier_core::errors::HandlerError;
use courier_core::events::{Event, EventName, RawEvent};
use courier_telemetry::MetricsRecorder;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::dedup::DedupCache;
use crate::registry::{Handler, SubscriptionRegistry};

/// What happened to one inbound frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Name outside the registered set.
    UnknownEvent,
    /// Known name, nobody listening. The identity is not recorded.
    NoSubscribers,
    /// Identity already seen within the dedup window.
    Duplicate,
    Delivered { handlers: usize, failed: usize },
}

/// Dedup filter + fan-out. Frames are dispatched one at a time, to completion.
pub struct Dispatcher {
    registry: SubscriptionRegistry,
    dedup: Mutex<DedupCache>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl Dispatcher {
    pub fn new(registry: SubscriptionRegistry, dedup_capacity: usize) -> Self {
        Self {
            registry,
            dedup: Mutex::new(DedupCache::new(dedup_capacity)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn dispatch(&self, raw: RawEvent) -> DispatchOutcome {
        let started = Instant::now();
        if EventName::parse(&raw.name).is_none() {
            debug!(event = %raw.name, "discarding unknown event");
            self.count("events.unknown", &[]);
            return DispatchOutcome::UnknownEvent;
        }
        let Some(event) = Event::from_raw(raw) else {
            return DispatchOutcome::UnknownEvent;
        };

        let handlers = self.registry.handlers_for(event.name);
        if handlers.is_empty() {
            debug!(event = %event.name, "no subscribers, discarding");
            self.count("events.unsubscribed", &[("event", event.name.as_str())]);
            return DispatchOutcome::NoSubscribers;
        }

        if let Some(id) = &event.id {
            let mut dedup = self.dedup.lock();
            if dedup.seen(id) {
                debug!(event = %event.name, id = %id, "duplicate delivery suppressed");
                drop(dedup);
                self.count("events.duplicate", &[]);
                return DispatchOutcome::Duplicate;
            }
            dedup.record(id.clone());
        }

        let mut failed = 0;
        for handler in &handlers {
            if let Err(reason) = invoke(handler, &event) {
                failed += 1;
                self.count("handlers.failed", &[("event", event.name.as_str())]);
                match reason {
                    Failure::Returned(err) => {
                        warn!(event = %event.name, error = %err, "event handler failed");
                    }
                    Failure::Panicked(msg) => {
                        error!(event = %event.name, panic = %msg, "event handler panicked");
                    }
                }
            }
        }

        self.count("events.delivered", &[("event", event.name.as_str())]);
        if let Some(metrics) = &self.metrics {
            metrics.histogram_observe(
                "dispatch.duration_us",
                &[],
                started.elapsed().as_micros() as f64,
            );
        }
        DispatchOutcome::Delivered {
            handlers: handlers.len(),
            failed,
        }
    }

    /// Forget every recorded identity.
    pub fn reset_dedup(&self) {
        self.dedup.lock().clear();
    }

    pub fn dedup_len(&self) -> usize {
        self.dedup.lock().len()
    }

    fn count(&self, name: &str, labels: &[(&str, &str)]) {
        if let Some(metrics) = &self.metrics {
            metrics.counter_inc(name, labels, 1);
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("dedup_len", &self.dedup_len())
            .finish()
    }
}

enum Failure {
    Returned(HandlerError),
    Panicked(String),
}

fn invoke(handler: &Handler, event: &Event) -> Result<(), Failure> {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(Failure::Returned(err)),
        Err(payload) => Err(Failure::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
