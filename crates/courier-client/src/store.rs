use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use courier_core::events::Notification;
use courier_core::security::Role;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViewKind {
    Notifications,
    UnreadCount,
    Tickets,
}

impl ViewKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notifications => "notifications",
            Self::UnreadCount => "unread-count",
            Self::Tickets => "tickets",
        }
    }
}

/// Role-scoped cache key, rendered as `<role>:<view>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ViewKey {
    pub scope: Role,
    pub view: ViewKind,
}

impl ViewKey {
    pub fn new(scope: Role, view: ViewKind) -> Self {
        Self { scope, view }
    }

    pub fn notifications(scope: Role) -> Self {
        Self::new(scope, ViewKind::Notifications)
    }

    pub fn unread_count(scope: Role) -> Self {
        Self::new(scope, ViewKind::UnreadCount)
    }

    pub fn tickets(scope: Role) -> Self {
        Self::new(scope, ViewKind::Tickets)
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.view.as_str())
    }
}

/// First page of the notification list plus the server-side total.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationPage {
    pub items: Vec<Notification>,
    pub total: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CachedValue {
    Notifications(NotificationPage),
    UnreadCount(u64),
    Tickets(Value),
}

/// Query-keyed view cache owned by the application.
///
/// Implementations must tolerate calls from the dispatch path; writes to a
/// single key are assumed to be serialized by the caller.
pub trait CachedViewStore: Send + Sync {
    fn read(&self, key: &ViewKey) -> Option<CachedValue>;
    fn write(&self, key: &ViewKey, value: CachedValue);
    /// Mark stale so the next read refetches. The cached value stays readable.
    fn invalidate(&self, key: &ViewKey);
}

#[derive(Debug)]
struct Entry {
    value: CachedValue,
    stale: bool,
}

/// In-memory [`CachedViewStore`] with optional refetch notifications.
#[derive(Debug, Default)]
pub struct MemoryViewStore {
    entries: RwLock<HashMap<ViewKey, Entry>>,
    refetch: Option<mpsc::UnboundedSender<ViewKey>>,
    invalidations: AtomicU64,
}

impl MemoryViewStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidated keys that hold a value are sent on `refetch`.
    pub fn with_refetch(refetch: mpsc::UnboundedSender<ViewKey>) -> Self {
        Self {
            refetch: Some(refetch),
            ..Self::default()
        }
    }

    /// Populate a view as the normal fetch path would.
    pub fn seed(&self, key: ViewKey, value: CachedValue) {
        self.write(&key, value);
    }

    /// `None` when the key holds nothing.
    pub fn is_stale(&self, key: &ViewKey) -> Option<bool> {
        self.entries.read().get(key).map(|e| e.stale)
    }

    pub fn invalidation_count(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Current keys, sorted by their rendered form.
    pub fn keys(&self) -> Vec<ViewKey> {
        let mut keys: Vec<ViewKey> = self.entries.read().keys().copied().collect();
        keys.sort_by_key(ToString::to_string);
        keys
    }
}

impl CachedViewStore for MemoryViewStore {
    fn read(&self, key: &ViewKey) -> Option<CachedValue> {
        self.entries.read().get(key).map(|e| e.value.clone())
    }

    fn write(&self, key: &ViewKey, value: CachedValue) {
        let _ = self
            .entries
            .write()
            .insert(*key, Entry { value, stale: false });
    }

    fn invalidate(&self, key: &ViewKey) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        let marked = match self.entries.write().get_mut(key) {
            Some(entry) => {
                entry.stale = true;
                true
            }
            None => false,
        };
        tracing::debug!(key = %key, marked, "view invalidated");
        if marked {
            if let Some(tx) = &self.refetch {
                if tx.send(*key).is_err() {
                    tracing::debug!(key = %key, "refetch listener gone");
                }
            }
        }
    }
}
