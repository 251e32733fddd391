//! Handlers that fold server events into the cached views of one role.
//!
//! | event                  | effect                                                  |
//! |------------------------|---------------------------------------------------------|
//! | `notification-created` | prepend to cached list (dedup, cap), bump total + unread |
//! | `unread-count-changed` | overwrite unread count                                  |
//! | `ticket-updated`       | invalidate tickets view                                 |

use std::sync::Arc;

use courier_core::errors::HandlerError;
use courier_core::events::{Event, EventName, NotificationCreated, UnreadCountChanged};
use courier_core::security::Role;
use courier_core::settings::ClientSettings;
use tracing::debug;

use crate::registry::{Subscription, SubscriptionRegistry};
use crate::store::{CachedValue, CachedViewStore, ViewKey};

#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Maximum cached notification list length.
    pub list_cap: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { list_cap: 50 }
    }
}

impl From<&ClientSettings> for SyncConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            list_cap: settings.list_cap.max(1),
        }
    }
}

/// Cache mutation rules for a single role.
pub struct CacheSynchronizer {
    store: Arc<dyn CachedViewStore>,
    role: Role,
    config: SyncConfig,
}

impl CacheSynchronizer {
    pub fn new(store: Arc<dyn CachedViewStore>, role: Role, config: SyncConfig) -> Self {
        Self {
            store,
            role,
            config,
        }
    }

    /// Register the reference handlers. Dropping the returned bindings unregisters them.
    pub fn bind(
        registry: &SubscriptionRegistry,
        store: Arc<dyn CachedViewStore>,
        role: Role,
        config: SyncConfig,
    ) -> SyncBindings {
        let sync = Arc::new(Self::new(store, role, config));
        let subscriptions = vec![
            {
                let sync = Arc::clone(&sync);
                registry.on(EventName::NotificationCreated, move |e| {
                    sync.on_notification_created(e)
                })
            },
            {
                let sync = Arc::clone(&sync);
                registry.on(EventName::UnreadCountChanged, move |e| {
                    sync.on_unread_count_changed(e)
                })
            },
            registry.on(EventName::TicketUpdated, move |e| sync.on_ticket_updated(e)),
        ];
        debug!(role = %role, "cache synchronizer bound");
        SyncBindings {
            role,
            subscriptions,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn on_notification_created(&self, event: &Event) -> Result<(), HandlerError> {
        let NotificationCreated { notification } = event.decode()?;
        let list_key = ViewKey::notifications(self.role);

        let mut page = match self.store.read(&list_key) {
            Some(CachedValue::Notifications(page)) => page,
            Some(_) => {
                return Err(HandlerError::failed(format!(
                    "{list_key} holds a value of the wrong kind"
                )))
            }
            None => {
                debug!(key = %list_key, "notification list not cached, leaving it for the fetch path");
                return Ok(());
            }
        };
        if page.items.iter().any(|n| n.id == notification.id) {
            debug!(key = %list_key, id = %notification.id, "notification already cached");
            return Ok(());
        }

        page.items.insert(0, notification);
        page.items.truncate(self.config.list_cap);
        page.total += 1;
        self.store.write(&list_key, CachedValue::Notifications(page));

        let unread_key = ViewKey::unread_count(self.role);
        if let Some(CachedValue::UnreadCount(n)) = self.store.read(&unread_key) {
            self.store
                .write(&unread_key, CachedValue::UnreadCount(n.saturating_add(1)));
        }
        Ok(())
    }

    /// Last write wins. Written even when nothing was cached.
    pub fn on_unread_count_changed(&self, event: &Event) -> Result<(), HandlerError> {
        let UnreadCountChanged { unread_count } = event.decode()?;
        self.store.write(
            &ViewKey::unread_count(self.role),
            CachedValue::UnreadCount(unread_count),
        );
        Ok(())
    }

    pub fn on_ticket_updated(&self, _event: &Event) -> Result<(), HandlerError> {
        self.store.invalidate(&ViewKey::tickets(self.role));
        Ok(())
    }
}

/// Owns the synchronizer's subscriptions.
#[must_use = "dropping SyncBindings unbinds the cache synchronizer"]
#[derive(Debug)]
pub struct SyncBindings {
    role: Role,
    subscriptions: Vec<Subscription>,
}

impl SyncBindings {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn unbind(self) {
        for sub in &self.subscriptions {
            let _ = sub.dispose();
        }
    }
}
