//! Client side of the real-time event channel.
//!
//! A [`ConnectionManager`] owns one authenticated connection per process,
//! repairs it with bounded backoff, and feeds inbound frames to a
//! [`Dispatcher`]. The dispatcher suppresses redelivered creation events
//! through a [`DedupCache`] and fans every event out to the handlers held by
//! the [`SubscriptionRegistry`]. [`CacheSynchronizer`] is the reference set of
//! handlers that keeps a [`CachedViewStore`] coherent with the server.

pub mod backoff;
pub mod config;
pub mod connection;
pub mod dedup;
pub mod dispatcher;
pub mod registry;
pub mod store;
pub mod sync;
#[cfg(test)]
mod testing;
pub mod transport;

pub use backoff::{Backoff, BackoffConfig};
pub use config::ClientConfig;
pub use connection::{ConnectOutcome, ConnectionManager, ConnectionState, RejectReason};
pub use dedup::DedupCache;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use registry::{Handler, Subscription, SubscriptionRegistry};
pub use store::{CachedValue, CachedViewStore, MemoryViewStore, NotificationPage, ViewKey, ViewKind};
pub use sync::{CacheSynchronizer, SyncBindings, SyncConfig};
pub use transport::{FrameStream, Inbound, Transport, WsTransport};
