pub mod errors;
pub mod events;
pub mod ids;
pub mod protocol;
pub mod security;
pub mod settings;

pub use errors::{HandlerError, SettingsError, TransportError};
pub use events::{Event, EventName, RawEvent};
pub use ids::{ConnectionId, EventId, NotificationId};
pub use security::{Credential, Role};
