use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::HandlerError;
use crate::ids::{EventId, NotificationId};

/// The fixed set of event names a client understands.
/// Anything else arriving on the wire is discarded before dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    #[serde(rename = "notification-created")]
    NotificationCreated,
    #[serde(rename = "unread-count-changed")]
    UnreadCountChanged,
    #[serde(rename = "ticket-updated")]
    TicketUpdated,
}

impl EventName {
    pub const ALL: [EventName; 3] = [
        Self::NotificationCreated,
        Self::UnreadCountChanged,
        Self::TicketUpdated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotificationCreated => "notification-created",
            Self::UnreadCountChanged => "unread-count-changed",
            Self::TicketUpdated => "ticket-updated",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|n| n.as_str() == name)
    }

    /// Events describing the creation of a durable object carry a stable
    /// identity and participate in dedup.
    pub fn is_identity_bearing(self) -> bool {
        matches!(self, Self::NotificationCreated)
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event frame as it came off the wire, name not yet resolved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub name: String,
    #[serde(default)]
    pub payload: Value,
}

impl RawEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// A resolved event handed to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub name: EventName,
    pub id: Option<EventId>,
    pub payload: Value,
}

impl Event {
    /// Resolve a raw frame. Returns `None` for names outside the registered set.
    pub fn from_raw(raw: RawEvent) -> Option<Self> {
        let name = EventName::parse(&raw.name)?;
        let id = if name.is_identity_bearing() {
            identity_of(name, &raw.payload)
        } else {
            None
        };
        Some(Self {
            name,
            id,
            payload: raw.payload,
        })
    }

    /// Deserialize the payload into its typed form.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        serde_json::from_value(self.payload.clone()).map_err(|source| HandlerError::Payload {
            event: self.name.as_str(),
            source,
        })
    }
}

/// Extract the dedup identity. Numeric ids are accepted and stringified.
fn identity_of(name: EventName, payload: &Value) -> Option<EventId> {
    let raw = match name {
        EventName::NotificationCreated => payload.get("notification")?.get("id")?,
        EventName::UnreadCountChanged | EventName::TicketUpdated => return None,
    };
    match raw {
        Value::String(s) if !s.is_empty() => Some(EventId::from_raw(s.clone())),
        Value::Number(n) => Some(EventId::from_raw(n.to_string())),
        _ => None,
    }
}

// --- Payloads ---

/// A notification as delivered by the server. Fields beyond `id` are opaque here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(deserialize_with = "string_or_number")]
    pub id: NotificationId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Notification {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: NotificationId::from_raw(id),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.fields.insert(key.into(), value);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationCreated {
    pub notification: Notification,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountChanged {
    pub unread_count: u64,
}

/// Signal only; which role's views are affected is decided by the receiving connection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketUpdated {}

fn string_or_number<'de, D>(de: D) -> Result<NotificationId, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(de)? {
        Value::String(s) => Ok(NotificationId::from_raw(s)),
        Value::Number(n) => Ok(NotificationId::from_raw(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}
