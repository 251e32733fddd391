//! JSON text frames exchanged over the WebSocket channel.
//!
//! Every frame is internally tagged by `type`. The client sends exactly one
//! `handshake` frame after the socket opens; the server answers with `ready`
//! or `rejected`, then streams `event` frames until either side closes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::TransportError;
use crate::events::RawEvent;
use crate::ids::ConnectionId;
use crate::security::{Credential, Role};

/// Handshake parameters carried once per connect.
#[derive(Clone, Debug)]
pub struct Handshake {
    pub role: Role,
    pub credential: Option<Credential>,
}

impl Handshake {
    pub fn new(role: Role, credential: Option<Credential>) -> Self {
        Self { role, credential }
    }

    pub fn to_frame(&self) -> ClientFrame {
        ClientFrame::Handshake {
            role: self.role,
            credential: self.credential.as_ref().map(|c| c.expose().to_owned()),
        }
    }
}

/// Client → server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Handshake {
        role: Role,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credential: Option<String>,
    },
}

/// Server → client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    Ready { connection_id: ConnectionId },
    Rejected { reason: String },
    Event {
        name: String,
        #[serde(default)]
        payload: Value,
    },
}

impl ServerFrame {
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        Self::Event {
            name: name.into(),
            payload,
        }
    }

    pub fn into_raw_event(self) -> Option<RawEvent> {
        match self {
            Self::Event { name, payload } => Some(RawEvent { name, payload }),
            Self::Ready { .. } | Self::Rejected { .. } => None,
        }
    }
}

pub fn encode<T: Serialize>(frame: &T) -> Result<String, TransportError> {
    serde_json::to_string(frame).map_err(|e| TransportError::Protocol(e.to_string()))
}

pub fn decode_server(text: &str) -> Result<ServerFrame, TransportError> {
    serde_json::from_str(text).map_err(|e| TransportError::Protocol(e.to_string()))
}

pub fn decode_client(text: &str) -> Result<ClientFrame, TransportError> {
    serde_json::from_str(text).map_err(|e| TransportError::Protocol(e.to_string()))
}
