use std::pin::Pin;

use async_trait::async_trait;
use courier_core::errors::TransportError;
use courier_core::events::RawEvent;
use courier_core::protocol::{self, Handshake, ServerFrame};
use futures::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// What an open link yields.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    Event(RawEvent),
    /// Any other frame from the server (ping, pong, non-event text). Proves the link is alive.
    Heartbeat,
}

/// Inbound traffic of one authenticated link. Dropping the stream closes the link.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Inbound, TransportError>> + Send>>;

/// Opens authenticated links to the gateway.
///
/// `open` returns only after the server accepted the handshake. A server-side
/// refusal surfaces as [`TransportError::Rejected`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, handshake: &Handshake) -> Result<FrameStream, TransportError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport speaking the JSON frame protocol.
#[derive(Clone, Debug)]
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, handshake: &Handshake) -> Result<FrameStream, TransportError> {
        let (mut ws, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let hello = protocol::encode(&handshake.to_frame())?;
        ws.send(Message::Text(hello.into()))
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => match protocol::decode_server(text.as_str())? {
                    ServerFrame::Ready { connection_id } => {
                        debug!(url = %self.url, connection_id = %connection_id, "handshake accepted");
                        break;
                    }
                    ServerFrame::Rejected { reason } => {
                        let _ = ws.close(None).await;
                        return Err(TransportError::Rejected(reason));
                    }
                    ServerFrame::Event { name, .. } => {
                        return Err(TransportError::Protocol(format!(
                            "event '{name}' before handshake completed"
                        )));
                    }
                },
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::Network(e.to_string())),
            }
        }

        Ok(Box::pin(event_stream(ws)))
    }
}

/// Map text frames to events until the socket closes or errors.
fn event_stream(ws: WsStream) -> impl Stream<Item = Result<Inbound, TransportError>> + Send {
    futures::stream::unfold(Some(ws), |state| async move {
        let mut ws = state?;
        let item = match ws.next().await {
            Some(Ok(Message::Text(text))) => match protocol::decode_server(text.as_str()) {
                Ok(frame) => match frame.into_raw_event() {
                    Some(raw) => Inbound::Event(raw),
                    None => {
                        debug!("ignoring non-event frame");
                        Inbound::Heartbeat
                    }
                },
                Err(e) => {
                    debug!(error = %e, "skipping undecodable frame");
                    Inbound::Heartbeat
                }
            },
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "server closed the link");
                return None;
            }
            Some(Ok(_)) => Inbound::Heartbeat,
            Some(Err(e)) => {
                warn!(error = %e, "websocket read failed");
                return Some((Err(TransportError::Network(e.to_string())), None));
            }
            None => return None,
        };
        Some((Ok(item), Some(ws)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::security::{Credential, Role};

    #[tokio::test]
    async fn unreachable_endpoint_is_a_retryable_connect_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = WsTransport::new(format!("ws://127.0.0.1:{port}/ws"));
        let handshake = Handshake::new(Role::EndUser, Some(Credential::new("tok-1")));
        let err = match transport.open(&handshake).await {
            Ok(_) => panic!("nothing is listening"),
            Err(e) => e,
        };
        assert!(matches!(err, TransportError::Connect(_)), "{err:?}");
        assert!(err.is_retryable());
    }
}
