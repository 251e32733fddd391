//! In-process transport for exercising the connection lifecycle without a server.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use courier_core::errors::TransportError;
use courier_core::events::RawEvent;
use courier_core::protocol::Handshake;
use futures::Stream;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::transport::{FrameStream, Inbound, Transport};

type Link = mpsc::UnboundedSender<Result<Inbound, TransportError>>;

enum Scripted {
    Fail(TransportError),
    Hang,
}

#[derive(Default)]
struct MockState {
    handshakes: Mutex<Vec<Handshake>>,
    link: Mutex<Option<Link>>,
    script: Mutex<VecDeque<Scripted>>,
    reject_reason: Mutex<Option<String>>,
    opens: AtomicUsize,
    live: Arc<AtomicUsize>,
}

/// Scriptable [`Transport`]. Clones share state, so a test keeps one clone
/// and hands the other to the `ConnectionManager`.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next `open` fails with `err` (queued; one per call).
    pub fn fail_next(&self, err: TransportError) {
        self.state.script.lock().push_back(Scripted::Fail(err));
    }

    /// Next `open` never completes.
    pub fn hang_next(&self) {
        self.state.script.lock().push_back(Scripted::Hang);
    }

    /// Every subsequent `open` is refused by the "server".
    pub fn reject_with(&self, reason: impl Into<String>) {
        *self.state.reject_reason.lock() = Some(reason.into());
    }

    pub fn accept_all(&self) {
        *self.state.reject_reason.lock() = None;
    }

    /// Push a frame down the current link. `false` if no link is listening.
    pub fn emit(&self, name: &str, payload: Value) -> bool {
        self.emit_raw(RawEvent::new(name, payload))
    }

    pub fn emit_raw(&self, raw: RawEvent) -> bool {
        match self.state.link.lock().as_ref() {
            Some(link) => link.send(Ok(Inbound::Event(raw))).is_ok(),
            None => false,
        }
    }

    /// Signal liveness on the current link without carrying an event.
    pub fn heartbeat(&self) -> bool {
        match self.state.link.lock().as_ref() {
            Some(link) => link.send(Ok(Inbound::Heartbeat)).is_ok(),
            None => false,
        }
    }

    /// Simulate a network drop on the current link.
    pub fn drop_link(&self) -> bool {
        match self.state.link.lock().take() {
            Some(link) => link
                .send(Err(TransportError::Network("link dropped".into())))
                .is_ok(),
            None => false,
        }
    }

    /// Simulate the server closing the current link cleanly.
    pub fn close_link(&self) -> bool {
        self.state.link.lock().take().is_some()
    }

    pub fn handshakes(&self) -> Vec<Handshake> {
        self.state.handshakes.lock().clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Streams handed out and not yet dropped.
    pub fn live_links(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, handshake: &Handshake) -> Result<FrameStream, TransportError> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        self.state.handshakes.lock().push(handshake.clone());

        let scripted = self.state.script.lock().pop_front();
        match scripted {
            Some(Scripted::Fail(err)) => return Err(err),
            Some(Scripted::Hang) => return std::future::pending().await,
            None => {}
        }
        let rejection = self.state.reject_reason.lock().clone();
        if let Some(reason) = rejection {
            return Err(TransportError::Rejected(reason));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.state.link.lock() = Some(tx);
        self.state.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::pin(MockLink {
            rx,
            live: Arc::clone(&self.state.live),
        }))
    }
}

struct MockLink {
    rx: mpsc::UnboundedReceiver<Result<Inbound, TransportError>>,
    live: Arc<AtomicUsize>,
}

impl Stream for MockLink {
    type Item = Result<Inbound, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
