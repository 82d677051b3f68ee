//! In-process connector that records traffic instead of touching the network.
//!
//! Each `connect()` creates a [`LoopbackConnection`] that starts in the
//! connecting state. The test (or demo) drives it: `accept()` reports the
//! handshake, `deliver_*` injects server frames, `drop_link()` simulates the
//! server going away. Everything the client sends is recorded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::time::Instant;

use wsmux_core::error::{ClientError, Result};
use wsmux_core::protocol::binary::{decode_binary, encode_binary};
use wsmux_core::protocol::text::{decode_text, encode_text};
use wsmux_core::Envelope;

use crate::handlers::lock;
use crate::transport::{ConnectRequest, Connection, Connector, EventSink, Frame, TransportEvent};

/// One recorded `connect()` call.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub request: ConnectRequest,
    pub at: Instant,
}

#[derive(Default)]
struct Shared {
    attempts: Mutex<Vec<Attempt>>,
    current: Mutex<Option<Arc<LoopbackConnection>>>,
    refuse: AtomicBool,
    defer_close: AtomicBool,
}

/// Clonable connector; clones observe the same attempts and connections.
#[derive(Clone, Default)]
pub struct LoopbackConnector {
    shared: Arc<Shared>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `connect()` calls fail synchronously.
    pub fn refuse(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::Release);
    }

    /// Make `close()` on new connections stop traffic without reporting
    /// `Closed`; call [`LoopbackConnection::complete_close`] to report it.
    pub fn defer_close(&self, defer: bool) {
        self.shared.defer_close.store(defer, Ordering::Release);
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        lock(&self.shared.attempts).clone()
    }

    pub fn attempt_count(&self) -> usize {
        lock(&self.shared.attempts).len()
    }

    /// Connection created by the latest successful `connect()`.
    pub fn connection(&self) -> Option<Arc<LoopbackConnection>> {
        lock(&self.shared.current).clone()
    }
}

impl Connector for LoopbackConnector {
    fn connect(&self, request: &ConnectRequest, events: EventSink) -> Result<Arc<dyn Connection>> {
        lock(&self.shared.attempts).push(Attempt {
            request: request.clone(),
            at: Instant::now(),
        });
        if self.shared.refuse.load(Ordering::Acquire) {
            return Err(ClientError::Connection(format!("refused: {}", request.url)));
        }

        let conn = Arc::new(LoopbackConnection {
            request: request.clone(),
            events,
            defer_close: self.shared.defer_close.load(Ordering::Acquire),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        });
        *lock(&self.shared.current) = Some(Arc::clone(&conn));
        Ok(conn)
    }
}

/// Recording connection driven by the test.
pub struct LoopbackConnection {
    request: ConnectRequest,
    events: EventSink,
    defer_close: bool,
    open: AtomicBool,
    closed: AtomicBool,
    sent: Mutex<Vec<Frame>>,
}

impl LoopbackConnection {
    pub fn request(&self) -> &ConnectRequest {
        &self.request
    }

    /// Finish the handshake.
    pub fn accept(&self) {
        self.open.store(true, Ordering::Release);
        self.events.emit(TransportEvent::Opened);
    }

    pub fn deliver_text(&self, s: impl Into<String>) {
        self.events.emit(TransportEvent::Text(s.into()));
    }

    pub fn deliver_binary(&self, b: impl Into<Bytes>) {
        self.events.emit(TransportEvent::Binary(b.into()));
    }

    /// Encode and deliver an envelope in its text or binary form.
    pub fn deliver(&self, env: &Envelope) -> Result<()> {
        match env.binary {
            Some(_) => self.deliver_binary(encode_binary(env)?),
            None => self.deliver_text(encode_text(env)?),
        }
        Ok(())
    }

    pub fn fail(&self, msg: impl Into<String>) {
        self.events.emit(TransportEvent::Error(msg.into()));
    }

    /// Server side goes away.
    pub fn drop_link(&self) {
        self.shutdown();
    }

    /// Report a deferred `Closed`.
    pub fn complete_close(&self) {
        self.shutdown();
    }

    /// Frames sent so far.
    pub fn sent(&self) -> Vec<Frame> {
        lock(&self.sent).clone()
    }

    /// Drain and decode everything sent so far.
    pub fn take_sent(&self) -> Vec<Envelope> {
        std::mem::take(&mut *lock(&self.sent))
            .into_iter()
            .filter_map(|f| match f {
                Frame::Text(s) => decode_text(&s).ok(),
                Frame::Binary(b) => decode_binary(b).ok(),
            })
            .collect()
    }

    fn shutdown(&self) {
        self.open.store(false, Ordering::Release);
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.events.emit(TransportEvent::Closed);
        }
    }
}

impl Connection for LoopbackConnection {
    fn send(&self, frame: Frame) -> Result<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(ClientError::NotConnected);
        }
        lock(&self.sent).push(frame);
        Ok(())
    }

    fn close(&self) {
        if self.defer_close {
            self.open.store(false, Ordering::Release);
        } else {
            self.shutdown();
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
