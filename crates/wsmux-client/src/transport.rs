//! Physical connection contract.
//!
//! The client never speaks a socket protocol itself. A [`Connector`] opens a
//! duplex connection for a [`ConnectRequest`] and reports lifecycle and inbound
//! frames through the [`EventSink`] it was handed. Events are dispatched on the
//! caller's turn: `EventSink::emit` runs all routing and callbacks before it
//! returns.
//!
//! Connectors must not emit events from inside `connect()` itself; the client
//! installs the returned connection only after `connect()` returns.

use std::sync::{Arc, Weak};

use bytes::Bytes;

use wsmux_core::Result;

use crate::client::{Client, ClientInner};

/// Outbound or inbound physical frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

/// What a connection reports back to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake finished; the connection can carry frames.
    Opened,
    /// Connection is gone (clean close, failed handshake, or drop).
    Closed,
    /// Inbound UTF-8 text frame.
    Text(String),
    /// Inbound binary frame.
    Binary(Bytes),
    /// Transport-level failure. Does not imply `Closed`.
    Error(String),
}

/// Parameters for one physical connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Server url including the encoded query string.
    pub url: String,
    /// Sub-protocol to negotiate.
    pub subprotocol: String,
}

/// Opens physical connections.
pub trait Connector: Send + Sync {
    fn connect(&self, request: &ConnectRequest, events: EventSink) -> Result<Arc<dyn Connection>>;
}

/// A live (or connecting) physical connection. Exclusively owned by one client.
pub trait Connection: Send + Sync {
    fn send(&self, frame: Frame) -> Result<()>;
    /// Start closing. The connection reports `Closed` through its sink.
    fn close(&self);
    fn is_open(&self) -> bool;
}

/// Event entry point bound to one connection attempt.
///
/// Events from an attempt that has since been replaced by a newer `connect()`
/// are ignored.
#[derive(Clone)]
pub struct EventSink {
    client: Weak<ClientInner>,
    generation: u64,
}

impl EventSink {
    pub(crate) fn new(client: &Arc<ClientInner>, generation: u64) -> Self {
        Self {
            client: Arc::downgrade(client),
            generation,
        }
    }

    /// Deliver one event. No-op once the client has been dropped.
    pub fn emit(&self, event: TransportEvent) {
        if let Some(inner) = self.client.upgrade() {
            Client::from_inner(inner).handle_event(self.generation, event);
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("generation", &self.generation)
            .finish()
    }
}
