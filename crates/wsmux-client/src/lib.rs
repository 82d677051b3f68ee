//! wsmux client library.
//!
//! A single physical duplex connection carries many named channels. Each
//! [`Channel`] is an RPC + pub/sub endpoint; the [`Client`] owns the connection,
//! routes inbound envelopes by channel name, and handles the open handshake,
//! persistent session identity, and reconnects.
//!
//! The physical connection and the durable store are supplied by the caller
//! through [`Connector`] and [`SessionStore`]. [`loopback::LoopbackConnector`]
//! is an in-process connector for tests and demos.

pub mod channel;
pub mod client;
pub mod config;
mod handlers;
pub mod loopback;
pub mod pending;
pub mod store;
pub mod transport;

pub use channel::{Channel, ChannelState, ConnectionInfo, Delivery};
pub use client::{Client, ErrorEvent, Inbound, DEFAULT_RECONNECT_INTERVAL, DEFAULT_SUBPROTOCOL};
pub use config::ClientConfig;
pub use pending::PendingCall;
pub use store::{FileStore, MemoryStore, SessionStore};
pub use transport::{ConnectRequest, Connection, Connector, EventSink, Frame, TransportEvent};

pub use wsmux_core::{ClientError, Data, Envelope, ErrorCode, Kind, Result};
