//! Connection multiplexer.
//!
//! Responsibilities:
//! - Own the single physical connection (all outbound frames go through it)
//! - Keep the ordered channel registry (lazily populated, keyed by lowercase name)
//! - Route inbound frames by channel name; unknown channels hit `on_message`
//! - Persist the session id handed out by the server and send it on reconnect
//! - Reconnect after a fixed interval when enabled (cancellable task)

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::task::JoinHandle;

use wsmux_core::error::{ClientError, Result};
use wsmux_core::protocol::binary::{decode_binary, encode_binary};
use wsmux_core::protocol::text::{decode_text, encode_text};
use wsmux_core::topics::ControlTopic;
use wsmux_core::Envelope;

use crate::channel::Channel;
use crate::config::ClientConfig;
use crate::handlers::{lock, Slot};
use crate::store::SessionStore;
use crate::transport::{ConnectRequest, Connection, Connector, EventSink, Frame, TransportEvent};

/// Sub-protocol offered on every connection.
pub const DEFAULT_SUBPROTOCOL: &str = "XSocketsNET";

/// Reconnect delay used until `auto_reconnect` is called.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(5000);

const PERSISTENT_ID_PARAM: &str = "persistentid";

/// Inbound frame no registered channel claimed.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Text(Envelope),
    /// The undecoded binary frame.
    Binary(Bytes),
}

/// What `on_error` receives.
#[derive(Debug)]
pub enum ErrorEvent {
    /// The connection reported a failure.
    Transport(ClientError),
    /// The server sent an ERROR envelope.
    Remote(Envelope),
}

struct ChannelEntry {
    channel: Channel,
    created_seq: u64,
}

#[derive(Debug, Clone, Copy)]
struct ReconnectPolicy {
    enabled: bool,
    interval: Duration,
}

#[derive(Default)]
struct ClientHandlers {
    on_open: Slot<dyn Fn() + Send + Sync>,
    on_close: Slot<dyn Fn() + Send + Sync>,
    on_error: Slot<dyn Fn(ErrorEvent) + Send + Sync>,
    on_auth_failed: Slot<dyn Fn(String) + Send + Sync>,
    on_message: Slot<dyn Fn(Inbound) + Send + Sync>,
}

pub(crate) struct ClientInner {
    url: String,
    subprotocol: String,
    connector: Arc<dyn Connector>,
    store: Arc<dyn SessionStore>,
    parameters: Mutex<BTreeMap<String, String>>,
    persistent_id: Mutex<Option<String>>,

    channels: DashMap<String, ChannelEntry>,
    channel_seq: AtomicU64,

    connection: Mutex<Option<Arc<dyn Connection>>>,
    generation: AtomicU64,
    reached_open: AtomicBool,

    reconnect: Mutex<ReconnectPolicy>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,

    handlers: ClientHandlers,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.reconnect_task).take() {
            task.abort();
        }
    }
}

/// Clonable client handle. All clones share one connection and registry.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Build a client for `url`. The stored session id for `url` is loaded now.
    pub fn new(
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self::build(url.into(), DEFAULT_SUBPROTOCOL.to_string(), connector, store)
    }

    fn build(
        url: String,
        subprotocol: String,
        connector: Arc<dyn Connector>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let persistent_id = store.get(&url);
        if let Some(pid) = &persistent_id {
            tracing::debug!(url = %url, persistent_id = %pid, "loaded persistent id");
        }

        Self {
            inner: Arc::new(ClientInner {
                url,
                subprotocol,
                connector,
                store,
                parameters: Mutex::new(BTreeMap::new()),
                persistent_id: Mutex::new(persistent_id),
                channels: DashMap::new(),
                channel_seq: AtomicU64::new(1),
                connection: Mutex::new(None),
                generation: AtomicU64::new(0),
                reached_open: AtomicBool::new(false),
                reconnect: Mutex::new(ReconnectPolicy {
                    enabled: false,
                    interval: DEFAULT_RECONNECT_INTERVAL,
                }),
                reconnect_task: Mutex::new(None),
                handlers: ClientHandlers::default(),
            }),
        }
    }

    /// Build a client from validated config: sub-protocol, parameters,
    /// reconnect policy, and pre-registered channels.
    pub fn from_config(
        cfg: &ClientConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        cfg.validate()?;
        let client = Self::build(
            cfg.client.url.clone(),
            cfg.client.subprotocol.clone(),
            connector,
            store,
        );
        client.set_parameters(cfg.client.parameters.clone());
        client.auto_reconnect(cfg.client.reconnect.enabled, cfg.client.reconnect.interval());
        for name in &cfg.channels {
            client.channel(name);
        }
        Ok(client)
    }

    pub(crate) fn from_inner(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn subprotocol(&self) -> &str {
        &self.inner.subprotocol
    }

    // --------------------
    // Callbacks
    // --------------------

    pub fn on_open(&self, f: impl Fn() + Send + Sync + 'static) {
        self.inner.handlers.on_open.set(Arc::new(f));
    }

    pub fn on_close(&self, f: impl Fn() + Send + Sync + 'static) {
        self.inner.handlers.on_close.set(Arc::new(f));
    }

    pub fn on_error(&self, f: impl Fn(ErrorEvent) + Send + Sync + 'static) {
        self.inner.handlers.on_error.set(Arc::new(f));
    }

    /// Receives the `D` of the server's auth-failed envelope.
    pub fn on_authentication_failed(&self, f: impl Fn(String) + Send + Sync + 'static) {
        self.inner.handlers.on_auth_failed.set(Arc::new(f));
    }

    /// Fallback for frames addressed to channels that are not registered.
    pub fn on_message(&self, f: impl Fn(Inbound) + Send + Sync + 'static) {
        self.inner.handlers.on_message.set(Arc::new(f));
    }

    // --------------------
    // Settings
    // --------------------

    /// Replace the query-string parameters used by the next `connect()`.
    pub fn set_parameters<K, V>(&self, params: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        *lock(&self.inner.parameters) = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
    }

    /// Enable or disable reconnecting after a drop, with a fixed delay.
    pub fn auto_reconnect(&self, enabled: bool, interval: Duration) {
        *lock(&self.inner.reconnect) = ReconnectPolicy { enabled, interval };
        if !enabled {
            self.cancel_reconnect();
        }
    }

    pub fn persistent_id(&self) -> Option<String> {
        lock(&self.inner.persistent_id).clone()
    }

    /// Remember the session id and write it to the durable store.
    pub fn set_persistent_id(&self, id: &str) {
        {
            let mut current = lock(&self.inner.persistent_id);
            if current.as_deref() == Some(id) {
                return;
            }
            *current = Some(id.to_string());
        }
        if let Err(e) = self.inner.store.set(&self.inner.url, id) {
            tracing::warn!(url = %self.inner.url, error = %e, "persist session id failed");
        }
    }

    // --------------------
    // Connection
    // --------------------

    /// True iff a physical connection exists and reports open.
    pub fn is_connected(&self) -> bool {
        self.connection().is_some_and(|c| c.is_open())
    }

    /// Open the physical connection. No-op while already connected.
    pub fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.cancel_reconnect();

        let request = ConnectRequest {
            url: self.connect_url(),
            subprotocol: self.inner.subprotocol.clone(),
        };
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let sink = EventSink::new(&self.inner, generation);

        // A replaced connection may still owe us `Closed`; it would now be
        // stale, so end its session here.
        let stale = lock(&self.inner.connection).take();
        if let Some(stale) = stale {
            self.end_session();
            stale.close();
        }

        tracing::info!(url = %request.url, generation, "connecting");
        let conn = self.inner.connector.connect(&request, sink)?;
        *lock(&self.inner.connection) = Some(conn);
        Ok(())
    }

    /// Close the physical connection.
    ///
    /// `reconnect` replaces the auto-reconnect flag; with `false` any scheduled
    /// reconnect is cancelled and none is scheduled on the resulting close.
    pub fn close(&self, reconnect: bool) {
        lock(&self.inner.reconnect).enabled = reconnect;
        if !reconnect {
            self.cancel_reconnect();
        }
        if let Some(conn) = self.connection() {
            tracing::info!(url = %self.inner.url, "closing connection");
            conn.close();
        }
    }

    // --------------------
    // Channels
    // --------------------

    /// Look up a channel, creating and opening it if missing.
    pub fn channel(&self, name: &str) -> Channel {
        let key = name.to_lowercase();
        if let Some(existing) = self.lookup(&key) {
            return existing;
        }

        let created = Channel::new(&key, Arc::downgrade(&self.inner));
        let channel = match self.inner.channels.entry(key) {
            Entry::Occupied(o) => return o.get().channel.clone(),
            Entry::Vacant(v) => {
                let created_seq = self.inner.channel_seq.fetch_add(1, Ordering::Relaxed);
                v.insert(ChannelEntry {
                    channel: created.clone(),
                    created_seq,
                });
                created
            }
        };

        tracing::debug!(channel = %channel.name(), "channel registered");
        if self.is_connected() {
            channel.send_init(self);
        }
        channel
    }

    /// Look up a channel; with `create == false` a missing channel yields `None`.
    pub fn channel_with(&self, name: &str, create: bool) -> Option<Channel> {
        if create {
            Some(self.channel(name))
        } else {
            self.lookup(&name.to_lowercase())
        }
    }

    /// Registered channels in registration order.
    pub fn channels(&self) -> Vec<Channel> {
        let mut entries: Vec<(u64, Channel)> = self
            .inner
            .channels
            .iter()
            .map(|e| (e.value().created_seq, e.value().channel.clone()))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, c)| c).collect()
    }

    /// Remove `channel` from the registry. Idempotent.
    pub fn dispose_channel(&self, channel: &Channel) {
        let removed = self
            .inner
            .channels
            .remove_if(channel.name(), |_, e| e.channel.same_as(channel));
        if removed.is_some() {
            tracing::debug!(channel = %channel.name(), "channel disposed");
        }
    }

    fn lookup(&self, key: &str) -> Option<Channel> {
        self.inner.channels.get(key).map(|e| e.value().channel.clone())
    }

    // --------------------
    // Outbound
    // --------------------

    pub(crate) fn send_envelope(&self, env: &Envelope) -> Result<()> {
        let frame = match &env.binary {
            Some(_) => Frame::Binary(encode_binary(env)?),
            None => Frame::Text(encode_text(env)?),
        };
        let conn = self.connection().ok_or(ClientError::NotConnected)?;
        tracing::debug!(channel = %env.channel, topic = %env.topic, "send");
        conn.send(frame)
    }

    fn connection(&self) -> Option<Arc<dyn Connection>> {
        lock(&self.inner.connection).clone()
    }

    fn connect_url(&self) -> String {
        let mut params = lock(&self.inner.parameters);
        if let Some(pid) = self.persistent_id() {
            params.insert(PERSISTENT_ID_PARAM.to_string(), pid);
        }
        if params.is_empty() {
            return self.inner.url.clone();
        }

        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={}", encode_component(v)))
            .collect::<Vec<_>>()
            .join("&");
        let sep = if self.inner.url.contains('?') { '&' } else { '?' };
        format!("{}{sep}{query}", self.inner.url)
    }

    // --------------------
    // Inbound
    // --------------------

    pub(crate) fn handle_event(&self, generation: u64, event: TransportEvent) {
        let current = self.inner.generation.load(Ordering::Acquire);
        if generation != current {
            tracing::debug!(generation, current, "ignoring event from stale connection");
            return;
        }

        match event {
            TransportEvent::Opened => self.on_transport_open(),
            TransportEvent::Closed => self.on_transport_closed(),
            TransportEvent::Text(s) => self.on_text(&s),
            TransportEvent::Binary(b) => self.on_binary(b),
            TransportEvent::Error(msg) => {
                tracing::warn!(error = %msg, "transport error");
                self.fire_error(ErrorEvent::Transport(ClientError::Connection(msg)));
            }
        }
    }

    fn on_transport_open(&self) {
        self.inner.reached_open.store(true, Ordering::Release);
        tracing::info!(url = %self.inner.url, "connection open");

        if let Some(f) = self.inner.handlers.on_open.get() {
            f();
        }
        for channel in self.channels() {
            channel.send_init(self);
        }
    }

    fn on_transport_closed(&self) {
        lock(&self.inner.connection).take();
        self.end_session();

        if lock(&self.inner.reconnect).enabled {
            self.schedule_reconnect();
        }
    }

    /// Fire `on_close` and close every channel locally, once per opened connection.
    fn end_session(&self) {
        if !self.inner.reached_open.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::info!(url = %self.inner.url, "connection closed");
        if let Some(f) = self.inner.handlers.on_close.get() {
            f();
        }
        for channel in self.channels() {
            channel.close(false);
        }
    }

    fn on_text(&self, s: &str) {
        let env = match decode_text(s) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(error = %e, "dropping text frame");
                return;
            }
        };

        match ControlTopic::parse(&env.topic) {
            Some(ControlTopic::Open) => {
                if let Some(pid) = env.parse_data().get("PI").and_then(Value::as_str) {
                    self.set_persistent_id(pid);
                }
            }
            Some(ControlTopic::Error) => {
                tracing::warn!(channel = %env.channel, data = %env.data, "server error");
                self.fire_error(ErrorEvent::Remote(env));
                return;
            }
            Some(ControlTopic::AuthFailed) => {
                tracing::warn!(url = %self.inner.url, "authentication failed");
                if let Some(f) = self.inner.handlers.on_auth_failed.get() {
                    f(env.data);
                }
                self.close(false);
                return;
            }
            _ => {}
        }

        self.route(env, Inbound::Text);
    }

    fn on_binary(&self, frame: Bytes) {
        match decode_binary(frame.clone()) {
            Ok(env) => self.route(env, |_| Inbound::Binary(frame)),
            Err(e) => tracing::warn!(error = %e, len = frame.len(), "dropping binary frame"),
        }
    }

    /// Deliver to the named channel without creating it.
    fn route(&self, env: Envelope, unrouted: impl FnOnce(Envelope) -> Inbound) {
        let Some(channel) = self.lookup(&env.channel.to_lowercase()) else {
            tracing::debug!(channel = %env.channel, topic = %env.topic, "no such channel");
            if let Some(f) = self.inner.handlers.on_message.get() {
                f(unrouted(env));
            }
            return;
        };

        if let Err(e) = channel.dispatch(env) {
            tracing::warn!(channel = %channel.name(), error = %e, "dispatch rejected");
        }
    }

    fn fire_error(&self, event: ErrorEvent) {
        if let Some(f) = self.inner.handlers.on_error.get() {
            f(event);
        }
    }

    // --------------------
    // Reconnect
    // --------------------

    fn schedule_reconnect(&self) {
        let interval = lock(&self.inner.reconnect).interval;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no tokio runtime; reconnect not scheduled");
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        let task = runtime.spawn(async move {
            tokio::time::sleep(interval).await;
            let Some(inner) = weak.upgrade() else { return };
            // Detach our own handle so `connect()` does not abort this task.
            lock(&inner.reconnect_task).take();

            let client = Client::from_inner(inner);
            tracing::info!(url = %client.url(), "reconnecting");
            if let Err(e) = client.connect() {
                tracing::warn!(error = %e, "reconnect attempt failed");
                if lock(&client.inner.reconnect).enabled {
                    client.schedule_reconnect();
                }
            }
        });

        tracing::debug!(delay = ?interval, "reconnect scheduled");
        if let Some(prev) = lock(&self.inner.reconnect_task).replace(task) {
            prev.abort();
        }
    }

    fn cancel_reconnect(&self) {
        if let Some(task) = lock(&self.inner.reconnect_task).take() {
            task.abort();
            tracing::debug!("scheduled reconnect cancelled");
        }
    }

    /// True while a reconnect is waiting to fire.
    pub fn reconnect_pending(&self) -> bool {
        lock(&self.inner.reconnect_task)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.inner.url)
            .field("channels", &self.inner.channels.len())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Percent-encode a query value (same unreserved set as JavaScript's
/// `encodeURIComponent`).
fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
