//! Logical channel multiplexed over the client's connection.
//!
//! A channel owns two topic-keyed registries:
//! - pending calls: one per topic, consumed by the first matching reply;
//! - subscriptions: one per topic, kept until removed.
//!
//! Inbound dispatch order for user topics is pending call, then subscription,
//! then the channel's `on_message` fallback. Nothing fires for user topics
//! unless the channel is [`ChannelState::Open`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use wsmux_core::error::{ClientError, Result};
use wsmux_core::topics::{self, ControlTopic};
use wsmux_core::{Data, Envelope, Kind};

use crate::client::{Client, ClientInner};
use crate::handlers::{lock, Slot};
use crate::pending::PendingCall;

/// Channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Closed,
    /// INIT sent, waiting for the server's OPEN.
    Opening,
    Open,
}

/// Payload of the server's OPEN envelope.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ConnectionInfo {
    #[serde(rename = "CI", default, deserialize_with = "null_as_empty")]
    pub connection_id: String,
    #[serde(rename = "PI", default, deserialize_with = "null_as_empty")]
    pub persistent_id: String,
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

/// What a subscription callback receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Text envelope; `D` parsed as JSON.
    Json(Value),
    /// Binary envelope; raw bytes plus `D` parsed as metadata.
    Binary { binary: Bytes, metadata: Value },
}

impl Delivery {
    /// The JSON part: the value itself, or the binary metadata.
    pub fn into_value(self) -> Value {
        match self {
            Delivery::Json(v) => v,
            Delivery::Binary { metadata, .. } => metadata,
        }
    }
}

type SubscriptionFn = Arc<dyn Fn(Delivery) + Send + Sync>;
pub(crate) type ReplyFn = Box<dyn FnOnce(Value) + Send>;

/// Cheap, clonable handle to one channel.
#[derive(Clone)]
pub struct Channel {
    pub(crate) inner: Arc<ChannelInner>,
}

pub(crate) struct ChannelInner {
    name: String,
    client: Weak<ClientInner>,
    state: Mutex<ChannelState>,
    connection_id: Mutex<Option<String>>,
    detached: AtomicBool,
    subscriptions: DashMap<String, SubscriptionFn>,
    pending: Mutex<HashMap<String, ReplyFn>>,
    on_open: Slot<dyn Fn(ConnectionInfo) + Send + Sync>,
    on_close: Slot<dyn Fn() + Send + Sync>,
    on_message: Slot<dyn Fn(Envelope) + Send + Sync>,
}

impl Channel {
    pub(crate) fn new(name: &str, client: Weak<ClientInner>) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                name: name.to_lowercase(),
                client,
                state: Mutex::new(ChannelState::Closed),
                connection_id: Mutex::new(None),
                detached: AtomicBool::new(false),
                subscriptions: DashMap::new(),
                pending: Mutex::new(HashMap::new()),
                on_open: Slot::default(),
                on_close: Slot::default(),
                on_message: Slot::default(),
            }),
        }
    }

    /// Lowercase channel name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> ChannelState {
        *lock(&self.inner.state)
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Server-assigned id from the last OPEN.
    pub fn connection_id(&self) -> Option<String> {
        lock(&self.inner.connection_id).clone()
    }

    /// True once the channel has been disposed from its client.
    pub fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::Acquire)
    }

    pub fn same_as(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // --------------------
    // Callbacks
    // --------------------

    pub fn on_open(&self, f: impl Fn(ConnectionInfo) + Send + Sync + 'static) {
        self.inner.on_open.set(Arc::new(f));
    }

    pub fn on_close(&self, f: impl Fn() + Send + Sync + 'static) {
        self.inner.on_close.set(Arc::new(f));
    }

    /// Fallback for user topics with no pending call and no subscription.
    pub fn on_message(&self, f: impl Fn(Envelope) + Send + Sync + 'static) {
        self.inner.on_message.set(Arc::new(f));
    }

    // --------------------
    // Lifecycle
    // --------------------

    /// Ask the server to open this channel.
    ///
    /// Fails unless the channel is closed. Silently does nothing while the
    /// client is disconnected; the client sends INIT for every registered
    /// channel once the connection opens.
    pub fn open(&self) -> Result<()> {
        let state = self.state();
        if state != ChannelState::Closed {
            return Err(ClientError::InvalidState(format!(
                "open() on channel {} in state {state:?}",
                self.name()
            )));
        }
        if let Some(client) = self.connected_client() {
            self.send_init(&client);
        }
        Ok(())
    }

    /// Close the channel; `dispose` also removes it from its client.
    ///
    /// A disposed channel keeps working as a value but every send becomes a
    /// no-op.
    pub fn close(&self, dispose: bool) {
        if self.is_open() {
            if let Some(client) = self.connected_client() {
                self.send(&client, Envelope::control(self.name(), topics::CLOSE, Data::empty()));
            }
        }
        self.set_state(ChannelState::Closed);
        self.fire_close();

        if dispose {
            if let Some(inner) = self.inner.client.upgrade() {
                Client::from_inner(inner).dispose_channel(self);
            }
            self.inner.detached.store(true, Ordering::Release);
        }
    }

    // --------------------
    // RPC
    // --------------------

    /// Call `topic` on the server-side channel.
    ///
    /// The returned [`PendingCall`] is always usable; its callback fires only
    /// if a reply for the topic arrives. Any earlier pending call on the same
    /// topic is dropped.
    pub fn invoke(&self, topic: &str, data: impl Into<Data>) -> PendingCall {
        let topic = topic.to_lowercase();
        self.take_pending(&topic);

        if let Some(client) = self.connected_client() {
            self.send(&client, Envelope::new(self.name(), &topic, data.into()));
        }
        PendingCall::new(self.clone(), topic)
    }

    /// Send a binary payload with JSON metadata.
    pub fn invoke_binary(&self, topic: &str, binary: Bytes, metadata: impl Into<Data>) {
        let topic = topic.to_lowercase();
        if let Some(client) = self.connected_client() {
            self.send(
                &client,
                Envelope::with_binary(self.name(), &topic, metadata.into(), binary),
            );
        }
    }

    /// Fire-and-forget publish on `topic`.
    pub fn publish(&self, topic: &str, data: impl Into<Data>) {
        let _ = self.invoke(topic, data);
    }

    pub fn set_property(&self, name: &str, value: impl Into<Data>) -> PendingCall {
        self.invoke(&format!("{}{name}", topics::SET_PREFIX), value)
    }

    /// Read a server-side property. `f` fires once with the value.
    pub fn get_property(&self, name: &str, f: impl Fn(Value) + Send + Sync + 'static) {
        let topic = format!("{}{name}", topics::GET_PREFIX).to_lowercase();
        let weak = Arc::downgrade(&self.inner);
        let key = topic.clone();
        self.on(&topic, move |d| {
            if let Some(inner) = weak.upgrade() {
                inner.subscriptions.remove(&key);
            }
            f(d.into_value());
        });
        let _ = self.invoke(&topic, Data::empty());
    }

    // --------------------
    // Pub/Sub
    // --------------------

    /// Register a local handler for `topic`, replacing any previous one.
    pub fn on(&self, topic: &str, f: impl Fn(Delivery) + Send + Sync + 'static) {
        self.inner
            .subscriptions
            .insert(topic.to_lowercase(), Arc::new(f));
    }

    /// Remove the local handler for `topic`.
    pub fn off(&self, topic: &str) {
        self.inner.subscriptions.remove(&topic.to_lowercase());
    }

    /// Register a handler and tell the server to publish `topic` to us.
    ///
    /// SUBSCRIBE is sent on every call while connected.
    pub fn subscribe(&self, topic: &str, f: impl Fn(Delivery) + Send + Sync + 'static) {
        let topic = topic.to_lowercase();
        self.on(&topic, f);
        if let Some(client) = self.connected_client() {
            self.send(
                &client,
                Envelope::control(self.name(), topics::SUBSCRIBE, subscription_data(&topic)),
            );
        }
    }

    pub fn unsubscribe(&self, topic: &str) {
        let topic = topic.to_lowercase();
        self.off(&topic);
        if let Some(client) = self.connected_client() {
            self.send(
                &client,
                Envelope::control(self.name(), topics::UNSUBSCRIBE, subscription_data(&topic)),
            );
        }
    }

    pub fn has_subscription(&self, topic: &str) -> bool {
        self.inner.subscriptions.contains_key(&topic.to_lowercase())
    }

    pub fn has_pending(&self, topic: &str) -> bool {
        lock(&self.inner.pending).contains_key(&topic.to_lowercase())
    }

    // --------------------
    // Inbound
    // --------------------

    /// Dispatch one inbound envelope addressed to this channel.
    pub fn dispatch(&self, env: Envelope) -> Result<()> {
        let topic = env.topic.to_lowercase();

        match ControlTopic::parse(&topic) {
            Some(ControlTopic::Open) => return self.handle_open(&env),
            Some(ControlTopic::Close) => {
                self.set_state(ChannelState::Closed);
                tracing::debug!(channel = %self.name(), "channel closed by server");
                self.fire_close();
                return Ok(());
            }
            _ => {}
        }

        let state = self.state();
        if state != ChannelState::Open {
            return Err(ClientError::InvalidState(format!(
                "topic {topic} on channel {} in state {state:?}",
                self.name()
            )));
        }

        if ControlTopic::parse(&topic) == Some(ControlTopic::Ping) {
            if let Some(client) = self.connected_client() {
                self.send(
                    &client,
                    Envelope::control(self.name(), topics::PONG, Data::Raw(env.data)),
                );
            }
            return Ok(());
        }

        if let Some(reply) = self.take_pending(&topic) {
            tracing::debug!(channel = %self.name(), topic = %topic, "reply resolved pending call");
            reply(env.parse_data());
            return Ok(());
        }

        let sub = self
            .inner
            .subscriptions
            .get(&topic)
            .map(|r| Arc::clone(r.value()));
        if let Some(sub) = sub {
            let delivery = match env.kind() {
                Kind::Text => Delivery::Json(env.parse_data()),
                Kind::Binary => Delivery::Binary {
                    metadata: env.parse_data(),
                    binary: env.binary.unwrap_or_default(),
                },
            };
            sub(delivery);
            return Ok(());
        }

        if let Some(f) = self.inner.on_message.get() {
            f(env);
        } else {
            tracing::debug!(channel = %self.name(), topic = %topic, "unhandled message");
        }
        Ok(())
    }

    fn handle_open(&self, env: &Envelope) -> Result<()> {
        let info: ConnectionInfo = serde_json::from_value(env.parse_data())
            .map_err(|e| ClientError::Decode(format!("invalid open payload: {e}")))?;

        self.set_state(ChannelState::Open);
        *lock(&self.inner.connection_id) = Some(info.connection_id.clone());
        tracing::info!(
            channel = %self.name(),
            connection_id = %info.connection_id,
            "channel open"
        );

        if !info.persistent_id.is_empty() {
            if let Some(inner) = self.inner.client.upgrade() {
                Client::from_inner(inner).set_persistent_id(&info.persistent_id);
            }
        }

        if let Some(f) = self.inner.on_open.get() {
            f(info);
        }
        Ok(())
    }

    // --------------------
    // Internals
    // --------------------

    pub(crate) fn register_pending(&self, topic: &str, reply: ReplyFn) {
        let prev = lock(&self.inner.pending).insert(topic.to_string(), reply);
        if prev.is_some() {
            tracing::debug!(channel = %self.name(), topic = %topic, "pending call replaced");
        }
    }

    fn take_pending(&self, topic: &str) -> Option<ReplyFn> {
        lock(&self.inner.pending).remove(topic)
    }

    /// Send INIT and move to `Opening`.
    pub(crate) fn send_init(&self, client: &Client) {
        self.set_state(ChannelState::Opening);
        self.send(client, Envelope::control(self.name(), topics::INIT, Data::empty()));
    }

    fn set_state(&self, next: ChannelState) {
        *lock(&self.inner.state) = next;
    }

    fn fire_close(&self) {
        if let Some(f) = self.inner.on_close.get() {
            f();
        }
    }

    /// The owning client, if this channel is still attached and it is connected.
    fn connected_client(&self) -> Option<Client> {
        if self.is_detached() {
            return None;
        }
        let client = Client::from_inner(self.inner.client.upgrade()?);
        client.is_connected().then_some(client)
    }

    fn send(&self, client: &Client, env: Envelope) {
        let topic = env.topic.clone();
        if let Err(e) = client.send_envelope(&env) {
            tracing::warn!(channel = %self.name(), topic = %topic, error = %e, "send failed");
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

fn subscription_data(topic: &str) -> Data {
    Data::Value(json!({ "T": topic, "A": false }))
}
