//! Shared harness: a client wired to a loopback connector and memory store.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use wsmux_client::loopback::{LoopbackConnection, LoopbackConnector};
use wsmux_client::{Channel, Client, Data, Envelope, MemoryStore};
use wsmux_core::topics;

pub const URL: &str = "ws://test.local:4502";

pub struct Harness {
    pub client: Client,
    pub connector: LoopbackConnector,
    pub store: Arc<MemoryStore>,
}

pub fn harness() -> Harness {
    harness_with_store(Arc::new(MemoryStore::new()))
}

pub fn harness_with_store(store: Arc<MemoryStore>) -> Harness {
    let connector = LoopbackConnector::new();
    let client = Client::new(URL, Arc::new(connector.clone()), store.clone());
    Harness {
        client,
        connector,
        store,
    }
}

impl Harness {
    /// Connect and complete the handshake.
    pub fn connect(&self) -> Arc<LoopbackConnection> {
        self.client.connect().unwrap();
        let conn = self.connector.connection().expect("connection created");
        conn.accept();
        conn
    }

    /// Register `name`, answer its INIT with OPEN, and clear recorded frames.
    pub fn open_channel(&self, conn: &LoopbackConnection, name: &str) -> Channel {
        let ch = self.client.channel(name);
        conn.deliver(&open_env(name, "ci-1", "pid-1")).unwrap();
        conn.take_sent();
        ch
    }
}

pub fn open_env(channel: &str, ci: &str, pi: &str) -> Envelope {
    Envelope::control(channel, topics::OPEN, Data::Value(json!({"CI": ci, "PI": pi})))
}

pub fn reply(channel: &str, topic: &str, data: Value) -> Envelope {
    Envelope::new(channel, topic, Data::Value(data))
}

/// Thread-safe recorder for callback arguments.
#[derive(Clone, Default)]
pub struct Recorder<T>(Arc<Mutex<Vec<T>>>);

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn push(&self, v: T) {
        self.0.lock().unwrap().push(v);
    }

    pub fn items(&self) -> Vec<T> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}
