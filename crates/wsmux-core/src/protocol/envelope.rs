//! In-memory envelope and payload model.

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ClientError, Result};

/// Wire kind, derived from whether a binary payload is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Text,
    Binary,
}

/// Outgoing payload, chosen explicitly at the call site.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    /// Already-serialized JSON text. Sent unchanged.
    Raw(String),
    /// Structured value, serialized when the envelope is built.
    Value(Value),
}

impl Data {
    /// No payload (`D` is sent as an empty string).
    pub fn empty() -> Self {
        Data::Raw(String::new())
    }

    /// Serialize any `Serialize` type into a structured payload.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Data::Value)
            .map_err(|e| ClientError::Internal(format!("json encode failed: {e}")))
    }

    /// The string placed into `D`.
    pub fn into_wire(self) -> String {
        match self {
            Data::Raw(s) => s,
            Data::Value(v) => v.to_string(),
        }
    }
}

impl Default for Data {
    fn default() -> Self {
        Data::empty()
    }
}

impl From<Value> for Data {
    fn from(v: Value) -> Self {
        Data::Value(v)
    }
}

/// One message unit exchanged over the connection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Envelope {
    /// Channel name (`C`).
    pub channel: String,
    /// Topic (`T`), either a user topic or a control code.
    pub topic: String,
    /// JSON-encoded payload (`D`).
    pub data: String,
    /// Optional sequence number (`Q`).
    pub sequence: Option<u64>,
    /// Optional message id (`I`).
    pub id: Option<u64>,
    /// Optional reliability flag (`R`).
    pub reliable: Option<bool>,
    /// Raw binary payload. Presence makes this a binary-kind envelope.
    pub binary: Option<Bytes>,
}

impl Envelope {
    /// Text-kind envelope. Channel and topic are lowercased.
    pub fn new(channel: &str, topic: &str, data: Data) -> Self {
        Self {
            channel: channel.to_lowercase(),
            topic: topic.to_lowercase(),
            data: data.into_wire(),
            ..Self::default()
        }
    }

    /// Binary-kind envelope carrying `binary` plus `metadata` in `D`.
    pub fn with_binary(channel: &str, topic: &str, metadata: Data, binary: Bytes) -> Self {
        Self {
            binary: Some(binary),
            ..Self::new(channel, topic, metadata)
        }
    }

    /// Control envelope; control codes are never lowercased (they are digits).
    pub fn control(channel: &str, code: &str, data: Data) -> Self {
        Self {
            channel: channel.to_lowercase(),
            topic: code.to_string(),
            data: data.into_wire(),
            ..Self::default()
        }
    }

    pub fn kind(&self) -> Kind {
        if self.binary.is_some() {
            Kind::Binary
        } else {
            Kind::Text
        }
    }

    /// Parse `D` as JSON.
    ///
    /// An empty `D` parses to `{}`. Text that is not valid JSON is returned
    /// as a JSON string so subscribers still receive the original payload.
    pub fn parse_data(&self) -> Value {
        if self.data.is_empty() {
            return Value::Object(Map::new());
        }
        serde_json::from_str(&self.data).unwrap_or_else(|_| Value::String(self.data.clone()))
    }
}
