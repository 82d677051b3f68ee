//! Text frame codec (JSON).
//!
//! Outbound frames always carry all six keys in `C, D, T, Q, R, I` order with
//! `null` for absent optionals. Inbound frames are read leniently: `T` may be
//! a string or a number, and `D` may be a string or already-structured JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClientError, Result};
use crate::protocol::envelope::Envelope;

#[derive(Serialize)]
struct WireOut<'a> {
    #[serde(rename = "C")]
    channel: &'a str,
    #[serde(rename = "D")]
    data: &'a str,
    #[serde(rename = "T")]
    topic: &'a str,
    #[serde(rename = "Q")]
    sequence: Option<u64>,
    #[serde(rename = "R")]
    reliable: Option<bool>,
    #[serde(rename = "I")]
    id: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireTopic {
    Text(String),
    Number(serde_json::Number),
}

#[derive(Deserialize)]
struct WireIn {
    #[serde(rename = "C", default)]
    channel: Option<String>,
    #[serde(rename = "D", default)]
    data: Option<Value>,
    #[serde(rename = "T")]
    topic: WireTopic,
    #[serde(rename = "Q", default)]
    sequence: Option<u64>,
    #[serde(rename = "R", default)]
    reliable: Option<bool>,
    #[serde(rename = "I", default)]
    id: Option<u64>,
}

/// Encode the text form of an envelope. Any binary payload is omitted.
pub fn encode_text(env: &Envelope) -> Result<String> {
    let wire = WireOut {
        channel: &env.channel,
        data: &env.data,
        topic: &env.topic,
        sequence: env.sequence,
        reliable: env.reliable,
        id: env.id,
    };
    serde_json::to_string(&wire)
        .map_err(|e| ClientError::Internal(format!("envelope encode failed: {e}")))
}

/// Decode a text frame into a text-kind envelope.
pub fn decode_text(s: &str) -> Result<Envelope> {
    let wire: WireIn = serde_json::from_str(s)
        .map_err(|e| ClientError::Decode(format!("invalid envelope json: {e}")))?;

    let topic = match wire.topic {
        WireTopic::Text(t) => t,
        WireTopic::Number(n) => n.to_string(),
    };

    // `D` is normally a JSON string; structured values are kept as their text form.
    let data = match wire.data {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    };

    Ok(Envelope {
        channel: wire.channel.unwrap_or_default(),
        topic,
        data,
        sequence: wire.sequence,
        id: wire.id,
        reliable: wire.reliable,
        binary: None,
    })
}
