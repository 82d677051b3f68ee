use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use wsmux_core::error::{ClientError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub version: u32,

    pub client: ClientSection,

    /// Channels registered up front; each gets an INIT when the connection opens.
    #[serde(default)]
    pub channels: Vec<String>,
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(ClientError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        self.client.validate()?;
        if let Some(bad) = self.channels.iter().find(|c| c.trim().is_empty()) {
            return Err(ClientError::Config(format!(
                "channel names must not be empty (got {bad:?})"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSection {
    pub url: String,

    #[serde(default = "default_subprotocol")]
    pub subprotocol: String,

    /// Extra query-string parameters sent with every connect.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    #[serde(default)]
    pub reconnect: ReconnectSection,
}

impl ClientSection {
    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ClientError::Config(
                "client.url must start with ws:// or wss://".into(),
            ));
        }
        if self.subprotocol.is_empty() {
            return Err(ClientError::Config("client.subprotocol must not be empty".into()));
        }
        self.reconnect.validate()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectSection {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: default_interval_ms(),
        }
    }
}

impl ReconnectSection {
    pub fn validate(&self) -> Result<()> {
        if !(100..=600_000).contains(&self.interval_ms) {
            return Err(ClientError::Config(
                "client.reconnect.interval_ms must be between 100 and 600000".into(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_subprotocol() -> String {
    crate::client::DEFAULT_SUBPROTOCOL.into()
}
fn default_interval_ms() -> u64 {
    5000
}
