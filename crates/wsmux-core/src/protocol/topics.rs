//! Reserved control topics.
//!
//! Control topics share the `T` field with user topics. User code should not
//! pick topic names that collide with these codes.

/// Server rejected authentication.
pub const AUTH_FAILED: &str = "0";
/// Client asks the server to start a channel instance.
pub const INIT: &str = "1";
/// Server confirms a channel is open (`D = {CI, PI}`).
pub const OPEN: &str = "2";
/// Either side closes a channel.
pub const CLOSE: &str = "3";
/// Server-side error notification.
pub const ERROR: &str = "4";
/// Client subscribes to a topic (`D = {T, A}`).
pub const SUBSCRIBE: &str = "5";
/// Client cancels a topic subscription (`D = {T, A}`).
pub const UNSUBSCRIBE: &str = "6";
pub const PING: &str = "7";
pub const PONG: &str = "8";

/// Topic prefix used by `set_property`.
pub const SET_PREFIX: &str = "set_";
/// Topic prefix used by `get_property`.
pub const GET_PREFIX: &str = "get_";

/// Typed view over the reserved topic codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlTopic {
    AuthFailed,
    Init,
    Open,
    Close,
    Error,
    Subscribe,
    Unsubscribe,
    Ping,
    Pong,
}

impl ControlTopic {
    /// Classify a topic; `None` for user topics.
    pub fn parse(topic: &str) -> Option<Self> {
        match topic {
            AUTH_FAILED => Some(Self::AuthFailed),
            INIT => Some(Self::Init),
            OPEN => Some(Self::Open),
            CLOSE => Some(Self::Close),
            ERROR => Some(Self::Error),
            SUBSCRIBE => Some(Self::Subscribe),
            UNSUBSCRIBE => Some(Self::Unsubscribe),
            PING => Some(Self::Ping),
            PONG => Some(Self::Pong),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthFailed => AUTH_FAILED,
            Self::Init => INIT,
            Self::Open => OPEN,
            Self::Close => CLOSE,
            Self::Error => ERROR,
            Self::Subscribe => SUBSCRIBE,
            Self::Unsubscribe => UNSUBSCRIBE,
            Self::Ping => PING,
            Self::Pong => PONG,
        }
    }
}
