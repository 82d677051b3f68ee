//! Single-shot reply binder returned by [`Channel::invoke`].
//!
//! There is at most one pending call per channel topic. Registering a second
//! callback for the same topic replaces the first, and a replaced callback
//! never fires. Pending calls have no timeout.

use std::future::Future;

use serde_json::Value;
use tokio::sync::oneshot;

use wsmux_core::error::{ClientError, Result};

use crate::channel::Channel;

/// Binds one channel and one topic.
#[derive(Debug)]
pub struct PendingCall {
    channel: Channel,
    topic: String,
}

impl PendingCall {
    pub(crate) fn new(channel: Channel, topic: String) -> Self {
        Self { channel, topic }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Fire `f` with the parsed reply payload when it arrives.
    pub fn register(self, f: impl FnOnce(Value) + Send + 'static) {
        self.channel.register_pending(&self.topic, Box::new(f));
    }

    /// Future resolving with the reply.
    ///
    /// The callback is registered immediately, so replies that arrive before
    /// the future is first polled are not lost. Resolves with
    /// [`ClientError::CallSuperseded`] if another call on the same topic
    /// replaces this one, or if the channel is dropped first.
    pub fn reply(self) -> impl Future<Output = Result<Value>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        self.register(move |v| {
            let _ = tx.send(v);
        });
        async move { rx.await.map_err(|_| ClientError::CallSuperseded) }
    }
}
