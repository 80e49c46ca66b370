//! Producer side of the external channel

use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::bridge::BridgeError;
use crate::broker::Broker;
use crate::codec;

/// Publishes msgpack-encoded values on the bridge channel.
///
/// Failures are returned to the caller as they happen; nothing is retried.
#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn Broker>,
    channel: String,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("broker", &self.broker.name())
            .field("channel", &self.channel)
            .finish()
    }
}

impl EventPublisher {
    pub fn new(broker: Arc<dyn Broker>, channel: impl Into<String>) -> Self {
        Self {
            broker,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Encode `value` and publish it; returns the number of subscribers reached
    pub async fn publish<T: Serialize + ?Sized>(&self, value: &T) -> Result<usize, BridgeError> {
        let payload = codec::encode(value)?;
        let receivers = self.broker.publish(&self.channel, payload).await?;
        debug!(channel = %self.channel, receivers, "Published event");
        Ok(receivers)
    }
}
