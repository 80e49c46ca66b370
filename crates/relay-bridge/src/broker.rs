//! Broker abstraction for the external publish/subscribe channel

use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// One message received on a subscribed channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    pub channel: String,
    pub payload: Vec<u8>,
}

/// Checks that the broker connection behind a subscription is alive
#[async_trait]
pub trait LivenessProbe: Send {
    async fn ping(&mut self) -> Result<(), BrokerError>;
}

/// A live subscription: inbound events plus a liveness probe for the
/// connection that carries them
pub struct Subscription {
    /// Ends when the underlying connection is lost
    pub events: BoxStream<'static, ChannelEvent>,
    pub probe: Box<dyn LivenessProbe>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("events", &"<stream>")
            .field("probe", &"<probe>")
            .finish()
    }
}

/// External publish/subscribe broker
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Open a dedicated subscription to `channel`
    async fn subscribe(&self, channel: &str) -> Result<Subscription, BrokerError>;

    /// Publish `payload` on `channel`, returning how many subscribers got it
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<usize, BrokerError>;
}

/// Broker-related errors
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Broker connection closed")]
    Closed,
    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}
