//! In-process broker and store.
//!
//! Channels are `tokio::sync::broadcast` buses; used when no external
//! broker is configured and throughout the tests.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

use crate::broker::{Broker, BrokerError, ChannelEvent, LivenessProbe, Subscription};
use crate::store::{StoreError, UserDataStore};

const CHANNEL_CAPACITY: usize = 1000;

/// Broker backed by in-process broadcast channels
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    channels: Arc<DashMap<String, broadcast::Sender<ChannelEvent>>>,
    healthy: Arc<AtomicBool>,
    accept_subscriptions: Arc<AtomicBool>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            healthy: Arc::new(AtomicBool::new(true)),
            accept_subscriptions: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Make liveness probes pass or fail
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Make new subscriptions succeed or fail
    pub fn set_accept_subscriptions(&self, accept: bool) {
        self.accept_subscriptions.store(accept, Ordering::SeqCst);
    }

    /// Drop a channel; existing subscription streams end
    pub fn close_channel(&self, channel: &str) {
        self.channels.remove(channel);
    }

    /// Number of live subscribers on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<ChannelEvent> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

struct MemoryProbe {
    healthy: Arc<AtomicBool>,
}

#[async_trait]
impl LivenessProbe for MemoryProbe {
    async fn ping(&mut self) -> Result<(), BrokerError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Unavailable("ping failed".to_string()))
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BrokerError> {
        if !self.accept_subscriptions.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable(format!(
                "subscribe to {} refused",
                channel
            )));
        }

        let receiver = self.sender(channel).subscribe();
        let events = futures_util::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Memory subscription lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed();

        Ok(Subscription {
            events,
            probe: Box::new(MemoryProbe {
                healthy: Arc::clone(&self.healthy),
            }),
        })
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<usize, BrokerError> {
        let event = ChannelEvent {
            channel: channel.to_string(),
            payload,
        };
        // no subscribers is not an error, same as PUBLISH returning 0
        Ok(self.sender(channel).send(event).unwrap_or(0))
    }
}

/// User-data store backed by a concurrent map
#[derive(Debug, Clone, Default)]
pub struct MemoryUserStore {
    entries: Arc<DashMap<u64, Vec<u8>>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDataStore for MemoryUserStore {
    async fn put(&self, id: u64, payload: Vec<u8>) -> Result<(), StoreError> {
        self.entries.insert(id, payload);
        Ok(())
    }

    async fn get(&self, id: u64) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(&id).map(|entry| entry.value().clone()))
    }
}
