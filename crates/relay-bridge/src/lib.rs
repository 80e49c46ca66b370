//! Relay Bridge - external publish/subscribe channel
//!
//! Relays a broker channel into gateway connections, publishes onto the
//! same channel, and keeps the user-data hash used by the HTTP routes.

pub mod bridge;
pub mod broker;
pub mod codec;
mod fanout;
pub mod memory;
pub mod publisher;
pub mod redis_broker;
pub mod store;

pub use bridge::{BridgeConfig, BridgeError, BridgeState, EventBridge, EventSink};
pub use broker::{Broker, BrokerError, ChannelEvent, LivenessProbe, Subscription};
pub use codec::{sample_records, CodecError, PersonRecord};
pub use memory::{MemoryBroker, MemoryUserStore};
pub use publisher::EventPublisher;
pub use redis_broker::{RedisBroker, RedisUserStore, USER_DATA_KEY};
pub use store::{load_user, store_user, StoreError, UserDataStore};
