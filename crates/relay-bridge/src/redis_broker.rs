//! Redis-backed broker and user-data store

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use tracing::{debug, info};

use crate::broker::{Broker, BrokerError, ChannelEvent, LivenessProbe, Subscription};
use crate::store::{StoreError, UserDataStore};

/// Hash holding user data, field = decimal user id
pub const USER_DATA_KEY: &str = "u:data";

/// Redis pub/sub broker.
///
/// Publishing shares one managed connection; every subscription opens its
/// own pub/sub connection plus a plain connection for PING.
///
/// The liveness PING goes over that second connection because
/// `redis::aio::PubSub` (0.27) has no ping of its own. A PING failure
/// therefore proves the server is unreachable, while a half-open
/// subscription socket on a healthy server only shows up when its
/// message stream ends.
#[derive(Clone)]
pub struct RedisBroker {
    url: String,
    client: redis::Client,
    publisher: ConnectionManager,
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker").field("url", &self.url).finish()
    }
}

impl RedisBroker {
    /// Connect to the redis server at `url`
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url)?;
        let publisher = ConnectionManager::new(client.clone()).await?;
        info!(url = %url, "Connected to redis");
        Ok(Self {
            url: url.to_string(),
            client,
            publisher,
        })
    }

    /// Managed connection shared with other redis users
    pub fn connection(&self) -> ConnectionManager {
        self.publisher.clone()
    }
}

struct RedisProbe {
    conn: MultiplexedConnection,
}

#[async_trait]
impl LivenessProbe for RedisProbe {
    async fn ping(&mut self) -> Result<(), BrokerError> {
        let pong: String = redis::cmd("PING").query_async(&mut self.conn).await?;
        debug!(reply = %pong, "Redis ping");
        Ok(())
    }
}

#[async_trait]
impl Broker for RedisBroker {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BrokerError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        let events = pubsub
            .into_on_message()
            .map(|msg| ChannelEvent {
                channel: msg.get_channel_name().to_string(),
                payload: msg.get_payload_bytes().to_vec(),
            })
            .boxed();

        let probe = RedisProbe {
            conn: self.client.get_multiplexed_async_connection().await?,
        };

        Ok(Subscription {
            events,
            probe: Box::new(probe),
        })
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<usize, BrokerError> {
        let mut conn = self.publisher.clone();
        let receivers: usize = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(receivers)
    }
}

/// User data kept in a redis hash
#[derive(Clone)]
pub struct RedisUserStore {
    conn: ConnectionManager,
    key: String,
}

impl RedisUserStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            key: USER_DATA_KEY.to_string(),
        }
    }
}

#[async_trait]
impl UserDataStore for RedisUserStore {
    async fn put(&self, id: u64, payload: Vec<u8>) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("HSET")
            .arg(&self.key)
            .arg(id.to_string())
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, id: u64) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        let payload: Option<Vec<u8>> = redis::cmd("HGET")
            .arg(&self.key)
            .arg(id.to_string())
            .query_async(&mut conn)
            .await?;
        Ok(payload)
    }
}
