//! User-data store behind the auxiliary HTTP routes

use async_trait::async_trait;

use crate::broker::BrokerError;
use crate::codec::{self, CodecError, PersonRecord};

/// Binary user-data keyed by numeric id
#[async_trait]
pub trait UserDataStore: Send + Sync {
    async fn put(&self, id: u64, payload: Vec<u8>) -> Result<(), StoreError>;

    async fn get(&self, id: u64) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Encode and store a record under `id`
pub async fn store_user(
    store: &dyn UserDataStore,
    id: u64,
    record: &PersonRecord,
) -> Result<(), StoreError> {
    let payload = codec::encode(record)?;
    store.put(id, payload).await
}

/// Load whatever is stored under `id`, decoded generically
pub async fn load_user(
    store: &dyn UserDataStore,
    id: u64,
) -> Result<Option<serde_json::Value>, StoreError> {
    match store.get(id).await? {
        Some(payload) => Ok(Some(codec::decode_value(&payload)?)),
        None => Ok(None),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(#[from] BrokerError),
    #[error("Stored data is not readable: {0}")]
    Codec(#[from] CodecError),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Backend(BrokerError::Redis(e))
    }
}
