//! Valkey/Redis backend for the state cache.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::cache::{CacheError, KeyValueStore};

const SCAN_BATCH: usize = 500;

#[derive(Clone)]
pub struct ValkeyStore {
    connection: ConnectionManager,
}

impl ValkeyStore {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        tracing::info!(target: "powerplay::cache", url, "cache.connected");
        Ok(Self { connection })
    }
}

#[async_trait]
impl KeyValueStore for ValkeyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut connection = self.connection.clone();
        let value: Option<String> = connection.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        let mut connection = self.connection.clone();
        connection.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut connection = self.connection.clone();
        connection.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut connection = self.connection.clone();
        let keys: Vec<String> = {
            let mut iter = connection.scan_match::<_, String>(pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut values = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(SCAN_BATCH) {
            let batch: Vec<Option<String>> = redis::cmd("MGET")
                .arg(chunk)
                .query_async(&mut connection)
                .await?;
            // Keys can expire or be deleted between SCAN and MGET.
            values.extend(batch.into_iter().flatten());
        }
        Ok(values)
    }
}
