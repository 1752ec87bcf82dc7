//! Latest-known Powerplay record per system.
//!
//! [`StateCache`] is a typed view over any [`KeyValueStore`]. Reads never fail
//! from the pipeline's point of view: a backend or decode problem is logged
//! and reported as a missing record. Writes are last-write-wins without TTL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pp_schema::PowerplayRecord;
use thiserror::Error;

pub const DEFAULT_KEY_PREFIX: &str = "edbgs-map";
const ALERT_NAMESPACE: &str = "pp-alert";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("cache value codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("cache lock poisoned")]
    Poisoned,
}

/// Minimal string key-value contract shared by the in-process map and Valkey.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    /// Values of every key matching a glob `pattern` (only trailing `*` is relied on).
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CacheError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn pattern_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(entries
            .iter()
            .filter(|(key, _)| pattern_matches(pattern, key))
            .map(|(_, value)| value.clone())
            .collect())
    }
}

#[derive(Clone)]
pub struct StateCache {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl StateCache {
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), DEFAULT_KEY_PREFIX)
    }

    pub fn key_for(&self, id64: u64) -> String {
        format!("{}:{}:{}", self.prefix, ALERT_NAMESPACE, id64)
    }

    fn scan_pattern(&self) -> String {
        format!("{}:{}:*", self.prefix, ALERT_NAMESPACE)
    }

    pub async fn get(&self, id64: u64) -> Option<PowerplayRecord> {
        match self.try_get(id64).await {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(
                    target: "powerplay::cache",
                    id64,
                    error = %err,
                    "cache.read_failed"
                );
                None
            }
        }
    }

    pub async fn try_get(&self, id64: u64) -> Result<Option<PowerplayRecord>, CacheError> {
        let Some(raw) = self.store.get(&self.key_for(id64)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub async fn put(&self, record: &PowerplayRecord) {
        let key = self.key_for(record.id64);
        let result = match serde_json::to_string(record) {
            Ok(value) => self.store.set(&key, value).await,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = result {
            tracing::warn!(
                target: "powerplay::cache",
                id64 = record.id64,
                system = %record.name,
                error = %err,
                "cache.write_failed"
            );
        }
    }

    pub async fn delete(&self, id64: u64) {
        if let Err(err) = self.store.delete(&self.key_for(id64)).await {
            tracing::warn!(
                target: "powerplay::cache",
                id64,
                error = %err,
                "cache.delete_failed"
            );
        }
    }

    /// Every decodable record in the namespace. Undecodable values are skipped.
    pub async fn scan_all(&self) -> Result<Vec<PowerplayRecord>, CacheError> {
        let values = self.store.scan(&self.scan_pattern()).await?;
        let mut records = Vec::with_capacity(values.len());
        for value in values {
            match serde_json::from_str::<PowerplayRecord>(&value) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::debug!(target: "powerplay::cache", error = %err, "cache.skip_undecodable");
                }
            }
        }
        Ok(records)
    }

    pub async fn scan_matching<F>(&self, filter: F) -> Result<Vec<PowerplayRecord>, CacheError>
    where
        F: Fn(&PowerplayRecord) -> bool,
    {
        let mut records = self.scan_all().await?;
        records.retain(|record| filter(record));
        Ok(records)
    }
}
