use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// A TTL-capable key/value store. Satisfied by any Redis-compatible store;
/// the in-memory implementation below backs local runs and tests.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn delete_many(&self, keys: &[String]) -> Result<()>;
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>>;
    async fn mset(&self, entries: Vec<(String, String, Option<Duration>)>) -> Result<()>;
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn flush_all(&self) -> Result<()>;
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        let mut entries = self.entries.lock().await;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let mut entries = self.entries.lock().await;
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let value = match entries.get(key) {
                Some(entry) if entry.is_expired() => {
                    entries.remove(key);
                    None
                }
                Some(entry) => Some(entry.value.clone()),
                None => None,
            };
            values.push(value);
        }
        Ok(values)
    }

    async fn mset(&self, items: Vec<(String, String, Option<Duration>)>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        for (key, value, ttl) in items {
            entries.insert(
                key,
                Entry {
                    value,
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                },
            );
        }
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn flush_all(&self) -> Result<()> {
        self.entries.lock().await.clear();
        Ok(())
    }
}
