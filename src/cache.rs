use crate::cache_store::CacheStore;
use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A named key namespace with a fixed prefix and default TTL.
///
/// Groups form a closed set resolved at compile time and are always passed
/// by reference, so subsystems cannot collide on prefixes.
#[derive(Debug)]
pub struct CacheGroup {
    pub name: &'static str,
    pub prefix: &'static str,
    pub ttl: Option<Duration>,
}

pub static OPERATIONS: CacheGroup = CacheGroup {
    name: "operation",
    prefix: "ops:",
    ttl: Some(Duration::from_secs(86_400)),
};

pub static BATCH_PROGRESS: CacheGroup = CacheGroup {
    name: "operation-batch",
    prefix: "ops:archive:batches:",
    ttl: Some(Duration::from_secs(86_400)),
};

pub static BLOCK_SCANS: CacheGroup = CacheGroup {
    name: "operation-batch-blocks",
    prefix: "ops:blocks:",
    ttl: Some(Duration::from_secs(86_400)),
};

/// Group-scoped view over a [`CacheStore`]: every operation takes a
/// [`CacheGroup`] and works on prefixed keys with the group's TTL.
#[derive(Clone)]
pub struct CacheProvider {
    store: Arc<dyn CacheStore>,
}

impl CacheProvider {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        CacheProvider { store }
    }

    fn full_key(group: &CacheGroup, key: &str) -> String {
        format!("{}{}", group.prefix, key)
    }

    /// Store a value as JSON under the group's prefix. `custom_ttl`
    /// overrides the group default.
    pub async fn set<T>(
        &self,
        group: &CacheGroup,
        key: &str,
        value: &T,
        custom_ttl: Option<Duration>,
    ) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_string(value)?;
        self.store
            .set(&Self::full_key(group, key), payload, custom_ttl.or(group.ttl))
            .await
    }

    /// Fetch and JSON-parse a value. A payload that no longer parses is
    /// treated as a miss; scan records and progress snapshots are ephemeral.
    pub async fn get<T>(&self, group: &CacheGroup, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let Some(raw) = self.store.get(&Self::full_key(group, key)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Discarding unparsable cache entry {}{}: {}", group.prefix, key, e);
                Ok(None)
            }
        }
    }

    /// The raw stored string, without JSON parsing.
    pub async fn get_raw(&self, group: &CacheGroup, key: &str) -> Result<Option<String>> {
        self.store.get(&Self::full_key(group, key)).await
    }

    pub async fn delete(&self, group: &CacheGroup, key: &str) -> Result<()> {
        self.store.delete(&Self::full_key(group, key)).await
    }

    pub async fn exists(&self, group: &CacheGroup, key: &str) -> Result<bool> {
        self.store.exists(&Self::full_key(group, key)).await
    }

    /// Keys in the group, with the group prefix stripped.
    pub async fn keys(&self, group: &CacheGroup) -> Result<Vec<String>> {
        let keys = self.store.keys_with_prefix(group.prefix).await?;
        Ok(keys
            .into_iter()
            .map(|full| full[group.prefix.len()..].to_string())
            .collect())
    }

    /// Prefix scan then bulk delete. Groups are small and this is off the
    /// hot path (status and progress records only).
    pub async fn delete_by_group(&self, group: &CacheGroup) -> Result<()> {
        let keys = self.store.keys_with_prefix(group.prefix).await?;
        if !keys.is_empty() {
            self.store.delete_many(&keys).await?;
        }
        Ok(())
    }

    pub async fn mset<T>(&self, group: &CacheGroup, items: &[(String, T)]) -> Result<()>
    where
        T: Serialize,
    {
        let mut entries = Vec::with_capacity(items.len());
        for (key, value) in items {
            entries.push((
                Self::full_key(group, key),
                serde_json::to_string(value)?,
                group.ttl,
            ));
        }
        self.store.mset(entries).await
    }

    pub async fn mget<T>(&self, group: &CacheGroup, keys: &[String]) -> Result<Vec<Option<T>>>
    where
        T: DeserializeOwned,
    {
        let full_keys: Vec<String> = keys.iter().map(|key| Self::full_key(group, key)).collect();
        let raw_values = self.store.mget(&full_keys).await?;
        Ok(raw_values
            .into_iter()
            .map(|raw| raw.and_then(|raw| serde_json::from_str(&raw).ok()))
            .collect())
    }
}
