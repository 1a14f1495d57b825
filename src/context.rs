use crate::cache::CacheProvider;
use crate::cache_store::MemoryCacheStore;
use crate::config::Config;
use crate::repository::Database;
use crate::rpc::{ChainRpc, RpcClient};
use crate::storage::{FsObjectStore, ObjectStore};
use anyhow::Result;
use std::sync::Arc;

/// Everything a pipeline component needs, passed explicitly instead of
/// living in process-wide globals.
pub struct Context {
    pub config: Config,
    pub rpc: Arc<dyn ChainRpc>,
    pub cache: CacheProvider,
    pub db: Database,
    pub storage: Arc<dyn ObjectStore>,
}

impl Context {
    /// Wire up the default collaborators from configuration: an HTTP RPC
    /// client, the SQLite store, an in-memory cache, and a filesystem-backed
    /// object store.
    pub fn bootstrap(config: Config) -> Result<Arc<Self>> {
        let rpc = RpcClient::new(&config.rpc_urls, config.rpc_retries, config.rpc_retry_delay)?;
        let db = Database::new(&config.database_url)?;
        let cache = CacheProvider::new(Arc::new(MemoryCacheStore::new()));
        let storage = FsObjectStore::new(config.object_store_path.clone());

        Ok(Arc::new(Context {
            config,
            rpc: Arc::new(rpc),
            cache,
            db,
            storage: Arc::new(storage),
        }))
    }
}
