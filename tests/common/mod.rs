#![allow(dead_code)]

use alloy_primitives::{Address, B256, Bytes, U256, keccak256};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use eth_archiver::cache::CacheProvider;
use eth_archiver::cache_store::{CacheStore, MemoryCacheStore};
use eth_archiver::config::Config;
use eth_archiver::context::Context;
use eth_archiver::repository::Database;
use eth_archiver::rpc::ChainRpc;
use eth_archiver::storage::FsObjectStore;
use eth_archiver::types::{
    BlockRecord, LogRecord, ReceiptRecord, TransactionRecord, TxEntry,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Default)]
pub struct CallCounters {
    pub get_block: AtomicUsize,
    pub get_transaction: AtomicUsize,
    pub get_receipt: AtomicUsize,
    pub get_latest: AtomicUsize,
}

/// Scripted RPC collaborator: serves pre-seeded blocks, transactions, and
/// receipts while counting every call.
#[derive(Default)]
pub struct MockChainRpc {
    pub latest_block: u64,
    pub fail_latest: bool,
    blocks: HashMap<u64, BlockRecord>,
    transactions: HashMap<B256, TransactionRecord>,
    receipts: HashMap<B256, ReceiptRecord>,
    failing_receipts: HashSet<B256>,
    pub calls: CallCounters,
}

impl MockChainRpc {
    pub fn new(latest_block: u64) -> Self {
        MockChainRpc {
            latest_block,
            ..Default::default()
        }
    }

    /// Seed a block whose entries are full transaction objects. Each
    /// transaction gets an empty receipt unless one is seeded explicitly.
    pub fn add_block(&mut self, number: u64, txs: Vec<TransactionRecord>) -> &mut Self {
        for tx in &txs {
            self.transactions.insert(tx.hash, tx.clone());
            self.receipts.entry(tx.hash).or_insert(ReceiptRecord {
                transaction_hash: tx.hash,
                block_number: number,
                logs: Vec::new(),
            });
        }
        self.blocks.insert(
            number,
            BlockRecord {
                number,
                transactions: txs.into_iter().map(TxEntry::Full).collect(),
            },
        );
        self
    }

    /// Seed a block that only lists transaction hashes, forcing resolution.
    pub fn add_block_with_hashes(&mut self, number: u64, txs: Vec<TransactionRecord>) -> &mut Self {
        let hashes = txs.iter().map(|tx| TxEntry::Hash(tx.hash)).collect();
        for tx in txs {
            self.receipts.entry(tx.hash).or_insert(ReceiptRecord {
                transaction_hash: tx.hash,
                block_number: number,
                logs: Vec::new(),
            });
            self.transactions.insert(tx.hash, tx);
        }
        self.blocks.insert(
            number,
            BlockRecord {
                number,
                transactions: hashes,
            },
        );
        self
    }

    pub fn set_receipt_logs(&mut self, hash: B256, logs: Vec<LogRecord>) -> &mut Self {
        if let Some(receipt) = self.receipts.get_mut(&hash) {
            receipt.logs = logs;
        }
        self
    }

    pub fn fail_receipt(&mut self, hash: B256) -> &mut Self {
        self.failing_receipts.insert(hash);
        self
    }
}

#[async_trait]
impl ChainRpc for MockChainRpc {
    async fn get_block(
        &self,
        number: u64,
        _include_transactions: bool,
    ) -> Result<Option<BlockRecord>> {
        self.calls.get_block.fetch_add(1, Ordering::SeqCst);
        Ok(self.blocks.get(&number).cloned())
    }

    async fn get_transaction(&self, hash: B256) -> Result<Option<TransactionRecord>> {
        self.calls.get_transaction.fetch_add(1, Ordering::SeqCst);
        Ok(self.transactions.get(&hash).cloned())
    }

    async fn get_transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptRecord>> {
        self.calls.get_receipt.fetch_add(1, Ordering::SeqCst);
        if self.failing_receipts.contains(&hash) {
            return Err(anyhow!("receipt fetch failed for {hash}"));
        }
        Ok(self.receipts.get(&hash).cloned())
    }

    async fn get_latest_block_number(&self) -> Result<u64> {
        self.calls.get_latest.fetch_add(1, Ordering::SeqCst);
        if self.fail_latest {
            return Err(anyhow!("node unavailable"));
        }
        Ok(self.latest_block)
    }

    async fn get_code(&self, _address: Address) -> Result<Bytes> {
        Ok(Bytes::new())
    }
}

/// Cache store that records every write so tests can assert on the sequence
/// of progress snapshots.
#[derive(Default)]
pub struct RecordingCacheStore {
    inner: MemoryCacheStore,
    pub sets: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl CacheStore for RecordingCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        self.sets
            .lock()
            .expect("sets mutex poisoned")
            .push((key.to_string(), value.clone()));
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        self.inner.delete_many(keys).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        self.inner.mget(keys).await
    }

    async fn mset(&self, entries: Vec<(String, String, Option<Duration>)>) -> Result<()> {
        self.inner.mset(entries).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.keys_with_prefix(prefix).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn flush_all(&self) -> Result<()> {
        self.inner.flush_all().await
    }
}

pub struct TestEnv {
    pub ctx: Arc<Context>,
    pub rpc: Arc<MockChainRpc>,
    pub cache_store: Arc<RecordingCacheStore>,
    pub staging: TempDir,
    pub bucket: TempDir,
}

pub fn test_env(rpc: MockChainRpc) -> TestEnv {
    let staging = tempfile::tempdir().expect("staging dir");
    let bucket = tempfile::tempdir().expect("bucket dir");

    let config = Config {
        rpc_urls: vec!["http://localhost:8545".to_string()],
        chain_id: 1,
        database_url: ":memory:".to_string(),
        base_storage_path: staging.path().to_path_buf(),
        object_store_path: bucket.path().to_path_buf(),
        start_block: 0,
        batch_size: 10,
        fetch_concurrency: 4,
        tx_chunk_size: 2,
        rpc_retries: 0,
        rpc_retry_delay: Duration::from_millis(1),
        batch_workers: 1,
        batch_delay: Duration::ZERO,
        run_time_budget: Duration::from_secs(120),
        max_consecutive_failures: 3,
    };

    let rpc = Arc::new(rpc);
    let cache_store = Arc::new(RecordingCacheStore::default());
    let ctx = Arc::new(Context {
        config,
        rpc: Arc::clone(&rpc) as Arc<dyn ChainRpc>,
        cache: CacheProvider::new(Arc::clone(&cache_store) as Arc<dyn CacheStore>),
        db: Database::in_memory().expect("in-memory database"),
        storage: Arc::new(FsObjectStore::new(bucket.path().to_path_buf())),
    });

    TestEnv {
        ctx,
        rpc,
        cache_store,
        staging,
        bucket,
    }
}

pub fn addr(n: u8) -> Address {
    Address::repeat_byte(n)
}

pub fn tx_hash(n: u8) -> B256 {
    B256::repeat_byte(n)
}

/// A plain value transfer (native currency, empty call data).
pub fn native_tx(id: u8, block_number: u64, value: u64) -> TransactionRecord {
    TransactionRecord {
        hash: tx_hash(id),
        from: addr(0xf1),
        to: Some(addr(0xf2)),
        value: U256::from(value),
        input: Bytes::new(),
        block_number,
    }
}

/// A contract call (no native value, non-empty call data).
pub fn contract_tx(id: u8, block_number: u64) -> TransactionRecord {
    TransactionRecord {
        hash: tx_hash(id),
        from: addr(0xf1),
        to: Some(addr(0xf2)),
        value: U256::ZERO,
        input: Bytes::copy_from_slice(&[0xa9, 0x05, 0x9c, 0xbb]),
        block_number,
    }
}

pub fn erc20_transfer_log(token: Address, from: Address, to: Address, value: u64) -> LogRecord {
    let mut data = [0u8; 32];
    data[24..].copy_from_slice(&value.to_be_bytes());
    LogRecord {
        address: token,
        topics: vec![
            keccak256("Transfer(address,address,uint256)"),
            address_topic(from),
            address_topic(to),
        ],
        data: Bytes::copy_from_slice(&data),
    }
}

pub fn address_topic(address: Address) -> B256 {
    let mut topic = [0u8; 32];
    topic[12..].copy_from_slice(address.as_slice());
    B256::from(topic)
}
