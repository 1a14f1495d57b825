use crate::retry::retry_with_delay;
use crate::types::{BlockRecord, LogRecord, ReceiptRecord, TransactionRecord, TxEntry};
use alloy::consensus::Transaction as _;
use alloy::consensus::TxReceipt as _;
use alloy::providers::fillers::FillProvider;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Block, BlockNumberOrTag, BlockTransactions, TransactionReceipt};
use alloy_primitives::{Address, B256, Bytes};
use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// The blockchain node as seen by the archival pipeline.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn get_block(
        &self,
        number: u64,
        include_transactions: bool,
    ) -> Result<Option<BlockRecord>>;
    async fn get_transaction(&self, hash: B256) -> Result<Option<TransactionRecord>>;
    async fn get_transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptRecord>>;
    async fn get_latest_block_number(&self) -> Result<u64>;
    async fn get_code(&self, address: Address) -> Result<Bytes>;
}

/// Raised when an RPC call is still failing after its retries are spent.
#[derive(Debug, thiserror::Error)]
#[error("{context} failed after retries: {message}")]
pub struct RpcError {
    pub context: String,
    pub message: String,
}

type AlloyFullProvider = FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::Identity,
        alloy::providers::fillers::JoinFill<
            alloy::providers::fillers::GasFiller,
            alloy::providers::fillers::JoinFill<
                alloy::providers::fillers::BlobGasFiller,
                alloy::providers::fillers::JoinFill<
                    alloy::providers::fillers::NonceFiller,
                    alloy::providers::fillers::ChainIdFiller,
                >,
            >,
        >,
    >,
    alloy::providers::RootProvider,
>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120); // 2 minutes timeout per request

#[derive(Clone)]
pub struct RpcClient {
    providers: Vec<AlloyFullProvider>,
    urls: Vec<String>,
    current_provider: Arc<AtomicUsize>,
    retries: usize,
    retry_delay: Duration,
}

impl RpcClient {
    pub fn new(rpc_urls: &[String], retries: usize, retry_delay: Duration) -> Result<Self> {
        if rpc_urls.is_empty() {
            return Err(anyhow::anyhow!("At least one RPC URL must be provided"));
        }

        let mut providers = Vec::new();
        for url in rpc_urls {
            let parsed_url = url
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid RPC URL: {}", url))?;
            let provider: AlloyFullProvider = ProviderBuilder::new().connect_http(parsed_url);
            providers.push(provider);
        }

        Ok(RpcClient {
            providers,
            urls: rpc_urls.to_vec(),
            current_provider: Arc::new(AtomicUsize::new(0)),
            retries,
            retry_delay,
        })
    }

    fn get_provider(&self) -> &AlloyFullProvider {
        let index = self.current_provider.load(Ordering::Relaxed) % self.providers.len();
        &self.providers[index]
    }

    pub fn get_current_url(&self) -> &str {
        let index = self.current_provider.load(Ordering::Relaxed) % self.urls.len();
        &self.urls[index]
    }

    pub fn rotate_provider(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);

        if self.providers.len() > 1 {
            debug!("Rotating to RPC provider #{}", next);
        }
    }

    fn handle_error(&self, error_str: &str) {
        warn!(
            "RPC error on {}: {}, rotating provider",
            self.get_current_url(),
            error_str
        );
        self.rotate_provider();
    }

    fn handle_timeout(&self) -> anyhow::Error {
        warn!(
            "Request timeout after {} seconds on {}, rotating provider",
            REQUEST_TIMEOUT.as_secs(),
            self.get_current_url()
        );
        self.rotate_provider();
        anyhow::anyhow!(
            "Request timeout after {} seconds",
            REQUEST_TIMEOUT.as_secs()
        )
    }

    /// Run one attempt of `operation` under the request timeout, rotating
    /// the provider on failure.
    async fn attempt<T, Fut>(&self, operation: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T, alloy::transports::TransportError>>,
    {
        match timeout(REQUEST_TIMEOUT, operation).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                let error_str = e.to_string();
                self.handle_error(&error_str);
                Err(anyhow::anyhow!("{}", e))
            }
            Err(_) => Err(self.handle_timeout()),
        }
    }

    /// Wrap an attempt in the retry loop and surface exhaustion as a typed
    /// [`RpcError`].
    async fn with_retries<T, F, Fut>(&self, context: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry_with_delay(operation, self.retries, self.retry_delay, context)
            .await
            .map_err(|e| {
                RpcError {
                    context: context.to_string(),
                    message: format!("{e:#}"),
                }
                .into()
            })
    }
}

#[async_trait]
impl ChainRpc for RpcClient {
    async fn get_block(
        &self,
        number: u64,
        include_transactions: bool,
    ) -> Result<Option<BlockRecord>> {
        let block = self
            .with_retries(&format!("get block {number}"), || {
                self.attempt(async {
                    let request = self
                        .get_provider()
                        .get_block_by_number(BlockNumberOrTag::Number(number));
                    if include_transactions {
                        request.full().await
                    } else {
                        request.await
                    }
                })
            })
            .await?;
        Ok(block.map(map_block))
    }

    async fn get_transaction(&self, hash: B256) -> Result<Option<TransactionRecord>> {
        let transaction = self
            .with_retries(&format!("get transaction {hash}"), || {
                self.attempt(self.get_provider().get_transaction_by_hash(hash))
            })
            .await?;
        Ok(transaction.map(|tx| map_transaction(&tx)))
    }

    async fn get_transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptRecord>> {
        let receipt = self
            .with_retries(&format!("get receipt {hash}"), || {
                self.attempt(self.get_provider().get_transaction_receipt(hash))
            })
            .await?;
        Ok(receipt.map(|receipt| map_receipt(&receipt)))
    }

    async fn get_latest_block_number(&self) -> Result<u64> {
        self.with_retries("get latest block number", || {
            self.attempt(self.get_provider().get_block_number())
        })
        .await
    }

    async fn get_code(&self, address: Address) -> Result<Bytes> {
        self.with_retries(&format!("get code for {address}"), || {
            self.attempt(self.get_provider().get_code_at(address))
        })
        .await
    }
}

fn map_block(block: Block) -> BlockRecord {
    let number = block.header.number;
    let transactions = match block.transactions {
        BlockTransactions::Full(txs) => txs
            .iter()
            .map(|tx| TxEntry::Full(map_transaction(tx)))
            .collect(),
        BlockTransactions::Hashes(hashes) => hashes.into_iter().map(TxEntry::Hash).collect(),
        BlockTransactions::Uncle => Vec::new(),
    };
    BlockRecord {
        number,
        transactions,
    }
}

fn map_transaction(tx: &alloy::rpc::types::Transaction) -> TransactionRecord {
    TransactionRecord {
        hash: *tx.inner.tx_hash(),
        from: tx.inner.signer(),
        to: tx.inner.to(),
        value: tx.inner.value(),
        input: tx.inner.input().clone(),
        block_number: tx.block_number.unwrap_or_default(),
    }
}

fn map_receipt(receipt: &TransactionReceipt) -> ReceiptRecord {
    let logs = receipt
        .inner
        .logs()
        .iter()
        .map(|log| LogRecord {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
        })
        .collect();
    ReceiptRecord {
        transaction_hash: receipt.transaction_hash,
        block_number: receipt.block_number.unwrap_or_default(),
        logs,
    }
}
