use crate::cache::BLOCK_SCANS;
use crate::context::Context;
use crate::detector::detect_transfers;
use crate::pool::process_with_concurrency;
use crate::types::{
    BlockScanRecord, BlockScanResult, BlockScanStatus, ScannedTransaction, TransactionRecord,
    TxEntry, now_ms,
};
use anyhow::{Context as _, Result, bail};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identifies the batch/operation a scan runs under, so the same block can be
/// tracked independently across unrelated scans.
#[derive(Debug, Clone, Copy)]
pub struct ScanScope {
    pub batch_id: i64,
    pub operation_id: i64,
}

/// Scans one block: fetches its transactions, resolves them with bounded
/// concurrency, decodes transfers from receipts, and keeps a cache-resident
/// scan record so completed work is never redone.
pub struct BlockScanner {
    ctx: Arc<Context>,
    scope: Option<ScanScope>,
    force_scan: bool,
}

impl BlockScanner {
    pub fn new(ctx: Arc<Context>, scope: Option<ScanScope>, force_scan: bool) -> Self {
        BlockScanner {
            ctx,
            scope,
            force_scan,
        }
    }

    pub async fn scan(&self, block_number: u64) -> Result<BlockScanResult> {
        if !self.force_scan {
            if let Some(existing) = self.scan_record(block_number).await? {
                if existing.status == BlockScanStatus::Scanned {
                    info!("Block {} already scanned", block_number);
                    return Ok(BlockScanResult {
                        block_number,
                        status: existing.status,
                        transactions: Vec::new(),
                    });
                }
            }
        }

        self.write_record(BlockScanRecord::new(block_number, BlockScanStatus::Running))
            .await?;

        match self.scan_inner(block_number).await {
            Ok(transactions) => {
                let mut record = BlockScanRecord::new(block_number, BlockScanStatus::Scanned);
                record.transaction_count = Some(transactions.len());
                self.write_record(record).await?;
                Ok(BlockScanResult {
                    block_number,
                    status: BlockScanStatus::Scanned,
                    transactions,
                })
            }
            Err(e) => {
                let mut record = BlockScanRecord::new(block_number, BlockScanStatus::Failed);
                record.error = Some(format!("{e:#}"));
                if let Err(cache_err) = self.write_record(record).await {
                    warn!(
                        "Failed to record failure for block {}: {}",
                        block_number, cache_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn scan_inner(&self, block_number: u64) -> Result<Vec<ScannedTransaction>> {
        let transactions = self.fetch_block_transactions(block_number).await?;

        let mut record = BlockScanRecord::new(block_number, BlockScanStatus::Running);
        record.transaction_count = Some(transactions.len());
        self.write_record(record).await?;

        self.process_in_chunks(block_number, transactions).await
    }

    /// Fetch the block and resolve every entry to a full transaction.
    /// Missing blocks are fatal; unresolvable entries are dropped with a
    /// warning.
    async fn fetch_block_transactions(
        &self,
        block_number: u64,
    ) -> Result<Vec<TransactionRecord>> {
        let block = self
            .ctx
            .rpc
            .get_block(block_number, true)
            .await
            .with_context(|| format!("failed to fetch block {block_number}"))?;
        let Some(block) = block else {
            bail!("block {block_number} not found");
        };

        if block.transactions.is_empty() {
            debug!("No transactions in block {}", block_number);
            return Ok(Vec::new());
        }

        let rpc = Arc::clone(&self.ctx.rpc);
        let resolved = process_with_concurrency(
            block.transactions,
            self.ctx.config.fetch_concurrency,
            move |entry| {
                let rpc = Arc::clone(&rpc);
                async move {
                    match entry {
                        TxEntry::Full(tx) => Ok(Some(tx)),
                        TxEntry::Hash(hash) => rpc.get_transaction(hash).await,
                    }
                }
            },
        )
        .await
        .with_context(|| format!("failed to resolve transactions of block {block_number}"))?;

        let mut transactions = Vec::with_capacity(resolved.len());
        for (index, tx) in resolved.into_iter().enumerate() {
            match tx {
                Some(tx) => transactions.push(tx),
                None => {
                    warn!(
                        "Dropping unresolvable transaction #{} in block {}",
                        index, block_number
                    );
                }
            }
        }
        Ok(transactions)
    }

    /// Fixed-size chunks, fully parallel within a chunk, sequential across
    /// chunks. A single receipt failure aborts the whole block scan.
    async fn process_in_chunks(
        &self,
        block_number: u64,
        transactions: Vec<TransactionRecord>,
    ) -> Result<Vec<ScannedTransaction>> {
        let chunk_size = self.ctx.config.tx_chunk_size.max(1);
        let mut scanned = Vec::with_capacity(transactions.len());

        for chunk in transactions.chunks(chunk_size) {
            let outcomes =
                join_all(chunk.iter().map(|tx| self.process_transaction(tx.clone()))).await;
            for outcome in outcomes {
                scanned.push(outcome?);
            }

            let mut record = BlockScanRecord::new(block_number, BlockScanStatus::Running);
            record.transaction_count = Some(scanned.len());
            record.last_processed_tx = scanned.last().map(|tx| tx.record.hash);
            self.write_record(record).await?;
        }

        Ok(scanned)
    }

    async fn process_transaction(&self, tx: TransactionRecord) -> Result<ScannedTransaction> {
        let receipt = self
            .ctx
            .rpc
            .get_transaction_receipt(tx.hash)
            .await
            .with_context(|| format!("failed to fetch receipt for transaction {}", tx.hash))?;
        let Some(receipt) = receipt else {
            bail!("no receipt found for transaction {}", tx.hash);
        };

        let transfers = detect_transfers(&tx, &receipt.logs);
        if !transfers.is_empty() {
            debug!(
                "Transaction {} carries {} transfer(s)",
                tx.hash,
                transfers.len()
            );
        }

        Ok(ScannedTransaction {
            record: tx,
            transfers,
        })
    }

    fn cache_key(&self, block_number: u64) -> String {
        match &self.scope {
            Some(scope) => format!(
                "scan:{}:{}:{}",
                scope.batch_id, scope.operation_id, block_number
            ),
            None => format!("scan:{block_number}"),
        }
    }

    async fn scan_record(&self, block_number: u64) -> Result<Option<BlockScanRecord>> {
        self.ctx
            .cache
            .get(&BLOCK_SCANS, &self.cache_key(block_number))
            .await
    }

    async fn write_record(&self, mut record: BlockScanRecord) -> Result<()> {
        record.timestamp = now_ms();
        self.ctx
            .cache
            .set(&BLOCK_SCANS, &self.cache_key(record.block_number), &record, None)
            .await
    }
}
