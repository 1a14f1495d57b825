use alloy_primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Kinds of value movement extracted from a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferKind {
    EthTransfer,
    Erc20Transfer,
    Erc20Approval,
    Erc721Transfer,
    Erc1155TransferSingle,
    Erc1155TransferBatch,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::EthTransfer => "ETH_TRANSFER",
            TransferKind::Erc20Transfer => "ERC20_TRANSFER",
            TransferKind::Erc20Approval => "ERC20_APPROVAL",
            TransferKind::Erc721Transfer => "ERC721_TRANSFER",
            TransferKind::Erc1155TransferSingle => "ERC1155_TRANSFER_SINGLE",
            TransferKind::Erc1155TransferBatch => "ERC1155_TRANSFER_BATCH",
        }
    }
}

/// A normalized value-movement event extracted from a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub kind: TransferKind,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub token_address: Address,
    pub block_number: u64,
}

/// A resolved transaction as fetched from the node. Exists only in memory
/// during one block scan.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub hash: B256,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub block_number: u64,
}

/// A block's transaction list entry: nodes return either bare hashes or full
/// transaction objects depending on the request.
#[derive(Debug, Clone)]
pub enum TxEntry {
    Hash(B256),
    Full(TransactionRecord),
}

#[derive(Debug, Clone)]
pub struct BlockRecord {
    pub number: u64,
    pub transactions: Vec<TxEntry>,
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct ReceiptRecord {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub logs: Vec<LogRecord>,
}

/// A transaction together with the transfers decoded from its receipt.
#[derive(Debug, Clone)]
pub struct ScannedTransaction {
    pub record: TransactionRecord,
    pub transfers: Vec<Transfer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockScanStatus {
    Running,
    Scanned,
    Failed,
}

/// Cache-resident idempotency marker for one block scan. A record with
/// status `Scanned` lets a re-run skip the block unless force-scanning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockScanRecord {
    pub block_number: u64,
    pub status: BlockScanStatus,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_tx: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BlockScanRecord {
    pub fn new(block_number: u64, status: BlockScanStatus) -> Self {
        BlockScanRecord {
            block_number,
            status,
            timestamp: now_ms(),
            transaction_count: None,
            last_processed_tx: None,
            error: None,
        }
    }
}

/// Outcome of scanning one block. An already-scanned block reports `Scanned`
/// with an empty transaction list, signalling "nothing new to export".
#[derive(Debug, Clone)]
pub struct BlockScanResult {
    pub block_number: u64,
    pub status: BlockScanStatus,
    pub transactions: Vec<ScannedTransaction>,
}

/// Per-batch progress snapshot, overwritten in the cache after every block,
/// and also the final result returned by a batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchResult {
    pub blocks_done: u64,
    pub blocks_failed: u64,
    pub blocks_to_scan: u64,
    pub count_blocks: u64,
    pub progress_percentage: f64,
    pub transfers_count: u64,
    pub wallets_count: u64,
    #[serde(default)]
    pub skipped: bool,
}

impl BatchResult {
    pub fn new(count_blocks: u64) -> Self {
        BatchResult {
            blocks_to_scan: count_blocks,
            count_blocks,
            ..Default::default()
        }
    }

    pub fn skipped(count_blocks: u64) -> Self {
        BatchResult {
            skipped: true,
            ..Self::new(count_blocks)
        }
    }

    /// Per-block summaries accumulate.
    pub fn add_summary(&mut self, summary: &ExportSummary) {
        self.transfers_count += summary.transfers_count.unwrap_or(0);
        self.wallets_count += summary.wallets_count.unwrap_or(0);
    }

    /// End-of-batch summaries are authoritative totals and overwrite.
    pub fn merge_final(&mut self, summary: &ExportSummary) {
        if let Some(transfers) = summary.transfers_count {
            self.transfers_count = transfers;
        }
        if let Some(wallets) = summary.wallets_count {
            self.wallets_count = wallets;
        }
    }
}

/// What an exporter hook reports back to the batch runner.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportSummary {
    pub transfers_count: Option<u64>,
    pub wallets_count: Option<u64>,
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
