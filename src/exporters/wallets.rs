use super::Exporter;
use crate::context::Context;
use crate::csv_writer::{CsvFileWriter, check_health};
use crate::repository::Batch;
use crate::storage::PutOptions;
use crate::types::{BatchResult, BlockScanResult, ExportSummary};
use crate::uploader::Uploader;
use crate::wallet_classify::classify;
use alloy_primitives::Address;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

const HEADER: [&str; 6] = [
    "address",
    "character_ratio",
    "prefix",
    "density",
    "letter_range",
    "position",
];

/// Collects the unique wallet addresses touched by a batch's transfers,
/// fingerprints each one, and ships the result next to the transfers file.
pub struct WalletsExporter {
    ctx: Arc<Context>,
    batch: Batch,
    writer: CsvFileWriter,
    object_key: String,
    seen: HashSet<Address>,
}

impl WalletsExporter {
    pub fn new(ctx: Arc<Context>, batch: Batch) -> Self {
        let file_name = format!("wallets-{}-{}.csv", batch.start_block, batch.end_block);
        let relative = PathBuf::from(format!("chain-{}", ctx.config.chain_id))
            .join("wallets")
            .join(&file_name);
        let local_path = ctx.config.base_storage_path.join(&relative);
        let object_key = relative.to_string_lossy().replace('\\', "/");

        WalletsExporter {
            ctx,
            batch,
            writer: CsvFileWriter::new(local_path, HEADER.to_vec()),
            object_key,
            seen: HashSet::new(),
        }
    }

    fn put_options(&self) -> PutOptions {
        PutOptions {
            content_type: Some("text/csv".to_string()),
            metadata: vec![
                ("chain_id".into(), self.ctx.config.chain_id.to_string()),
                ("operation_id".into(), self.batch.operation_id.to_string()),
                ("batch_id".into(), self.batch.id.to_string()),
                ("start_block".into(), self.batch.start_block.to_string()),
                ("end_block".into(), self.batch.end_block.to_string()),
            ],
        }
    }

    fn wallet_row(address: &Address) -> Vec<String> {
        let fingerprint = classify(address);
        vec![
            format!("{address:?}"),
            fingerprint.character_ratio,
            fingerprint.prefix,
            fingerprint.density,
            fingerprint.letter_range,
            fingerprint.position,
        ]
    }
}

#[async_trait]
impl Exporter for WalletsExporter {
    fn name(&self) -> &'static str {
        "wallets"
    }

    async fn init(&mut self) -> Result<()> {
        self.writer.init()
    }

    async fn before_batch_run(&mut self) -> Result<()> {
        Ok(())
    }

    async fn after_block_scan(&mut self, result: &BlockScanResult) -> Result<ExportSummary> {
        let mut rows = Vec::new();
        for tx in &result.transactions {
            for transfer in &tx.transfers {
                for address in [transfer.from, transfer.to] {
                    if self.seen.insert(address) {
                        rows.push(Self::wallet_row(&address));
                    }
                }
            }
        }

        let count = rows.len() as u64;
        if count > 0 {
            self.writer.write_records(rows)?;
            debug!(
                "Saved {} new wallet(s) from block {}",
                count, result.block_number
            );
        }

        Ok(ExportSummary {
            transfers_count: None,
            wallets_count: Some(count),
        })
    }

    async fn after_batch_run(&mut self, _result: &BatchResult) -> Result<ExportSummary> {
        self.writer.close()?;

        let path = self.writer.path().to_path_buf();
        let health = check_health(&path);
        if health.can_be_uploaded {
            info!(
                "Uploading {} with {} wallet(s)",
                self.object_key, health.row_count
            );
            Uploader::new(Arc::clone(&self.ctx.storage))
                .upload_file(&self.object_key, &path, &self.put_options())
                .await
                .with_context(|| format!("failed to upload {}", self.object_key))?;
        } else {
            info!("Not uploading {}: no rows to ship", self.object_key);
        }

        if tokio::fs::try_exists(&path).await? {
            debug!("Removing local file {}", path.display());
            tokio::fs::remove_file(&path).await?;
        }

        Ok(ExportSummary {
            transfers_count: None,
            wallets_count: Some(self.seen.len() as u64),
        })
    }
}
