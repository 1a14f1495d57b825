use super::Exporter;
use crate::context::Context;
use crate::csv_writer::{CsvFileWriter, check_health};
use crate::repository::Batch;
use crate::storage::PutOptions;
use crate::types::{BatchResult, BlockScanResult, ExportSummary};
use crate::uploader::Uploader;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

const HEADER: [&str; 7] = [
    "tx_hash",
    "kind",
    "from",
    "to",
    "value",
    "token_address",
    "block_number",
];

/// Streams every decoded transfer of a batch into one CSV file and ships it
/// to object storage when the batch finishes.
pub struct TransfersExporter {
    ctx: Arc<Context>,
    batch: Batch,
    writer: CsvFileWriter,
    object_key: String,
    total_transfers: u64,
}

impl TransfersExporter {
    pub fn new(ctx: Arc<Context>, batch: Batch) -> Self {
        let file_name = format!(
            "transfers-{}-{}.csv",
            batch.start_block, batch.end_block
        );
        let relative = PathBuf::from(format!("chain-{}", ctx.config.chain_id))
            .join("transfers")
            .join(&file_name);
        let local_path = ctx.config.base_storage_path.join(&relative);
        let object_key = relative.to_string_lossy().replace('\\', "/");

        TransfersExporter {
            ctx,
            batch,
            writer: CsvFileWriter::new(local_path, HEADER.to_vec()),
            object_key,
            total_transfers: 0,
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

    async fn upload_and_cleanup(&mut self) -> Result<()> {
        let path = self.writer.path().to_path_buf();

        let health = check_health(&path);
        if health.can_be_uploaded {
            info!(
                "Uploading {} with {} transfer(s)",
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
        Ok(())
    }
}

#[async_trait]
impl Exporter for TransfersExporter {
    fn name(&self) -> &'static str {
        "transfers"
    }

    async fn init(&mut self) -> Result<()> {
        self.writer.init()
    }

    async fn before_batch_run(&mut self) -> Result<()> {
        Ok(())
    }

    async fn after_block_scan(&mut self, result: &BlockScanResult) -> Result<ExportSummary> {
        let rows: Vec<Vec<String>> = result
            .transactions
            .iter()
            .flat_map(|tx| {
                tx.transfers.iter().map(|transfer| {
                    vec![
                        format!("{:?}", tx.record.hash),
                        transfer.kind.as_str().to_string(),
                        format!("{:?}", transfer.from),
                        format!("{:?}", transfer.to),
                        transfer.value.to_string(),
                        format!("{:?}", transfer.token_address),
                        transfer.block_number.to_string(),
                    ]
                })
            })
            .collect();

        let count = rows.len() as u64;
        if count > 0 {
            self.writer.write_records(rows)?;
            debug!(
                "Saved {} transfer(s) from block {}",
                count, result.block_number
            );
        }
        self.total_transfers += count;

        Ok(ExportSummary {
            transfers_count: Some(count),
            wallets_count: None,
        })
    }

    async fn after_batch_run(&mut self, _result: &BatchResult) -> Result<ExportSummary> {
        self.writer.close()?;
        self.upload_and_cleanup().await?;
        Ok(ExportSummary {
            transfers_count: Some(self.total_transfers),
            wallets_count: None,
        })
    }
}
