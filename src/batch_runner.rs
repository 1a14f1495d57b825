use crate::cache::BATCH_PROGRESS;
use crate::context::Context;
use crate::exporters::{Exporter, TransfersExporter, WalletsExporter};
use crate::repository::{Batch, BatchRepository, BatchStatus, OperationRepository};
use crate::scan_block::{BlockScanner, ScanScope};
use crate::types::{BatchResult, round2};
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Drives the block scanner across one batch's range, feeding exporters and
/// publishing progress. Block failures are counted and skipped; exporter
/// failures after the loop are fatal to the batch.
pub struct BatchRunner {
    ctx: Arc<Context>,
    batch: Batch,
    force_scan: bool,
    exporters: Vec<Box<dyn Exporter>>,
}

impl BatchRunner {
    pub fn new(ctx: Arc<Context>, batch: Batch, force_scan: bool) -> Self {
        let exporters: Vec<Box<dyn Exporter>> = vec![
            Box::new(TransfersExporter::new(Arc::clone(&ctx), batch.clone())),
            Box::new(WalletsExporter::new(Arc::clone(&ctx), batch.clone())),
        ];
        Self::with_exporters(ctx, batch, force_scan, exporters)
    }

    pub fn with_exporters(
        ctx: Arc<Context>,
        batch: Batch,
        force_scan: bool,
        exporters: Vec<Box<dyn Exporter>>,
    ) -> Self {
        BatchRunner {
            ctx,
            batch,
            force_scan,
            exporters,
        }
    }

    pub async fn run(mut self) -> Result<BatchResult> {
        info!("Running batch {}", self.batch.id);

        let operations = OperationRepository::new(&self.ctx.db);
        let batches = BatchRepository::new(&self.ctx.db);

        if !self.claim(&batches)? {
            return Ok(BatchResult::skipped(self.batch.count));
        }

        match self.execute().await {
            Ok(result) => {
                batches.update_status(self.batch.id, BatchStatus::Completed)?;
                operations.record_batch_completed(self.batch.operation_id)?;
                operations
                    .update_last_processed_block(self.batch.operation_id, self.batch.end_block)?;
                info!(
                    "Batch {} completed: {}/{} blocks, {} failed",
                    self.batch.id, result.blocks_done, result.count_blocks, result.blocks_failed
                );
                Ok(result)
            }
            Err(e) => {
                error!("Error running batch {}: {e:#}", self.batch.id);
                batches.update_status(self.batch.id, BatchStatus::Failed)?;
                operations.record_batch_failed(self.batch.operation_id)?;
                Err(e)
            }
        }
    }

    /// Entry guard plus the atomic `pending -> running` claim, so two
    /// runners can never own the same batch.
    fn claim(&self, batches: &BatchRepository) -> Result<bool> {
        match self.batch.status {
            BatchStatus::Completed | BatchStatus::Failed if !self.force_scan => {
                info!(
                    "Batch {} already {}",
                    self.batch.id,
                    self.batch.status.as_str()
                );
                Ok(false)
            }
            _ => {
                if batches.claim(self.batch.id)? {
                    return Ok(true);
                }
                if self.force_scan {
                    batches.update_status(self.batch.id, BatchStatus::Running)?;
                    return Ok(true);
                }
                info!(
                    "Batch {} is not claimable (status changed under us)",
                    self.batch.id
                );
                Ok(false)
            }
        }
    }

    async fn execute(&mut self) -> Result<BatchResult> {
        for exporter in &mut self.exporters {
            exporter.init().await?;
        }
        for exporter in &mut self.exporters {
            exporter.before_batch_run().await?;
        }

        let count_blocks = self.batch.count;
        let mut result = BatchResult::new(count_blocks);

        let scanner = BlockScanner::new(
            Arc::clone(&self.ctx),
            Some(ScanScope {
                batch_id: self.batch.id,
                operation_id: self.batch.operation_id,
            }),
            self.force_scan,
        );

        for block_number in self.batch.start_block..=self.batch.end_block {
            match scanner.scan(block_number).await {
                Ok(block_result) => {
                    result.blocks_done += 1;
                    for exporter in &mut self.exporters {
                        let summary = exporter.after_block_scan(&block_result).await?;
                        result.add_summary(&summary);
                    }
                }
                Err(e) => {
                    warn!("Error scanning block {block_number}: {e:#}");
                    result.blocks_failed += 1;
                }
            }

            result.blocks_to_scan = count_blocks - result.blocks_done;
            result.progress_percentage =
                round2(result.blocks_done as f64 / count_blocks as f64 * 100.0);
            self.publish_progress(&result).await;
        }

        for exporter in &mut self.exporters {
            let summary = exporter.after_batch_run(&result).await?;
            result.merge_final(&summary);
        }

        Ok(result)
    }

    /// Progress snapshots are observability only; a cache hiccup must not
    /// fail the batch.
    async fn publish_progress(&self, result: &BatchResult) {
        if let Err(e) = self
            .ctx
            .cache
            .set(&BATCH_PROGRESS, &self.batch.id.to_string(), result, None)
            .await
        {
            warn!("Failed to publish progress for batch {}: {e:#}", self.batch.id);
        }
    }
}
