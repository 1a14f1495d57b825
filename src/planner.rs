use crate::context::Context;
use crate::repository::{
    BatchPlan, BatchRepository, Operation, OperationRepository, OperationStatus,
};
use anyhow::{Context as _, Result, ensure};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Batch rows are persisted in chunks to bound the insert size.
const BATCH_INSERT_CHUNK: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct OperationInfo {
    pub operation: Operation,
    pub batches: Vec<BatchPlan>,
}

/// Computes the full block range of an archival run from the chain head,
/// partitions it into batches, and persists the plan. Partial persistence is
/// fatal and propagated: a half-written plan needs an operator, not a retry.
pub struct OperationPlanner {
    ctx: Arc<Context>,
    start_block: u64,
    batch_size: u64,
    disable_save: bool,
}

impl OperationPlanner {
    pub fn new(ctx: Arc<Context>, start_block: u64, batch_size: u64, disable_save: bool) -> Self {
        OperationPlanner {
            ctx,
            start_block,
            batch_size,
            disable_save,
        }
    }

    pub async fn run(&self) -> Result<OperationInfo> {
        ensure!(self.batch_size > 0, "batch size must be greater than 0");

        let last_block = self
            .ctx
            .rpc
            .get_latest_block_number()
            .await
            .context("failed to get last block")?;
        info!("Last block: {}", last_block);
        ensure!(
            last_block >= self.start_block,
            "chain head {last_block} is below start block {}",
            self.start_block
        );

        let total_blocks = last_block - self.start_block + 1;
        let batches = partition_blocks(self.start_block, last_block, self.batch_size);
        info!(
            "Operation planned: {} block(s) in {} batch(es) of up to {}",
            total_blocks,
            batches.len(),
            self.batch_size
        );

        let mut operation = Operation {
            id: 0,
            start_block: self.start_block,
            end_block: last_block,
            last_block,
            batch_size: self.batch_size,
            total_batches: batches.len() as u64,
            total_batches_completed: 0,
            total_batches_failed: 0,
            total_batches_pending: batches.len() as u64,
            last_processed_block: 0,
            total_blocks,
            status: OperationStatus::Pending,
        };

        if self.disable_save {
            info!("Operation not saved");
            return Ok(OperationInfo { operation, batches });
        }

        let operations = OperationRepository::new(&self.ctx.db);
        let operation_id = operations
            .create(&operation)
            .context("failed to create operation")?;
        operation.id = operation_id;
        info!("Operation created: {}", operation_id);

        let batch_repo = BatchRepository::new(&self.ctx.db);
        let mut saved = 0;
        for chunk in batches.chunks(BATCH_INSERT_CHUNK) {
            saved += batch_repo
                .create_many(operation_id, chunk)
                .with_context(|| {
                    format!("failed to save batches {}..{} of operation {operation_id}", saved, saved + chunk.len())
                })?;
        }
        info!("Saved {} batch(es) for operation {}", saved, operation_id);

        Ok(OperationInfo { operation, batches })
    }
}

/// Tile `[start_block, last_block]` into `batch_size`-wide slices with a
/// 1-based sequence number. The last slice may be shorter.
pub fn partition_blocks(start_block: u64, last_block: u64, batch_size: u64) -> Vec<BatchPlan> {
    let mut batches = Vec::new();
    let mut current = start_block;
    let mut seq = 1;

    while current <= last_block {
        let end = last_block.min(current + batch_size - 1);
        batches.push(BatchPlan {
            seq,
            start_block: current,
            end_block: end,
            count: end - current + 1,
        });
        current = end + 1;
        seq += 1;
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partition_invariants(plans: &[BatchPlan], start: u64, last: u64) {
        assert_eq!(plans.first().unwrap().start_block, start);
        assert_eq!(plans.last().unwrap().end_block, last);
        let total: u64 = plans.iter().map(|p| p.count).sum();
        assert_eq!(total, last - start + 1);
        for window in plans.windows(2) {
            assert_eq!(window[0].end_block + 1, window[1].start_block);
        }
        for (index, plan) in plans.iter().enumerate() {
            assert_eq!(plan.seq, index as u64 + 1);
            assert_eq!(plan.count, plan.end_block - plan.start_block + 1);
        }
    }

    #[test]
    fn partitions_exactly_with_a_short_tail() {
        let plans = partition_blocks(0, 1049, 100);
        assert_eq!(plans.len(), 11);
        assert_eq!(plans[10].count, 50);
        assert_partition_invariants(&plans, 0, 1049);
    }

    #[test]
    fn partitions_an_even_range_without_a_tail() {
        let plans = partition_blocks(100, 399, 100);
        assert_eq!(plans.len(), 3);
        assert!(plans.iter().all(|p| p.count == 100));
        assert_partition_invariants(&plans, 100, 399);
    }

    #[test]
    fn a_single_block_range_is_one_batch() {
        let plans = partition_blocks(7, 7, 1000);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].count, 1);
        assert_partition_invariants(&plans, 7, 7);
    }

    #[test]
    fn oversized_batch_size_collapses_to_one_batch() {
        let plans = partition_blocks(0, 9, 100);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].count, 10);
    }
}
