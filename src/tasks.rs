use crate::batch_runner::BatchRunner;
use crate::cache::{BATCH_PROGRESS, BLOCK_SCANS, OPERATIONS};
use crate::context::Context;
use crate::planner::{OperationInfo, OperationPlanner};
use crate::repository::{
    BatchRepository, BatchStatusCounts, Operation, OperationRepository, OperationStatus,
};
use crate::task_queue::TaskQueue;
use crate::types::BatchResult;
use anyhow::{Context as _, Result};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, warn};

const FAILURE_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub max_batches: Option<usize>,
    pub force_scan: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RunSummary {
    pub batches_completed: u64,
    pub batches_failed: u64,
    pub batches_skipped: u64,
}

/// Plan a new archival operation from the configured start block to the
/// current chain head.
pub async fn plan_operation(
    ctx: Arc<Context>,
    start_block: Option<u64>,
    batch_size: Option<u64>,
    dry_run: bool,
) -> Result<OperationInfo> {
    info!("Starting task: plan-operation");
    let start_block = start_block.unwrap_or(ctx.config.start_block);
    let batch_size = batch_size.unwrap_or(ctx.config.batch_size);

    OperationPlanner::new(ctx, start_block, batch_size, dry_run)
        .run()
        .await
}

/// Work through pending batches until none are left, the wall-clock budget
/// is spent, or too many batches fail in a row. Batches are paced through a
/// task queue so a worker cap and an inter-batch delay both apply.
pub async fn run_pending_batches(ctx: Arc<Context>, options: RunOptions) -> Result<RunSummary> {
    info!("Starting task: batch-run");
    let started = Instant::now();
    let queue = TaskQueue::new(ctx.config.batch_workers, ctx.config.batch_delay)?;
    let batch_repo = BatchRepository::new(&ctx.db);

    let mut summary = RunSummary::default();
    let mut consecutive_failures = 0u32;
    let mut taken = 0usize;

    loop {
        if started.elapsed() > ctx.config.run_time_budget {
            info!("Batch processing time budget reached");
            break;
        }
        if consecutive_failures >= ctx.config.max_consecutive_failures {
            warn!(
                "Giving up after {} consecutive batch failure(s)",
                consecutive_failures
            );
            break;
        }

        let mut room = ctx.config.batch_workers;
        if let Some(max) = options.max_batches {
            room = room.min(max.saturating_sub(taken));
        }
        if room == 0 {
            break;
        }

        let candidates = batch_repo.list_pending(room)?;
        if candidates.is_empty() {
            if taken == 0 {
                info!("No pending batches found");
            }
            break;
        }
        taken += candidates.len();
        let touched_operations: Vec<i64> = candidates.iter().map(|b| b.operation_id).collect();

        let jobs = candidates.into_iter().map(|batch| {
            let ctx = Arc::clone(&ctx);
            let force_scan = options.force_scan;
            let batch_id = batch.id;
            queue.add(async move {
                BatchRunner::new(ctx, batch, force_scan)
                    .run()
                    .await
                    .with_context(|| format!("batch {batch_id} failed"))
            })
        });

        for outcome in join_all(jobs).await {
            match outcome {
                Ok(result) if result.skipped => {
                    summary.batches_skipped += 1;
                }
                Ok(result) => {
                    summary.batches_completed += 1;
                    consecutive_failures = 0;
                    info!(
                        "Processed batch: {} transfer(s), {} wallet(s)",
                        result.transfers_count, result.wallets_count
                    );
                }
                Err(e) => {
                    summary.batches_failed += 1;
                    consecutive_failures += 1;
                    error!("{e:#}");
                    sleep(FAILURE_BACKOFF).await;
                }
            }
        }

        let mut seen = std::collections::HashSet::new();
        for operation_id in touched_operations {
            if seen.insert(operation_id) {
                refresh_operation_status(&ctx, operation_id)?;
            }
        }
    }

    queue.wait().await;
    info!(
        "Batch run finished: {} completed, {} failed, {} skipped",
        summary.batches_completed, summary.batches_failed, summary.batches_skipped
    );
    Ok(summary)
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationStatusReport {
    pub operation: Operation,
    pub batch_counts: BatchStatusCounts,
    pub running: Vec<(i64, BatchResult)>,
}

/// Snapshot of one operation: its row, batch counts per status, and the
/// cached progress of currently running batches.
pub async fn operation_status(
    ctx: Arc<Context>,
    operation_id: Option<i64>,
) -> Result<Option<OperationStatusReport>> {
    let operations = OperationRepository::new(&ctx.db);
    let operation = match operation_id {
        Some(id) => operations.get(id)?,
        None => operations.get_last()?,
    };
    let Some(operation) = operation else {
        return Ok(None);
    };

    let batch_repo = BatchRepository::new(&ctx.db);
    let batch_counts = batch_repo.status_counts(operation.id)?;

    let mut running = Vec::new();
    for batch in batch_repo.list_for_operation(operation.id)? {
        if batch.status == crate::repository::BatchStatus::Running {
            if let Some(progress) = ctx
                .cache
                .get::<BatchResult>(&BATCH_PROGRESS, &batch.id.to_string())
                .await?
            {
                running.push((batch.id, progress));
            }
        }
    }

    Ok(Some(OperationStatusReport {
        operation,
        batch_counts,
        running,
    }))
}

/// Remove every trace of previous runs: operation and batch rows, the ops
/// cache groups, local staging files, and the chain's prefix in object
/// storage.
pub async fn reset_all(ctx: Arc<Context>) -> Result<()> {
    info!("Starting task: reset");

    OperationRepository::new(&ctx.db).delete_all()?;

    ctx.cache.delete_by_group(&OPERATIONS).await?;
    ctx.cache.delete_by_group(&BATCH_PROGRESS).await?;
    ctx.cache.delete_by_group(&BLOCK_SCANS).await?;

    let staging = &ctx.config.base_storage_path;
    if tokio::fs::try_exists(staging).await? {
        tokio::fs::remove_dir_all(staging).await?;
    }

    let prefix = format!("chain-{}/", ctx.config.chain_id);
    if let Err(e) = ctx.storage.delete_prefix(&prefix).await {
        warn!("Failed to clear object storage prefix {prefix}: {e:#}");
    }

    info!("Reset complete");
    Ok(())
}

/// Mark an operation running/completed based on its batch counters. Called
/// by the run task after a sweep so the operation row tracks reality.
pub fn refresh_operation_status(ctx: &Context, operation_id: i64) -> Result<()> {
    let operations = OperationRepository::new(&ctx.db);
    let Some(operation) = operations.get(operation_id)? else {
        return Ok(());
    };

    let status = if operation.total_batches_pending == 0 {
        if operation.total_batches_failed > 0 {
            OperationStatus::Failed
        } else {
            OperationStatus::Completed
        }
    } else if operation.total_batches_completed > 0 || operation.total_batches_failed > 0 {
        OperationStatus::Running
    } else {
        OperationStatus::Pending
    };

    if status != operation.status {
        operations.update_status(operation_id, status)?;
    }
    Ok(())
}

