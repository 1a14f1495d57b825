mod common;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use common::*;
use eth_archiver::batch_runner::BatchRunner;
use eth_archiver::exporters::Exporter;
use eth_archiver::repository::{
    Batch, BatchRepository, BatchStatus, Operation, OperationRepository, OperationStatus,
};
use eth_archiver::types::{BatchResult, BlockScanResult, ExportSummary};
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Seed an operation with one pending batch covering `start..=end`.
fn seed_batch(env: &TestEnv, start: u64, end: u64) -> Batch {
    let operations = OperationRepository::new(&env.ctx.db);
    let count = end - start + 1;
    let operation_id = operations
        .create(&Operation {
            id: 0,
            start_block: start,
            end_block: end,
            last_block: end,
            batch_size: count,
            total_batches: 1,
            total_batches_completed: 0,
            total_batches_failed: 0,
            total_batches_pending: 1,
            last_processed_block: 0,
            total_blocks: count,
            status: OperationStatus::Pending,
        })
        .unwrap();

    let batches = BatchRepository::new(&env.ctx.db);
    batches
        .create_many(
            operation_id,
            &[eth_archiver::repository::BatchPlan {
                seq: 1,
                start_block: start,
                end_block: end,
                count,
            }],
        )
        .unwrap();
    batches.list_for_operation(operation_id).unwrap().remove(0)
}

fn seed_empty_blocks(rpc: &mut MockChainRpc, start: u64, end: u64) {
    for number in start..=end {
        rpc.add_block(number, vec![]);
    }
}

#[tokio::test]
async fn a_failing_block_is_counted_and_the_batch_continues() {
    let mut rpc = MockChainRpc::new(10);
    seed_empty_blocks(&mut rpc, 0, 4);
    // Block 2 carries a transaction whose receipt fetch breaks.
    let poison = native_tx(9, 2, 5);
    rpc.add_block(2, vec![poison.clone()]);
    rpc.fail_receipt(poison.hash);
    let env = test_env(rpc);
    let batch = seed_batch(&env, 0, 4);

    let result = BatchRunner::new(Arc::clone(&env.ctx), batch.clone(), false)
        .run()
        .await
        .unwrap();

    assert_eq!(result.blocks_done, 4);
    assert_eq!(result.blocks_failed, 1);
    assert_eq!(result.count_blocks, 5);
    assert_eq!(result.progress_percentage, 80.0);

    let batches = BatchRepository::new(&env.ctx.db);
    assert_eq!(
        batches.get(batch.id).unwrap().unwrap().status,
        BatchStatus::Completed
    );

    let operations = OperationRepository::new(&env.ctx.db);
    let operation = operations.get(batch.operation_id).unwrap().unwrap();
    assert_eq!(operation.total_batches_completed, 1);
    assert_eq!(operation.total_batches_pending, 0);
    assert_eq!(operation.last_processed_block, 4);
}

#[tokio::test]
async fn progress_snapshots_are_monotonic() {
    let mut rpc = MockChainRpc::new(10);
    seed_empty_blocks(&mut rpc, 0, 3);
    let env = test_env(rpc);
    let batch = seed_batch(&env, 0, 3);
    let progress_prefix = format!("ops:archive:batches:{}", batch.id);

    BatchRunner::new(Arc::clone(&env.ctx), batch, false)
        .run()
        .await
        .unwrap();

    let sets = env.cache_store.sets.lock().unwrap();
    let snapshots: Vec<BatchResult> = sets
        .iter()
        .filter(|(key, _)| *key == progress_prefix)
        .map(|(_, value)| serde_json::from_str(value).unwrap())
        .collect();

    assert_eq!(snapshots.len(), 4);
    for window in snapshots.windows(2) {
        assert!(window[1].progress_percentage >= window[0].progress_percentage);
        assert!(window[1].blocks_done >= window[0].blocks_done);
    }
    assert_eq!(snapshots.last().unwrap().progress_percentage, 100.0);
    assert_eq!(snapshots.last().unwrap().blocks_to_scan, 0);
}

#[tokio::test]
async fn a_completed_batch_is_a_noop_without_force() {
    let env = test_env(MockChainRpc::new(10));
    let batch = seed_batch(&env, 0, 2);

    let batches = BatchRepository::new(&env.ctx.db);
    batches
        .update_status(batch.id, BatchStatus::Completed)
        .unwrap();
    let mut completed = batch.clone();
    completed.status = BatchStatus::Completed;

    let result = BatchRunner::new(Arc::clone(&env.ctx), completed, false)
        .run()
        .await
        .unwrap();

    assert!(result.skipped);
    assert_eq!(result.blocks_done, 0);
    assert_eq!(env.rpc.calls.get_block.load(Ordering::SeqCst), 0);

    let operations = OperationRepository::new(&env.ctx.db);
    let operation = operations.get(batch.operation_id).unwrap().unwrap();
    assert_eq!(operation.total_batches_completed, 0);
}

#[tokio::test]
async fn decoded_transfers_are_exported_and_uploaded() {
    let token = addr(0xaa);
    let mut rpc = MockChainRpc::new(10);
    rpc.add_block(0, vec![native_tx(1, 0, 100)]);
    let call = contract_tx(2, 1);
    rpc.add_block(1, vec![call.clone()]);
    rpc.set_receipt_logs(
        call.hash,
        vec![erc20_transfer_log(token, addr(0x11), addr(0x22), 100)],
    );
    rpc.add_block(2, vec![]);
    let env = test_env(rpc);
    let batch = seed_batch(&env, 0, 2);

    let result = BatchRunner::new(Arc::clone(&env.ctx), batch, false)
        .run()
        .await
        .unwrap();

    assert_eq!(result.transfers_count, 2);
    assert_eq!(result.wallets_count, 4);

    let transfers_path = env
        .bucket
        .path()
        .join("chain-1/transfers/transfers-0-2.csv");
    let contents = std::fs::read_to_string(&transfers_path).unwrap();
    assert!(contents.starts_with("tx_hash,kind,from,to,value,token_address,block_number\n"));
    assert!(contents.contains("ETH_TRANSFER"));
    assert!(contents.contains("ERC20_TRANSFER"));
    assert!(contents.contains("0x1111111111111111111111111111111111111111"));

    let wallets_path = env.bucket.path().join("chain-1/wallets/wallets-0-2.csv");
    let wallets = std::fs::read_to_string(&wallets_path).unwrap();
    assert_eq!(wallets.lines().count(), 5); // header + 4 unique addresses

    // Local staging files are gone after the upload.
    assert!(
        !env.staging
            .path()
            .join("chain-1/transfers/transfers-0-2.csv")
            .exists()
    );
}

#[tokio::test]
async fn an_empty_batch_is_not_uploaded_but_still_cleaned_up() {
    let mut rpc = MockChainRpc::new(10);
    seed_empty_blocks(&mut rpc, 0, 2);
    let env = test_env(rpc);
    let batch = seed_batch(&env, 0, 2);

    let result = BatchRunner::new(Arc::clone(&env.ctx), batch, false)
        .run()
        .await
        .unwrap();
    assert_eq!(result.transfers_count, 0);

    assert!(
        !env.bucket
            .path()
            .join("chain-1/transfers/transfers-0-2.csv")
            .exists()
    );
    assert!(
        !env.staging
            .path()
            .join("chain-1/transfers/transfers-0-2.csv")
            .exists()
    );
}

struct ExplodingExporter;

#[async_trait]
impl Exporter for ExplodingExporter {
    fn name(&self) -> &'static str {
        "exploding"
    }

    async fn init(&mut self) -> Result<()> {
        Ok(())
    }

    async fn before_batch_run(&mut self) -> Result<()> {
        Ok(())
    }

    async fn after_block_scan(&mut self, _result: &BlockScanResult) -> Result<ExportSummary> {
        Ok(ExportSummary::default())
    }

    async fn after_batch_run(&mut self, _result: &BatchResult) -> Result<ExportSummary> {
        Err(anyhow!("upload broke"))
    }
}

#[tokio::test]
async fn an_exporter_failure_fails_the_batch() {
    let mut rpc = MockChainRpc::new(10);
    seed_empty_blocks(&mut rpc, 0, 1);
    let env = test_env(rpc);
    let batch = seed_batch(&env, 0, 1);

    let runner = BatchRunner::with_exporters(
        Arc::clone(&env.ctx),
        batch.clone(),
        false,
        vec![Box::new(ExplodingExporter)],
    );
    let error = runner.run().await.unwrap_err();
    assert!(error.to_string().contains("upload broke"));

    let batches = BatchRepository::new(&env.ctx.db);
    assert_eq!(
        batches.get(batch.id).unwrap().unwrap().status,
        BatchStatus::Failed
    );

    let operations = OperationRepository::new(&env.ctx.db);
    let operation = operations.get(batch.operation_id).unwrap().unwrap();
    assert_eq!(operation.total_batches_failed, 1);
}

#[tokio::test]
async fn a_batch_cannot_be_claimed_twice() {
    let mut rpc = MockChainRpc::new(10);
    seed_empty_blocks(&mut rpc, 0, 1);
    let env = test_env(rpc);
    let batch = seed_batch(&env, 0, 1);

    // Another runner claimed it first.
    let batches = BatchRepository::new(&env.ctx.db);
    assert!(batches.claim(batch.id).unwrap());

    let result = BatchRunner::new(Arc::clone(&env.ctx), batch, false)
        .run()
        .await
        .unwrap();
    assert!(result.skipped);
    assert_eq!(env.rpc.calls.get_block.load(Ordering::SeqCst), 0);
}
