mod common;

use common::*;
use eth_archiver::planner::OperationPlanner;
use eth_archiver::repository::{BatchRepository, BatchStatus, OperationRepository};
use std::sync::Arc;

#[tokio::test]
async fn plans_and_persists_a_contiguous_partition() {
    let env = test_env(MockChainRpc::new(1_049));

    let info = OperationPlanner::new(Arc::clone(&env.ctx), 0, 100, false)
        .run()
        .await
        .unwrap();

    assert_eq!(info.operation.total_blocks, 1_050);
    assert_eq!(info.operation.total_batches, 11);
    assert_eq!(info.operation.total_batches_pending, 11);
    assert_eq!(info.operation.end_block, 1_049);

    let batches = BatchRepository::new(&env.ctx.db)
        .list_for_operation(info.operation.id)
        .unwrap();
    assert_eq!(batches.len(), 11);
    assert_eq!(batches[0].start_block, 0);
    assert_eq!(batches[10].end_block, 1_049);
    assert_eq!(batches[10].count, 50);

    // No gaps, no overlaps, and the counts tile the whole range.
    let total: u64 = batches.iter().map(|b| b.count).sum();
    assert_eq!(total, info.operation.total_blocks);
    for window in batches.windows(2) {
        assert_eq!(window[0].end_block + 1, window[1].start_block);
    }
    assert!(batches.iter().all(|b| b.status == BatchStatus::Pending));
    for (index, batch) in batches.iter().enumerate() {
        assert_eq!(batch.seq, index as u64 + 1);
    }
}

#[tokio::test]
async fn a_dry_run_computes_the_plan_without_persisting() {
    let env = test_env(MockChainRpc::new(999));

    let info = OperationPlanner::new(Arc::clone(&env.ctx), 0, 100, true)
        .run()
        .await
        .unwrap();

    assert_eq!(info.batches.len(), 10);
    assert_eq!(info.operation.id, 0);
    assert!(
        OperationRepository::new(&env.ctx.db)
            .get_last()
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn large_plans_are_persisted_in_chunks() {
    let env = test_env(MockChainRpc::new(2_549));

    let info = OperationPlanner::new(Arc::clone(&env.ctx), 0, 10, false)
        .run()
        .await
        .unwrap();

    assert_eq!(info.operation.total_batches, 255);
    let batches = BatchRepository::new(&env.ctx.db)
        .list_for_operation(info.operation.id)
        .unwrap();
    assert_eq!(batches.len(), 255);
    assert_eq!(batches[254].end_block, 2_549);
}

#[tokio::test]
async fn a_nonzero_start_block_anchors_the_partition() {
    let env = test_env(MockChainRpc::new(250));

    let info = OperationPlanner::new(Arc::clone(&env.ctx), 200, 20, false)
        .run()
        .await
        .unwrap();

    assert_eq!(info.operation.total_blocks, 51);
    assert_eq!(info.batches[0].start_block, 200);
    assert_eq!(info.batches.last().unwrap().end_block, 250);
}

#[tokio::test]
async fn head_block_failure_is_fatal() {
    let mut rpc = MockChainRpc::new(0);
    rpc.fail_latest = true;
    let env = test_env(rpc);

    let result = OperationPlanner::new(Arc::clone(&env.ctx), 0, 100, false)
        .run()
        .await;
    assert!(result.is_err());
    assert!(
        OperationRepository::new(&env.ctx.db)
            .get_last()
            .unwrap()
            .is_none()
    );
}
