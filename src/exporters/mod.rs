pub mod transfers;
pub mod wallets;

use crate::types::{BatchResult, BlockScanResult, ExportSummary};
use anyhow::Result;
use async_trait::async_trait;

pub use transfers::TransfersExporter;
pub use wallets::WalletsExporter;

/// Hooks a batch run drives for every output artifact: open the file, take
/// each block's decoded transactions, then flush/validate/upload/clean up
/// exactly once at the end of the batch.
#[async_trait]
pub trait Exporter: Send {
    fn name(&self) -> &'static str;
    async fn init(&mut self) -> Result<()>;
    async fn before_batch_run(&mut self) -> Result<()>;
    async fn after_block_scan(&mut self, result: &BlockScanResult) -> Result<ExportSummary>;
    async fn after_batch_run(&mut self, result: &BatchResult) -> Result<ExportSummary>;
}
