use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Running => "running",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(match raw {
            "pending" => OperationStatus::Pending,
            "running" => OperationStatus::Running,
            "completed" => OperationStatus::Completed,
            "failed" => OperationStatus::Failed,
            other => bail!("unknown operation status: {other}"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(match raw {
            "pending" => BatchStatus::Pending,
            "running" => BatchStatus::Running,
            "completed" => BatchStatus::Completed,
            "failed" => BatchStatus::Failed,
            other => bail!("unknown batch status: {other}"),
        })
    }
}

/// One archival run over a contiguous block range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: i64,
    pub start_block: u64,
    pub end_block: u64,
    pub last_block: u64,
    pub batch_size: u64,
    pub total_batches: u64,
    pub total_batches_completed: u64,
    pub total_batches_failed: u64,
    pub total_batches_pending: u64,
    pub last_processed_block: u64,
    pub total_blocks: u64,
    pub status: OperationStatus,
}

/// A contiguous slice of an operation's range, the unit of resumable work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: i64,
    pub operation_id: i64,
    pub seq: u64,
    pub start_block: u64,
    pub end_block: u64,
    pub count: u64,
    pub status: BatchStatus,
}

/// A planned batch before persistence assigns it a row id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPlan {
    pub seq: u64,
    pub start_block: u64,
    pub end_block: u64,
    pub count: u64,
}
