pub mod batch_repository;
pub mod database;
pub mod models;
pub mod operation_repository;

pub use batch_repository::{BatchRepository, BatchStatusCounts};
pub use database::Database;
pub use models::{Batch, BatchPlan, BatchStatus, Operation, OperationStatus};
pub use operation_repository::OperationRepository;
