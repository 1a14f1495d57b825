use super::database::Database;
use super::models::{Operation, OperationStatus};
use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};

pub struct OperationRepository {
    db: Database,
}

impl OperationRepository {
    const INSERT_OPERATION: &'static str = "INSERT INTO operations (
            start_block, end_block, last_block, batch_size, total_batches,
            total_batches_completed, total_batches_failed, total_batches_pending,
            last_processed_block, total_blocks, status
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

    const SELECT_OPERATION: &'static str = "SELECT id, start_block, end_block, last_block,
            batch_size, total_batches, total_batches_completed, total_batches_failed,
            total_batches_pending, last_processed_block, total_blocks, status
        FROM operations";

    // Pending never goes below zero; re-runs of completed batches would
    // otherwise drive it negative.
    const RECORD_BATCH_COMPLETED: &'static str = "UPDATE operations SET
            total_batches_completed = total_batches_completed + 1,
            total_batches_pending = MAX(total_batches_pending - 1, 0)
        WHERE id = ?1";

    const RECORD_BATCH_FAILED: &'static str = "UPDATE operations SET
            total_batches_failed = total_batches_failed + 1,
            total_batches_pending = MAX(total_batches_pending - 1, 0)
        WHERE id = ?1";

    pub fn new(db: &Database) -> Self {
        Self { db: db.clone() }
    }

    pub fn create(&self, operation: &Operation) -> Result<i64> {
        let conn = self.db.conn()?;
        conn.execute(
            Self::INSERT_OPERATION,
            params![
                operation.start_block,
                operation.end_block,
                operation.last_block,
                operation.batch_size,
                operation.total_batches,
                operation.total_batches_completed,
                operation.total_batches_failed,
                operation.total_batches_pending,
                operation.last_processed_block,
                operation.total_blocks,
                operation.status.as_str(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get(&self, id: i64) -> Result<Option<Operation>> {
        let conn = self.db.conn()?;
        let operation = conn
            .query_row(
                &format!("{} WHERE id = ?1", Self::SELECT_OPERATION),
                params![id],
                Self::row_to_operation,
            )
            .optional()?;
        Ok(operation)
    }

    pub fn get_last(&self) -> Result<Option<Operation>> {
        let conn = self.db.conn()?;
        let operation = conn
            .query_row(
                &format!("{} ORDER BY id DESC LIMIT 1", Self::SELECT_OPERATION),
                [],
                Self::row_to_operation,
            )
            .optional()?;
        Ok(operation)
    }

    pub fn update_status(&self, id: i64, status: OperationStatus) -> Result<()> {
        self.db.conn()?.execute(
            "UPDATE operations SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(())
    }

    pub fn record_batch_completed(&self, id: i64) -> Result<()> {
        self.db
            .conn()?
            .execute(Self::RECORD_BATCH_COMPLETED, params![id])?;
        Ok(())
    }

    pub fn record_batch_failed(&self, id: i64) -> Result<()> {
        self.db
            .conn()?
            .execute(Self::RECORD_BATCH_FAILED, params![id])?;
        Ok(())
    }

    /// Advance the high-water mark; it never moves backwards.
    pub fn update_last_processed_block(&self, id: i64, block_number: u64) -> Result<()> {
        self.db.conn()?.execute(
            "UPDATE operations SET last_processed_block = MAX(last_processed_block, ?1)
             WHERE id = ?2",
            params![block_number, id],
        )?;
        Ok(())
    }

    /// Wipe every operation and its batches. Only the explicit reset task
    /// calls this.
    pub fn delete_all(&self) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute("DELETE FROM batches", [])?;
        conn.execute("DELETE FROM operations", [])?;
        Ok(())
    }

    fn row_to_operation(row: &Row) -> rusqlite::Result<Operation> {
        let status: String = row.get(11)?;
        let status = OperationStatus::parse(&status).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                11,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?;
        Ok(Operation {
            id: row.get(0)?,
            start_block: row.get(1)?,
            end_block: row.get(2)?,
            last_block: row.get(3)?,
            batch_size: row.get(4)?,
            total_batches: row.get(5)?,
            total_batches_completed: row.get(6)?,
            total_batches_failed: row.get(7)?,
            total_batches_pending: row.get(8)?,
            last_processed_block: row.get(9)?,
            total_blocks: row.get(10)?,
            status,
        })
    }
}
