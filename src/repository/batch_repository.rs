use super::database::Database;
use super::models::{Batch, BatchPlan, BatchStatus};
use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct BatchStatusCounts {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

pub struct BatchRepository {
    db: Database,
}

impl BatchRepository {
    const INSERT_BATCH: &'static str = "INSERT INTO batches (
            operation_id, seq, start_block, end_block, count, status
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

    const SELECT_BATCH: &'static str =
        "SELECT id, operation_id, seq, start_block, end_block, count, status FROM batches";

    pub fn new(db: &Database) -> Self {
        Self { db: db.clone() }
    }

    pub fn create_many(&self, operation_id: i64, plans: &[BatchPlan]) -> Result<usize> {
        let conn = self.db.conn()?;
        let tx = conn.unchecked_transaction()?;
        let mut count = 0;

        {
            let mut stmt = tx.prepare(Self::INSERT_BATCH)?;
            for plan in plans {
                count += stmt.execute(params![
                    operation_id,
                    plan.seq,
                    plan.start_block,
                    plan.end_block,
                    plan.count,
                    BatchStatus::Pending.as_str(),
                ])?;
            }
        }

        tx.commit()?;
        Ok(count)
    }

    pub fn get(&self, id: i64) -> Result<Option<Batch>> {
        let conn = self.db.conn()?;
        let batch = conn
            .query_row(
                &format!("{} WHERE id = ?1", Self::SELECT_BATCH),
                params![id],
                Self::row_to_batch,
            )
            .optional()?;
        Ok(batch)
    }

    pub fn list_for_operation(&self, operation_id: i64) -> Result<Vec<Batch>> {
        let conn = self.db.conn()?;
        let mut stmt =
            conn.prepare(&format!("{} WHERE operation_id = ?1 ORDER BY seq", Self::SELECT_BATCH))?;
        let batches = stmt
            .query_map(params![operation_id], Self::row_to_batch)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(batches)
    }

    pub fn update_status(&self, id: i64, status: BatchStatus) -> Result<()> {
        self.db.conn()?.execute(
            "UPDATE batches SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(())
    }

    pub fn get_first_pending(&self) -> Result<Option<Batch>> {
        let conn = self.db.conn()?;
        let batch = conn
            .query_row(
                &format!(
                    "{} WHERE status = 'pending' ORDER BY start_block ASC LIMIT 1",
                    Self::SELECT_BATCH
                ),
                [],
                Self::row_to_batch,
            )
            .optional()?;
        Ok(batch)
    }

    pub fn list_pending(&self, limit: usize) -> Result<Vec<Batch>> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE status = 'pending' ORDER BY start_block ASC LIMIT ?1",
            Self::SELECT_BATCH
        ))?;
        let batches = stmt
            .query_map(params![limit], Self::row_to_batch)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(batches)
    }

    /// Atomically claim a pending batch. Returns false when the batch was
    /// not pending anymore, so a second runner cannot take the same batch.
    pub fn claim(&self, id: i64) -> Result<bool> {
        let changed = self.db.conn()?.execute(
            "UPDATE batches SET status = 'running' WHERE id = ?1 AND status = 'pending'",
            params![id],
        )?;
        Ok(changed == 1)
    }

    pub fn status_counts(&self, operation_id: i64) -> Result<BatchStatusCounts> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM batches WHERE operation_id = ?1 GROUP BY status",
        )?;
        let rows = stmt.query_map(params![operation_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;

        let mut counts = BatchStatusCounts::default();
        for row in rows {
            let (status, count) = row?;
            match BatchStatus::parse(&status)? {
                BatchStatus::Pending => counts.pending = count,
                BatchStatus::Running => counts.running = count,
                BatchStatus::Completed => counts.completed = count,
                BatchStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }

    fn row_to_batch(row: &Row) -> rusqlite::Result<Batch> {
        let status: String = row.get(6)?;
        let status = BatchStatus::parse(&status).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, e.into())
        })?;
        Ok(Batch {
            id: row.get(0)?,
            operation_id: row.get(1)?,
            seq: row.get(2)?,
            start_block: row.get(3)?,
            end_block: row.get(4)?,
            count: row.get(5)?,
            status,
        })
    }
}
