use anyhow::{Context, Result, anyhow};
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle to the SQLite store holding Operation and Batch rows.
///
/// The connection sits behind a mutex so repositories stay cheap to clone
/// into concurrently running batch runners; the lock is never held across an
/// await point.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(db_path: &str) -> Result<Self> {
        let db_path = db_path.strip_prefix("sqlite:").unwrap_or(db_path);
        let conn = Connection::open(db_path).context("Failed to open database")?;

        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.create_tables()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS operations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                start_block INTEGER NOT NULL,
                end_block INTEGER NOT NULL,
                last_block INTEGER NOT NULL,
                batch_size INTEGER NOT NULL,
                total_batches INTEGER NOT NULL,
                total_batches_completed INTEGER NOT NULL,
                total_batches_failed INTEGER NOT NULL,
                total_batches_pending INTEGER NOT NULL,
                last_processed_block INTEGER NOT NULL,
                total_blocks INTEGER NOT NULL,
                status TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS batches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                operation_id INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                start_block INTEGER NOT NULL,
                end_block INTEGER NOT NULL,
                count INTEGER NOT NULL,
                status TEXT NOT NULL,
                FOREIGN KEY (operation_id) REFERENCES operations(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_batches_status_start
             ON batches(status, start_block)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_batches_operation
             ON batches(operation_id)",
            [],
        )?;

        Ok(())
    }
}
