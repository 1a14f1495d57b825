use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_urls: Vec<String>,
    pub chain_id: u64,
    pub database_url: String,
    /// Local staging directory for export files before upload.
    pub base_storage_path: PathBuf,
    /// Root directory of the filesystem-backed object store.
    pub object_store_path: PathBuf,
    pub start_block: u64,
    pub batch_size: u64,
    /// Max transaction fetches in flight while resolving a block.
    pub fetch_concurrency: usize,
    /// Receipt/decode chunk size within a block scan.
    pub tx_chunk_size: usize,
    pub rpc_retries: usize,
    pub rpc_retry_delay: Duration,
    /// Concurrent batch runners in the run task.
    pub batch_workers: usize,
    /// Pause between batch runs on one worker.
    pub batch_delay: Duration,
    pub run_time_budget: Duration,
    pub max_consecutive_failures: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let rpc_urls: Vec<String> = std::env::var("RPC_URLS")
            .context("RPC_URLS must be set in .env")?
            .split(',')
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();

        let chain_id = parse_env("CHAIN_ID", 1)?;
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:./archiver.db".to_string());
        let base_storage_path =
            PathBuf::from(std::env::var("BASE_STORAGE_PATH").unwrap_or_else(|_| "storage".into()));
        let object_store_path = PathBuf::from(
            std::env::var("OBJECT_STORE_PATH").unwrap_or_else(|_| "archive-bucket".into()),
        );

        Ok(Config {
            rpc_urls,
            chain_id,
            database_url,
            base_storage_path,
            object_store_path,
            start_block: parse_env("START_BLOCK", 0)?,
            batch_size: parse_env("BATCH_SIZE", 10_000)?,
            fetch_concurrency: parse_env("FETCH_CONCURRENCY", 20)?,
            tx_chunk_size: parse_env("TX_CHUNK_SIZE", 10)?,
            rpc_retries: parse_env("RPC_RETRIES", 3)?,
            rpc_retry_delay: Duration::from_millis(parse_env("RPC_RETRY_DELAY_MS", 1_000)?),
            batch_workers: parse_env("BATCH_WORKERS", 1)?,
            batch_delay: Duration::from_millis(parse_env("BATCH_DELAY_MS", 0)?),
            run_time_budget: Duration::from_secs(parse_env("RUN_TIME_BUDGET_SECS", 30 * 60)?),
            max_consecutive_failures: parse_env("MAX_CONSECUTIVE_FAILURES", 5)?,
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("Invalid {name} value: {raw}")),
        Err(_) => Ok(default),
    }
}
