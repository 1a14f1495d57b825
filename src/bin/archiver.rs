use anyhow::Result;
use clap::{Parser, Subcommand};
use eth_archiver::config::Config;
use eth_archiver::context::Context;
use eth_archiver::tasks::{
    RunOptions, operation_status, plan_operation, reset_all, run_pending_batches,
};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "archiver")]
#[command(about = "Archive historical value-transfer events to object storage", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan a new archival operation from the chain head
    Plan {
        #[arg(long)]
        start_block: Option<u64>,

        #[arg(long)]
        batch_size: Option<u64>,

        /// Compute the plan without persisting it
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },
    /// Run pending batches until done or the time budget is spent
    Run {
        #[arg(long)]
        max_batches: Option<usize>,

        /// Ignore idempotency markers and re-scan completed work
        #[arg(long, default_value = "false")]
        force: bool,
    },
    /// Show an operation's progress (defaults to the latest)
    Status {
        #[arg(long)]
        operation: Option<i64>,
    },
    /// Delete all operations, cache entries, and stored artifacts
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    info!("Configuration loaded for chain {}", config.chain_id);
    info!("RPC URLs: {} endpoint(s) configured", config.rpc_urls.len());

    let ctx = Context::bootstrap(config)?;

    match cli.command {
        Commands::Plan {
            start_block,
            batch_size,
            dry_run,
        } => {
            let info = plan_operation(ctx, start_block, batch_size, dry_run).await?;
            println!("{}", serde_json::to_string_pretty(&info.operation)?);
        }
        Commands::Run { max_batches, force } => {
            let summary = run_pending_batches(
                ctx,
                RunOptions {
                    max_batches,
                    force_scan: force,
                },
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Status { operation } => match operation_status(ctx, operation).await? {
            Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            None => error!("No operation found"),
        },
        Commands::Reset => {
            reset_all(ctx).await?;
        }
    }

    Ok(())
}
