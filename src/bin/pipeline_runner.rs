//! Pipeline Runner
//!
//! Runs the incremental trade processes against the source and processed
//! databases configured in the environment (see `pipeline::config`).
//!
//! Usage:
//!   pipeline_runner list
//!   pipeline_runner run <process>
//!   pipeline_runner all
//!
//! Exits non-zero when any requested process fails.

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::{error, info};
use std::process::ExitCode;
use std::sync::Arc;
use tradeflow::pipeline::{
    config::PipelineConfig,
    db::SqliteDestination,
    orchestrator::PipelineOrchestrator,
    runner::RunContext,
    source::SqliteSource,
};

#[derive(Parser)]
#[command(name = "pipeline_runner")]
#[command(about = "Incremental trade processing pipeline", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered processes
    List,
    /// Run a single process by name
    Run {
        /// Process name, see `list`
        name: String,
    },
    /// Run every process in registration order
    All,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    info!("🚀 Pipeline Runner");
    info!("   └─ Version: {}", env!("CARGO_PKG_VERSION"));

    let config = PipelineConfig::from_env()?;
    config.log_summary();

    let source = SqliteSource::open(&config.source_db_path)?;
    let destination = Arc::new(SqliteDestination::open(
        &config.processed_db_path,
        &config.schema,
    )?);
    let ctx = RunContext {
        source: Arc::new(source),
        destination: destination.clone(),
        cursors: destination,
        metadata: config.metadata_provider()?,
        settings: config.run_settings(),
    };
    let orchestrator = PipelineOrchestrator::new(ctx);

    match args.command {
        Command::List => {
            let processes = orchestrator.list();
            info!("📋 {} registered processes", processes.len());
            for (name, description) in processes {
                println!("{:<24} {}", name, description);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { name } => match orchestrator.run_one(&name).await {
            Ok(_) => Ok(ExitCode::SUCCESS),
            Err(failure) => {
                error!("❌ {}", failure);
                Ok(ExitCode::FAILURE)
            }
        },
        Command::All => {
            let summary = orchestrator.run_all().await;
            if summary.all_passed() {
                info!("✅ All processes passed");
                Ok(ExitCode::SUCCESS)
            } else {
                error!("❌ Failed processes: {}", summary.failed().join(", "));
                Ok(ExitCode::FAILURE)
            }
        }
    }
}
