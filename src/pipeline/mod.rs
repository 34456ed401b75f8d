//! # Incremental Trade Processing Pipeline
//!
//! Reads raw bot trade logs from a read-only source database, transforms them
//! into analytic records and writes them to a processed destination.
//!
//! ## Flow per process run
//!
//! 1. Load the cursor of the source table (`tracker`)
//! 2. Fetch the next batch of rows with `id > cursor` (`source`)
//! 3. Transform: clean, pair FIFO or compute direct profit (`cleaning`, `pairing`)
//! 4. Enrich with token symbol/name, bounded and cached (`enricher`)
//! 5. Hash and insert, skipping rows already present (`hasher`, `db`)
//! 6. Advance the cursor
//!
//! Re-running over the same source never produces duplicate records.
//!
//! ## Module Organization

pub mod bounded;
pub mod cleaning;
pub mod config;
pub mod db;
pub mod dexscreener;
pub mod enricher;
pub mod error;
pub mod hasher;
pub mod helius;
pub mod orchestrator;
pub mod pairing;
pub mod processes;
pub mod records;
pub mod retry;
pub mod runner;
pub mod source;
pub mod tracker;
pub mod types;

pub use error::{EnrichmentError, PipelineError, RunFailure};
pub use orchestrator::{PipelineOrchestrator, RunAllSummary};
pub use runner::{Process, RunContext, RunReport, RunStage};
