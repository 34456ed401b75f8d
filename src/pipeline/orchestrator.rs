//! Pipeline orchestrator: list, run one, run all
//!
//! Every run is wrapped in the single-instance lease of its process. `run_all`
//! executes processes sequentially in registration order and isolates
//! failures: one process failing never prevents the next from running.

use super::error::{PipelineError, RunFailure};
use super::processes::default_processes;
use super::runner::{Process, RunContext, RunReport, RunStage};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of one process inside `run_all`
#[derive(Debug)]
pub struct ProcessOutcome {
    pub name: &'static str,
    pub result: Result<RunReport, RunFailure>,
    pub elapsed: Duration,
}

impl ProcessOutcome {
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-process pass/fail table of a `run_all`
#[derive(Debug, Default)]
pub struct RunAllSummary {
    pub outcomes: Vec<ProcessOutcome>,
}

impl RunAllSummary {
    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(ProcessOutcome::passed)
    }

    pub fn failed(&self) -> Vec<&'static str> {
        self.outcomes
            .iter()
            .filter(|o| !o.passed())
            .map(|o| o.name)
            .collect()
    }

    pub fn outcome(&self, name: &str) -> Option<&ProcessOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    pub fn log_table(&self) {
        let passed = self.outcomes.iter().filter(|o| o.passed()).count();
        log::info!(
            "📊 Pipeline summary: {}/{} processes passed",
            passed,
            self.outcomes.len()
        );

        let last = self.outcomes.len().saturating_sub(1);
        for (i, outcome) in self.outcomes.iter().enumerate() {
            let branch = if i == last { "└─" } else { "├─" };
            match &outcome.result {
                Ok(report) => log::info!(
                    "   {} ✅ PASS {:<24} read={} written={} dup={} enrich_failed={} issues={} cursor={}->{} ({:.1}s)",
                    branch,
                    outcome.name,
                    report.read,
                    report.written,
                    report.skipped_duplicate,
                    report.enrichment_failed,
                    report.data_issues,
                    report.cursor_before,
                    report.cursor_after,
                    outcome.elapsed.as_secs_f64()
                ),
                Err(failure) => log::error!(
                    "   {} ❌ FAIL {:<24} stage={} error={} ({:.1}s)",
                    branch,
                    outcome.name,
                    failure.stage.as_str(),
                    failure.error,
                    outcome.elapsed.as_secs_f64()
                ),
            }
        }
    }
}

pub struct PipelineOrchestrator {
    ctx: RunContext,
    processes: Vec<Arc<dyn Process>>,
}

impl PipelineOrchestrator {
    /// Orchestrator over the default process registry
    pub fn new(ctx: RunContext) -> Self {
        Self::with_processes(ctx, default_processes())
    }

    pub fn with_processes(ctx: RunContext, processes: Vec<Arc<dyn Process>>) -> Self {
        Self { ctx, processes }
    }

    /// (name, description) of every registered process
    pub fn list(&self) -> Vec<(&'static str, &'static str)> {
        self.processes
            .iter()
            .map(|p| (p.name(), p.description()))
            .collect()
    }

    fn find(&self, name: &str) -> Option<&Arc<dyn Process>> {
        self.processes.iter().find(|p| p.name() == name)
    }

    /// Run a single process under its run lease
    pub async fn run_one(&self, name: &str) -> Result<RunReport, RunFailure> {
        let idle_failure = |error: PipelineError| RunFailure {
            process: name.to_string(),
            stage: RunStage::Idle,
            error,
        };

        let process = self
            .find(name)
            .ok_or_else(|| idle_failure(PipelineError::UnknownProcess(name.to_string())))?;

        let destination = &self.ctx.destination;
        destination.setup().await.map_err(idle_failure)?;
        destination
            .ensure_table(process.destination_table())
            .await
            .map_err(idle_failure)?;

        let acquired = destination
            .try_acquire_run_lock(name, self.ctx.settings.run_lock_ttl_secs)
            .await
            .map_err(idle_failure)?;
        if !acquired {
            log::warn!("⚠️  {} is already running, skipping", name);
            return Err(idle_failure(PipelineError::AlreadyRunning(name.to_string())));
        }

        log::info!("🚀 Starting {}", name);
        let result = process.run(&self.ctx).await;

        if let Err(e) = destination.release_run_lock(name).await {
            log::warn!("⚠️  Failed to release run lock of {}: {}", name, e);
        }

        if let Ok(report) = &result {
            report.log_summary();
        }
        result
    }

    /// Run every process in registration order, isolating failures
    pub async fn run_all(&self) -> RunAllSummary {
        let mut summary = RunAllSummary::default();

        for process in &self.processes {
            let start = Instant::now();
            let result = self.run_one(process.name()).await;
            summary.outcomes.push(ProcessOutcome {
                name: process.name(),
                result,
                elapsed: start.elapsed(),
            });
        }

        summary.log_table();
        summary
    }
}
