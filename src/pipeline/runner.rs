//! Process runner state machine and shared run plumbing
//!
//! ```text
//! IDLE → FETCHING → TRANSFORMING → ENRICHING → WRITING → TRACKING → DONE
//!           ↑                                               │
//!           └──────────────── next batch ───────────────────┘
//! FAILED is reachable from every non-terminal stage.
//! ```
//!
//! A failed run leaves its cursor where the last committed batch put it;
//! rows already written stay written.

use super::db::{Destination, InsertSummary};
use super::enricher::{MetadataEnricher, MetadataProvider};
use super::error::{PipelineError, RunFailure};
use super::hasher::hash_record;
use super::retry::RetryPolicy;
use super::source::SourceReader;
use super::tracker::CursorStore;
use super::types::{DestinationRecord, RecordRow, TableSpec, TokenMetadata};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Idle,
    Fetching,
    Transforming,
    Enriching,
    Writing,
    Tracking,
    Done,
    Failed,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Idle => "IDLE",
            RunStage::Fetching => "FETCHING",
            RunStage::Transforming => "TRANSFORMING",
            RunStage::Enriching => "ENRICHING",
            RunStage::Writing => "WRITING",
            RunStage::Tracking => "TRACKING",
            RunStage::Done => "DONE",
            RunStage::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStage::Done | RunStage::Failed)
    }

    pub fn can_transition_to(&self, next: RunStage) -> bool {
        use RunStage::*;

        if next == Failed {
            return !self.is_terminal();
        }

        matches!(
            (*self, next),
            (Idle, Fetching)
                | (Fetching, Transforming)
                | (Fetching, Done)
                | (Transforming, Enriching)
                | (Enriching, Writing)
                | (Writing, Tracking)
                | (Tracking, Fetching)
                | (Tracking, Done)
        )
    }
}

/// Stage bookkeeping for one run
#[derive(Debug)]
pub struct StageMachine {
    process: &'static str,
    stage: RunStage,
}

impl StageMachine {
    pub fn new(process: &'static str) -> Self {
        Self {
            process,
            stage: RunStage::Idle,
        }
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }

    pub fn enter(&mut self, next: RunStage) {
        debug_assert!(
            self.stage.can_transition_to(next),
            "illegal transition {} -> {}",
            self.stage.as_str(),
            next.as_str()
        );
        log::debug!("   {} {} -> {}", self.process, self.stage.as_str(), next.as_str());
        self.stage = next;
    }

    /// Move to FAILED, remembering the stage the error happened in
    pub fn fail(&mut self, error: PipelineError) -> RunFailure {
        let stage = self.stage;
        log::error!("❌ {} failed during {}: {}", self.process, stage.as_str(), error);
        self.stage = RunStage::Failed;

        RunFailure {
            process: self.process.to_string(),
            stage,
            error,
        }
    }
}

/// Source table names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTables {
    pub fills: String,
    pub arb_transactions: String,
    pub arb_opportunities: String,
    pub coin_info: String,
}

impl Default for SourceTables {
    fn default() -> Self {
        Self {
            fills: "btstransaction".to_string(),
            arb_transactions: "arbtransaction".to_string(),
            arb_opportunities: "arbopportunity".to_string(),
            coin_info: "btscoininfo".to_string(),
        }
    }
}

/// Knobs shared by every process run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub batch_size: usize,
    pub metadata_concurrency: usize,
    pub retry: RetryPolicy,
    pub run_lock_ttl_secs: i64,
    pub tables: SourceTables,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            batch_size: 5000,
            metadata_concurrency: 10,
            retry: RetryPolicy::default(),
            run_lock_ttl_secs: 3600,
            tables: SourceTables::default(),
        }
    }
}

/// Injected collaborators of a run
#[derive(Clone)]
pub struct RunContext {
    pub source: Arc<dyn SourceReader>,
    pub destination: Arc<dyn Destination>,
    pub cursors: Arc<dyn CursorStore>,
    pub metadata: Arc<dyn MetadataProvider>,
    pub settings: RunSettings,
}

impl RunContext {
    /// Fresh per-run enricher (its cache lives as long as the run)
    pub fn enricher(&self) -> MetadataEnricher {
        MetadataEnricher::new(
            self.metadata.clone(),
            self.settings.metadata_concurrency,
            self.settings.retry,
        )
    }
}

/// Counters reported by one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub process: String,
    pub batches: usize,
    pub read: usize,
    pub transformed: usize,
    pub written: usize,
    pub skipped_duplicate: usize,
    pub enrichment_failed: usize,
    pub ignored: usize,
    pub flagged: usize,
    pub open_positions: usize,
    /// Non-fatal `PipelineError::Transform` issues raised while pairing
    pub data_issues: usize,
    /// Oldest unmatched fill, which keeps the cursor from moving past it
    pub oldest_open_id: Option<i64>,
    pub cursor_before: i64,
    pub cursor_after: i64,
}

impl RunReport {
    pub fn new(process: &str, cursor: i64) -> Self {
        Self {
            process: process.to_string(),
            cursor_before: cursor,
            cursor_after: cursor,
            ..Default::default()
        }
    }

    pub fn absorb_insert(&mut self, summary: InsertSummary) {
        self.written += summary.inserted;
        self.skipped_duplicate += summary.skipped_duplicate;
    }

    /// Count and log a non-fatal data-quality issue
    pub fn note_issue(&mut self, issue: &PipelineError) {
        self.data_issues += 1;
        log::warn!("⚠️  {}: {}", self.process, issue);
    }

    pub fn log_summary(&self) {
        log::info!("✅ {} complete", self.process);
        log::info!(
            "   ├─ Read: {} rows in {} batches",
            self.read,
            self.batches
        );
        log::info!(
            "   ├─ Transformed: {} (ignored {}, flagged {}, open {})",
            self.transformed,
            self.ignored,
            self.flagged,
            self.open_positions
        );
        log::info!(
            "   ├─ Written: {} (duplicates skipped {})",
            self.written,
            self.skipped_duplicate
        );
        log::info!("   ├─ Enrichment failed: {}", self.enrichment_failed);
        log::info!("   ├─ Data issues: {}", self.data_issues);
        if let Some(id) = self.oldest_open_id {
            log::info!("   ├─ Cursor held by open fill id={}", id);
        }
        log::info!(
            "   └─ Cursor: {} -> {}",
            self.cursor_before,
            self.cursor_after
        );
    }
}

/// A registered unit of work
#[async_trait]
pub trait Process: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Destination relation the process writes
    fn destination_table(&self) -> &'static TableSpec;

    async fn run(&self, ctx: &RunContext) -> Result<RunReport, RunFailure>;
}

/// Hash and insert typed records, skipping duplicates
pub async fn write_records<R>(
    destination: &dyn Destination,
    records: &[R],
) -> Result<InsertSummary, PipelineError>
where
    R: DestinationRecord + Sync,
{
    let rows: Vec<RecordRow> = records.iter().map(hash_record).collect();
    destination.insert_if_absent(R::table(), &rows).await
}

/// A category processed row by row, without pairing
///
/// Implementors describe how to read, transform and (optionally) enrich
/// rows; `run_direct` drives the stage machine around them.
#[async_trait]
pub trait DirectCategory: Send + Sync {
    type Row: Send + Sync;
    type Record: DestinationRecord + Send + Sync;

    fn name(&self) -> &'static str;

    fn source_table<'a>(&self, settings: &'a RunSettings) -> &'a str;

    async fn fetch(
        &self,
        ctx: &RunContext,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<Self::Row>, PipelineError>;

    fn row_id(row: &Self::Row) -> i64;

    fn row_timestamp(_row: &Self::Row) -> Option<i64> {
        None
    }

    fn transform(&self, row: &Self::Row) -> Self::Record;

    /// Token whose metadata this record still needs
    fn metadata_token(_record: &Self::Record) -> Option<&str> {
        None
    }

    fn apply_metadata(_record: &mut Self::Record, _metadata: TokenMetadata) {}
}

/// Drive a direct category from its cursor to the end of the source table
pub async fn run_direct<C: DirectCategory>(
    category: &C,
    ctx: &RunContext,
) -> Result<RunReport, RunFailure> {
    let mut machine = StageMachine::new(category.name());
    let table = category.source_table(&ctx.settings).to_string();
    let batch_size = ctx.settings.batch_size.max(1);

    let cursor = ctx
        .cursors
        .get_cursor(&table)
        .await
        .map_err(|e| machine.fail(e))?;
    let mut report = RunReport::new(category.name(), cursor.last_processed_id);
    let mut enricher = ctx.enricher();

    log::info!(
        "🔄 {}: reading {} after id={}",
        category.name(),
        table,
        cursor.last_processed_id
    );

    loop {
        machine.enter(RunStage::Fetching);
        let rows = category
            .fetch(ctx, report.cursor_after, batch_size)
            .await
            .map_err(|e| machine.fail(e))?;
        if rows.is_empty() {
            break;
        }
        let exhausted = rows.len() < batch_size;
        report.batches += 1;
        report.read += rows.len();

        machine.enter(RunStage::Transforming);
        let mut records: Vec<C::Record> = rows.iter().map(|r| category.transform(r)).collect();
        report.transformed += records.len();

        machine.enter(RunStage::Enriching);
        let tokens: Vec<String> = records
            .iter()
            .filter_map(|r| C::metadata_token(r).map(str::to_string))
            .collect();
        if !tokens.is_empty() {
            enricher.enrich(tokens).await;
            for record in records.iter_mut() {
                if let Some(token) = C::metadata_token(record).map(str::to_string) {
                    if !enricher.is_resolved(&token) {
                        report.enrichment_failed += 1;
                    }
                    C::apply_metadata(record, enricher.metadata_for(&token));
                }
            }
        }

        machine.enter(RunStage::Writing);
        let summary = write_records(ctx.destination.as_ref(), &records)
            .await
            .map_err(|e| machine.fail(e))?;
        report.absorb_insert(summary);

        machine.enter(RunStage::Tracking);
        let last = rows.iter().max_by_key(|r| C::row_id(r));
        if let Some(last) = last {
            let stored = ctx
                .cursors
                .advance(&table, C::row_id(last), C::row_timestamp(last))
                .await
                .map_err(|e| machine.fail(e))?;
            report.cursor_after = stored.last_processed_id;
        }

        log::info!(
            "📦 {}: batch {} ({} rows, {} new, cursor {})",
            category.name(),
            report.batches,
            rows.len(),
            summary.inserted,
            report.cursor_after
        );

        if exhausted {
            break;
        }
    }

    machine.enter(RunStage::Done);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use RunStage::*;
        let path = [Idle, Fetching, Transforming, Enriching, Writing, Tracking, Fetching, Done];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_failed_reachable_until_terminal() {
        use RunStage::*;
        for stage in [Idle, Fetching, Transforming, Enriching, Writing, Tracking] {
            assert!(stage.can_transition_to(Failed));
        }
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Fetching));
        assert!(!Writing.can_transition_to(Done));
        assert!(!Transforming.can_transition_to(Tracking));
    }

    #[test]
    fn test_fail_records_stage() {
        let mut machine = StageMachine::new("process_arb");
        machine.enter(RunStage::Fetching);
        machine.enter(RunStage::Transforming);
        machine.enter(RunStage::Enriching);
        machine.enter(RunStage::Writing);

        let failure = machine.fail(PipelineError::Write("constraint".to_string()));

        assert_eq!(failure.stage, RunStage::Writing);
        assert_eq!(machine.stage(), RunStage::Failed);
    }

    #[test]
    fn test_report_starts_at_cursor() {
        let mut report = RunReport::new("clean_arb_opportunity", 42);
        report.absorb_insert(InsertSummary {
            inserted: 3,
            skipped_duplicate: 2,
        });

        assert_eq!(report.cursor_before, 42);
        assert_eq!(report.cursor_after, 42);
        assert_eq!(report.written, 3);
        assert_eq!(report.skipped_duplicate, 2);
    }
}
