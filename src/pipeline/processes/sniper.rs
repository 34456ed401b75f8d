//! `process_sniper`: FIFO-paired sniper bot round trips
//!
//! Fills are streamed through one `PairingEngine` for the whole run. Closed
//! trades are written batch by batch; the cursor only moves to balance points
//! (see `pairing`), so positions still open at the end of a run are rebuilt
//! from source next time. When the source is exhausted, whatever is still
//! open is written as `open` records (orphan sells flagged for review).

use crate::pipeline::error::RunFailure;
use crate::pipeline::pairing::{PairingEngine, TradeMatch};
use crate::pipeline::records::{ProcessedTrade, PROCESSED_SNIPER};
use crate::pipeline::runner::{write_records, Process, RunContext, RunReport, RunStage, StageMachine};
use crate::pipeline::types::TableSpec;
use async_trait::async_trait;

const NAME: &str = "process_sniper";

pub struct SniperProcess;

#[async_trait]
impl Process for SniperProcess {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Pair sniper bot buys and sells FIFO into realized round trips"
    }

    fn destination_table(&self) -> &'static TableSpec {
        &PROCESSED_SNIPER
    }

    async fn run(&self, ctx: &RunContext) -> Result<RunReport, RunFailure> {
        let mut machine = StageMachine::new(NAME);
        let table = ctx.settings.tables.fills.clone();
        let batch_size = ctx.settings.batch_size.max(1);

        let cursor = ctx
            .cursors
            .get_cursor(&table)
            .await
            .map_err(|e| machine.fail(e))?;
        let mut report = RunReport::new(NAME, cursor.last_processed_id);
        let mut read_from = cursor.last_processed_id;
        let mut engine = PairingEngine::new();
        let mut enricher = ctx.enricher();

        log::info!("🔄 {}: reading {} after id={}", NAME, table, read_from);

        loop {
            machine.enter(RunStage::Fetching);
            let fills = ctx
                .source
                .fetch_fills(&table, read_from, batch_size)
                .await
                .map_err(|e| machine.fail(e))?;
            if fills.is_empty() && engine.is_balanced() {
                break;
            }
            let exhausted = fills.len() < batch_size;
            if !fills.is_empty() {
                report.batches += 1;
                report.read += fills.len();
            }

            let stamps: Vec<(i64, i64)> = fills.iter().map(|f| (f.source_id, f.timestamp)).collect();
            if let Some(max_id) = stamps.iter().map(|(id, _)| *id).max() {
                read_from = max_id;
            }

            machine.enter(RunStage::Transforming);
            let ignored_before = engine.ignored();
            let batch = engine.pair_batch(fills);
            report.ignored += engine.ignored() - ignored_before;

            for issue in engine.take_issues() {
                report.note_issue(&issue);
            }

            let mut trades: Vec<TradeMatch> = batch.closed;
            if exhausted {
                let open = engine.open_positions();
                report.open_positions += open.len();
                report.oldest_open_id = engine.oldest_open_id();
                for issue in open.iter().filter_map(TradeMatch::data_issue) {
                    report.flagged += 1;
                    report.note_issue(&issue);
                }
                trades.extend(open);
            }
            report.transformed += trades.len();

            machine.enter(RunStage::Enriching);
            enricher
                .enrich(trades.iter().map(|t| t.token_address.clone()))
                .await;
            let records: Vec<ProcessedTrade> = trades
                .iter()
                .map(|t| {
                    if !enricher.is_resolved(&t.token_address) {
                        report.enrichment_failed += 1;
                    }
                    ProcessedTrade::from_match(t, &enricher.metadata_for(&t.token_address))
                })
                .collect();

            machine.enter(RunStage::Writing);
            let summary = write_records(ctx.destination.as_ref(), &records)
                .await
                .map_err(|e| machine.fail(e))?;
            report.absorb_insert(summary);

            machine.enter(RunStage::Tracking);
            if let Some(safe_point) = batch.safe_point.filter(|id| *id > report.cursor_after) {
                let last_ts = stamps
                    .iter()
                    .filter(|(id, _)| *id <= safe_point)
                    .map(|(_, ts)| *ts)
                    .max();
                let stored = ctx
                    .cursors
                    .advance(&table, safe_point, last_ts)
                    .await
                    .map_err(|e| machine.fail(e))?;
                report.cursor_after = stored.last_processed_id;
            }

            log::info!(
                "📦 {}: batch {} ({} fills, {} trades, {} new, cursor {})",
                NAME,
                report.batches,
                stamps.len(),
                trades.len(),
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
}
