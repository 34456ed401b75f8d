//! `process_arb`: direct arbitrage round trips
//!
//! Every source row is already a complete round trip, so there is no pairing:
//! profit = sell amount - buy amount, classified WIN / LOSS / BREAKEVEN.
//! Symbol and name recorded by the bot are kept; only the missing ones are
//! looked up.

use crate::pipeline::error::{PipelineError, RunFailure};
use crate::pipeline::records::{ProcessedArb, PROCESSED_ARB};
use crate::pipeline::runner::{run_direct, DirectCategory, Process, RunContext, RunReport, RunSettings};
use crate::pipeline::types::{ArbTransactionRow, TableSpec, TokenMetadata, UNKNOWN_SENTINEL};
use async_trait::async_trait;

const NAME: &str = "process_arb";

pub struct ArbProcess;

#[async_trait]
impl DirectCategory for ArbProcess {
    type Row = ArbTransactionRow;
    type Record = ProcessedArb;

    fn name(&self) -> &'static str {
        NAME
    }

    fn source_table<'a>(&self, settings: &'a RunSettings) -> &'a str {
        &settings.tables.arb_transactions
    }

    async fn fetch(
        &self,
        ctx: &RunContext,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<ArbTransactionRow>, PipelineError> {
        ctx.source
            .fetch_arb_transactions(&ctx.settings.tables.arb_transactions, after_id, limit)
            .await
    }

    fn row_id(row: &ArbTransactionRow) -> i64 {
        row.source_id
    }

    fn row_timestamp(row: &ArbTransactionRow) -> Option<i64> {
        row.sell_timestamp.or(row.buy_timestamp)
    }

    fn transform(&self, row: &ArbTransactionRow) -> ProcessedArb {
        let metadata = TokenMetadata::new(
            row.symbol.as_deref().unwrap_or(UNKNOWN_SENTINEL),
            row.name.as_deref().unwrap_or(UNKNOWN_SENTINEL),
        );
        ProcessedArb::from_row(row, &metadata)
    }

    fn metadata_token(record: &ProcessedArb) -> Option<&str> {
        let missing = record.symbol == UNKNOWN_SENTINEL || record.name == UNKNOWN_SENTINEL;
        if missing && !record.token_address.is_empty() {
            Some(&record.token_address)
        } else {
            None
        }
    }

    fn apply_metadata(record: &mut ProcessedArb, metadata: TokenMetadata) {
        if record.symbol == UNKNOWN_SENTINEL {
            record.symbol = metadata.symbol;
        }
        if record.name == UNKNOWN_SENTINEL {
            record.name = metadata.name;
        }
    }
}

#[async_trait]
impl Process for ArbProcess {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Compute profit and outcome of arbitrage round trips"
    }

    fn destination_table(&self) -> &'static TableSpec {
        &PROCESSED_ARB
    }

    async fn run(&self, ctx: &RunContext) -> Result<RunReport, RunFailure> {
        run_direct(self, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processes::test_support::{harness, insert_arb};
    use crate::pipeline::tracker::{CursorStore, InMemoryCursorStore};
    use crate::pipeline::types::FieldValue;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_source_metadata_kept_and_missing_enriched() {
        let h = harness(&[("mintB", "BBB", "Token B")]).await;
        insert_arb(&h.source_path, 1, "mintA", 100.0, 120.0, Some(("AAA", "Token A")));
        insert_arb(&h.source_path, 2, "mintB", 100.0, 80.0, None);
        let ctx = h.context(10);

        let report = ArbProcess.run(&ctx).await.unwrap();

        assert_eq!(report.read, 2);
        assert_eq!(report.written, 2);
        assert_eq!(report.enrichment_failed, 0);
        assert_eq!(report.cursor_after, 2);
        assert_eq!(h.provider.calls_for("mintA"), 0);
        assert_eq!(h.provider.calls_for("mintB"), 1);

        let symbols = h.destination.column_values(&PROCESSED_ARB, "symbol").unwrap();
        assert_eq!(symbols, vec![FieldValue::from("AAA"), FieldValue::from("BBB")]);
        let outcomes = h.destination.column_values(&PROCESSED_ARB, "outcome").unwrap();
        assert_eq!(outcomes, vec![FieldValue::from("WIN"), FieldValue::from("LOSS")]);
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let h = harness(&[]).await;
        for id in 1..=5 {
            insert_arb(&h.source_path, id, "mintX", 10.0, 11.0, None);
        }
        let cursors = Arc::new(InMemoryCursorStore::new());
        let ctx = h.context_with_cursors(2, cursors.clone());

        let first = ArbProcess.run(&ctx).await.unwrap();
        assert_eq!(first.batches, 3);
        assert_eq!(first.written, 5);
        assert_eq!(first.enrichment_failed, 5);
        assert_eq!(
            cursors.get_cursor("arbtransaction").await.unwrap().last_processed_id,
            5
        );

        let second = ArbProcess.run(&ctx).await.unwrap();
        assert_eq!(second.read, 0);
        assert_eq!(second.written, 0);
        assert_eq!(second.cursor_before, 5);
        assert_eq!(second.cursor_after, 5);
        assert_eq!(h.destination.count_rows(&PROCESSED_ARB).unwrap(), 5);
    }

    #[tokio::test]
    async fn test_resumes_from_seeded_cursor() {
        let h = harness(&[]).await;
        for id in 1..=4 {
            insert_arb(&h.source_path, id, "mintY", 10.0, 9.0, Some(("YYY", "Token Y")));
        }
        let cursors = Arc::new(InMemoryCursorStore::new().with_cursor("arbtransaction", 2));
        let ctx = h.context_with_cursors(10, cursors);

        let report = ArbProcess.run(&ctx).await.unwrap();

        assert_eq!(report.cursor_before, 2);
        assert_eq!(report.read, 2);
        assert_eq!(report.written, 2);
        assert_eq!(report.cursor_after, 4);
        // The destination tracker was never touched
        assert_eq!(
            h.destination.get_cursor("arbtransaction").await.unwrap().last_processed_id,
            0
        );
    }
}
