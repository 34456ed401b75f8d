//! `clean_arb_opportunity`: normalized copy of detected arbitrage opportunities

use crate::pipeline::cleaning::clean_timestamp;
use crate::pipeline::error::{PipelineError, RunFailure};
use crate::pipeline::records::{CleanArbOpportunity, CLEAN_ARB_OPPORTUNITY};
use crate::pipeline::runner::{run_direct, DirectCategory, Process, RunContext, RunReport, RunSettings};
use crate::pipeline::types::{ArbOpportunityRow, TableSpec};
use async_trait::async_trait;

const NAME: &str = "clean_arb_opportunity";

pub struct CleanArbOpportunityProcess;

#[async_trait]
impl DirectCategory for CleanArbOpportunityProcess {
    type Row = ArbOpportunityRow;
    type Record = CleanArbOpportunity;

    fn name(&self) -> &'static str {
        NAME
    }

    fn source_table<'a>(&self, settings: &'a RunSettings) -> &'a str {
        &settings.tables.arb_opportunities
    }

    async fn fetch(
        &self,
        ctx: &RunContext,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<ArbOpportunityRow>, PipelineError> {
        ctx.source
            .fetch_arb_opportunities(&ctx.settings.tables.arb_opportunities, after_id, limit)
            .await
    }

    fn row_id(row: &ArbOpportunityRow) -> i64 {
        row.source_id
    }

    fn row_timestamp(row: &ArbOpportunityRow) -> Option<i64> {
        clean_timestamp(&row.timestamp)
    }

    fn transform(&self, row: &ArbOpportunityRow) -> CleanArbOpportunity {
        CleanArbOpportunity::from(row)
    }
}

#[async_trait]
impl Process for CleanArbOpportunityProcess {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Copy arbitrage opportunities with numeric and text columns normalized"
    }

    fn destination_table(&self) -> &'static TableSpec {
        &CLEAN_ARB_OPPORTUNITY
    }

    async fn run(&self, ctx: &RunContext) -> Result<RunReport, RunFailure> {
        run_direct(self, ctx).await
    }
}
