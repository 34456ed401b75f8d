//! `clean_bts_coin_info`: normalized copy of the coin info snapshots

use crate::pipeline::cleaning::clean_timestamp;
use crate::pipeline::error::{PipelineError, RunFailure};
use crate::pipeline::records::{CleanCoinInfo, CLEAN_BTS_COIN_INFO};
use crate::pipeline::runner::{run_direct, DirectCategory, Process, RunContext, RunReport, RunSettings};
use crate::pipeline::types::{CoinInfoRow, TableSpec};
use async_trait::async_trait;

const NAME: &str = "clean_bts_coin_info";

pub struct CleanCoinInfoProcess;

#[async_trait]
impl DirectCategory for CleanCoinInfoProcess {
    type Row = CoinInfoRow;
    type Record = CleanCoinInfo;

    fn name(&self) -> &'static str {
        NAME
    }

    fn source_table<'a>(&self, settings: &'a RunSettings) -> &'a str {
        &settings.tables.coin_info
    }

    async fn fetch(
        &self,
        ctx: &RunContext,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<CoinInfoRow>, PipelineError> {
        ctx.source
            .fetch_coin_info(&ctx.settings.tables.coin_info, after_id, limit)
            .await
    }

    fn row_id(row: &CoinInfoRow) -> i64 {
        row.source_id
    }

    fn row_timestamp(row: &CoinInfoRow) -> Option<i64> {
        clean_timestamp(&row.date_captured)
    }

    fn transform(&self, row: &CoinInfoRow) -> CleanCoinInfo {
        CleanCoinInfo::from(row)
    }
}

#[async_trait]
impl Process for CleanCoinInfoProcess {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Copy bot coin info snapshots with numeric and text columns normalized"
    }

    fn destination_table(&self) -> &'static TableSpec {
        &CLEAN_BTS_COIN_INFO
    }

    async fn run(&self, ctx: &RunContext) -> Result<RunReport, RunFailure> {
        run_direct(self, ctx).await
    }
}
