//! Destination record types and their relation layouts

use super::cleaning::{clean_bool, clean_numeric, clean_text, clean_timestamp};
use super::pairing::TradeMatch;
use super::types::{
    profit_percentage, ArbOpportunityRow, ArbTransactionRow, CoinInfoRow, ColumnSpec,
    DestinationRecord, FieldValue, Outcome, TableSpec, TokenMetadata,
};

/// Enriched descriptive columns, kept out of the row hash
const METADATA_COLUMNS: &[&str] = &["symbol", "name"];

const fn col(name: &'static str, sql_type: &'static str) -> ColumnSpec {
    ColumnSpec { name, sql_type }
}

pub static PROCESSED_SNIPER: TableSpec = TableSpec {
    name: "processed_sniper",
    columns: &[
        col("token_address", "TEXT NOT NULL"),
        col("status", "TEXT NOT NULL"),
        col("buy_source_id", "INTEGER"),
        col("buy_amount", "REAL"),
        col("buy_cost", "REAL"),
        col("buy_timestamp", "INTEGER"),
        col("buy_wallet", "TEXT"),
        col("sell_source_id", "INTEGER"),
        col("sell_amount", "REAL"),
        col("sell_proceeds", "REAL"),
        col("sell_timestamp", "INTEGER"),
        col("sell_wallet", "TEXT"),
        col("profit", "REAL"),
        col("profit_pct", "REAL"),
        col("outcome", "TEXT"),
        col("partial_sell", "INTEGER NOT NULL"),
        col("review_flag", "TEXT"),
        col("coin_info_id", "INTEGER"),
        col("symbol", "TEXT"),
        col("name", "TEXT"),
    ],
};

pub static PROCESSED_ARB: TableSpec = TableSpec {
    name: "processed_arb",
    columns: &[
        col("source_id", "INTEGER NOT NULL"),
        col("token_address", "TEXT NOT NULL"),
        col("buy_exchange", "TEXT"),
        col("sell_exchange", "TEXT"),
        col("buy_amount", "REAL"),
        col("sell_amount", "REAL"),
        col("buy_price", "REAL"),
        col("sell_price", "REAL"),
        col("buy_timestamp", "INTEGER"),
        col("sell_timestamp", "INTEGER"),
        col("profit", "REAL"),
        col("profit_pct", "REAL"),
        col("outcome", "TEXT"),
        col("symbol", "TEXT"),
        col("name", "TEXT"),
    ],
};

pub static CLEAN_ARB_OPPORTUNITY: TableSpec = TableSpec {
    name: "clean_arb_opportunity",
    columns: &[
        col("source_id", "INTEGER NOT NULL"),
        col("token_address", "TEXT"),
        col("buy_exchange", "TEXT"),
        col("sell_exchange", "TEXT"),
        col("buy_price", "REAL"),
        col("sell_price", "REAL"),
        col("price_difference", "REAL"),
        col("profit_percentage", "REAL"),
        col("volume", "REAL"),
        col("liquidity", "REAL"),
        col("timestamp", "INTEGER"),
        col("status", "TEXT"),
    ],
};

pub static CLEAN_BTS_COIN_INFO: TableSpec = TableSpec {
    name: "clean_bts_coin_info",
    columns: &[
        col("source_id", "INTEGER NOT NULL"),
        col("token_address", "TEXT"),
        col("coin_price", "REAL"),
        col("dev_pubkey", "TEXT"),
        col("dev_capital", "REAL"),
        col("dev_holder_percentage", "REAL"),
        col("token_supply", "REAL"),
        col("total_holders_supply", "REAL"),
        col("is_bundle", "INTEGER"),
        col("liquidity_to_mcap_ratio", "REAL"),
        col("reserves_in_sol", "REAL"),
        col("date_captured", "INTEGER"),
    ],
};

/// A paired sniper round trip (closed or open)
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedTrade {
    pub token_address: String,
    pub status: String,
    pub buy_source_id: Option<i64>,
    pub buy_amount: Option<f64>,
    pub buy_cost: Option<f64>,
    pub buy_timestamp: Option<i64>,
    pub buy_wallet: Option<String>,
    pub sell_source_id: Option<i64>,
    pub sell_amount: Option<f64>,
    pub sell_proceeds: Option<f64>,
    pub sell_timestamp: Option<i64>,
    pub sell_wallet: Option<String>,
    pub profit: Option<f64>,
    pub profit_pct: Option<f64>,
    pub outcome: Option<String>,
    pub partial_sell: bool,
    pub review_flag: Option<String>,
    pub coin_info_id: Option<i64>,
    pub symbol: String,
    pub name: String,
}

impl ProcessedTrade {
    pub fn from_match(trade: &TradeMatch, metadata: &TokenMetadata) -> Self {
        let buy = trade.buy.as_ref();
        let sell = trade.sell.as_ref();

        Self {
            token_address: trade.token_address.clone(),
            status: trade.status.as_str().to_string(),
            buy_source_id: buy.map(|l| l.source_id),
            buy_amount: buy.map(|l| l.amount),
            buy_cost: buy.and_then(|l| l.value),
            buy_timestamp: buy.map(|l| l.timestamp),
            buy_wallet: buy.and_then(|l| l.venue.clone()),
            sell_source_id: sell.map(|l| l.source_id),
            sell_amount: sell.map(|l| l.amount),
            sell_proceeds: sell.and_then(|l| l.value),
            sell_timestamp: sell.map(|l| l.timestamp),
            sell_wallet: sell.and_then(|l| l.venue.clone()),
            profit: trade.profit,
            profit_pct: trade.profit_pct,
            outcome: trade.outcome.map(|o| o.as_str().to_string()),
            partial_sell: trade.partial_sell,
            review_flag: trade.review_flag.map(|f| f.as_str().to_string()),
            coin_info_id: buy.or(sell).and_then(|l| l.coin_info_id),
            symbol: metadata.symbol.clone(),
            name: metadata.name.clone(),
        }
    }
}

impl DestinationRecord for ProcessedTrade {
    fn table() -> &'static TableSpec {
        &PROCESSED_SNIPER
    }

    fn values(&self) -> Vec<FieldValue> {
        vec![
            self.token_address.clone().into(),
            self.status.clone().into(),
            self.buy_source_id.into(),
            self.buy_amount.into(),
            self.buy_cost.into(),
            self.buy_timestamp.into(),
            self.buy_wallet.clone().into(),
            self.sell_source_id.into(),
            self.sell_amount.into(),
            self.sell_proceeds.into(),
            self.sell_timestamp.into(),
            self.sell_wallet.clone().into(),
            self.profit.into(),
            self.profit_pct.into(),
            self.outcome.clone().into(),
            self.partial_sell.into(),
            self.review_flag.clone().into(),
            self.coin_info_id.into(),
            self.symbol.clone().into(),
            self.name.clone().into(),
        ]
    }

    fn hash_excluded() -> &'static [&'static str] {
        METADATA_COLUMNS
    }
}

/// A direct arbitrage round trip
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedArb {
    pub source_id: i64,
    pub token_address: String,
    pub buy_exchange: Option<String>,
    pub sell_exchange: Option<String>,
    pub buy_amount: f64,
    pub sell_amount: f64,
    pub buy_price: Option<f64>,
    pub sell_price: Option<f64>,
    pub buy_timestamp: Option<i64>,
    pub sell_timestamp: Option<i64>,
    pub profit: f64,
    pub profit_pct: Option<f64>,
    pub outcome: Outcome,
    pub symbol: String,
    pub name: String,
}

impl ProcessedArb {
    /// profit = sell amount - buy amount, percentage on the buy amount
    pub fn from_row(row: &ArbTransactionRow, metadata: &TokenMetadata) -> Self {
        let profit = row.sell_amount - row.buy_amount;

        Self {
            source_id: row.source_id,
            token_address: row.token_address.clone(),
            buy_exchange: row.buy_exchange.clone(),
            sell_exchange: row.sell_exchange.clone(),
            buy_amount: row.buy_amount,
            sell_amount: row.sell_amount,
            buy_price: row.buy_price,
            sell_price: row.sell_price,
            buy_timestamp: row.buy_timestamp,
            sell_timestamp: row.sell_timestamp,
            profit,
            profit_pct: profit_percentage(profit, row.buy_amount),
            outcome: Outcome::classify(profit),
            symbol: metadata.symbol.clone(),
            name: metadata.name.clone(),
        }
    }
}

impl DestinationRecord for ProcessedArb {
    fn table() -> &'static TableSpec {
        &PROCESSED_ARB
    }

    fn values(&self) -> Vec<FieldValue> {
        vec![
            self.source_id.into(),
            self.token_address.clone().into(),
            self.buy_exchange.clone().into(),
            self.sell_exchange.clone().into(),
            self.buy_amount.into(),
            self.sell_amount.into(),
            self.buy_price.into(),
            self.sell_price.into(),
            self.buy_timestamp.into(),
            self.sell_timestamp.into(),
            self.profit.into(),
            self.profit_pct.into(),
            self.outcome.as_str().into(),
            self.symbol.clone().into(),
            self.name.clone().into(),
        ]
    }

    fn hash_excluded() -> &'static [&'static str] {
        METADATA_COLUMNS
    }
}

/// Normalized copy of an arbitrage opportunity row
#[derive(Debug, Clone, PartialEq)]
pub struct CleanArbOpportunity {
    pub source_id: i64,
    pub token_address: Option<String>,
    pub buy_exchange: Option<String>,
    pub sell_exchange: Option<String>,
    pub buy_price: Option<f64>,
    pub sell_price: Option<f64>,
    pub price_difference: Option<f64>,
    pub profit_percentage: Option<f64>,
    pub volume: Option<f64>,
    pub liquidity: Option<f64>,
    pub timestamp: Option<i64>,
    pub status: Option<String>,
}

impl From<&ArbOpportunityRow> for CleanArbOpportunity {
    fn from(row: &ArbOpportunityRow) -> Self {
        Self {
            source_id: row.source_id,
            token_address: clean_text(&row.token_address),
            buy_exchange: clean_text(&row.buy_exchange),
            sell_exchange: clean_text(&row.sell_exchange),
            buy_price: clean_numeric(&row.buy_price),
            sell_price: clean_numeric(&row.sell_price),
            price_difference: clean_numeric(&row.price_difference),
            profit_percentage: clean_numeric(&row.profit_percentage),
            volume: clean_numeric(&row.volume),
            liquidity: clean_numeric(&row.liquidity),
            timestamp: clean_timestamp(&row.timestamp),
            status: clean_text(&row.status),
        }
    }
}

impl DestinationRecord for CleanArbOpportunity {
    fn table() -> &'static TableSpec {
        &CLEAN_ARB_OPPORTUNITY
    }

    fn values(&self) -> Vec<FieldValue> {
        vec![
            self.source_id.into(),
            self.token_address.clone().into(),
            self.buy_exchange.clone().into(),
            self.sell_exchange.clone().into(),
            self.buy_price.into(),
            self.sell_price.into(),
            self.price_difference.into(),
            self.profit_percentage.into(),
            self.volume.into(),
            self.liquidity.into(),
            self.timestamp.into(),
            self.status.clone().into(),
        ]
    }
}

/// Normalized copy of a coin info snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct CleanCoinInfo {
    pub source_id: i64,
    pub token_address: Option<String>,
    pub coin_price: Option<f64>,
    pub dev_pubkey: Option<String>,
    pub dev_capital: Option<f64>,
    pub dev_holder_percentage: Option<f64>,
    pub token_supply: Option<f64>,
    pub total_holders_supply: Option<f64>,
    pub is_bundle: Option<bool>,
    pub liquidity_to_mcap_ratio: Option<f64>,
    pub reserves_in_sol: Option<f64>,
    pub date_captured: Option<i64>,
}

impl From<&CoinInfoRow> for CleanCoinInfo {
    fn from(row: &CoinInfoRow) -> Self {
        Self {
            source_id: row.source_id,
            token_address: clean_text(&row.token_address),
            coin_price: clean_numeric(&row.coin_price),
            dev_pubkey: clean_text(&row.dev_pubkey),
            dev_capital: clean_numeric(&row.dev_capital),
            dev_holder_percentage: clean_numeric(&row.dev_holder_percentage),
            token_supply: clean_numeric(&row.token_supply),
            total_holders_supply: clean_numeric(&row.total_holders_supply),
            is_bundle: clean_bool(&row.is_bundle),
            liquidity_to_mcap_ratio: clean_numeric(&row.liquidity_to_mcap_ratio),
            reserves_in_sol: clean_numeric(&row.reserves_in_sol),
            date_captured: clean_timestamp(&row.date_captured),
        }
    }
}

impl DestinationRecord for CleanCoinInfo {
    fn table() -> &'static TableSpec {
        &CLEAN_BTS_COIN_INFO
    }

    fn values(&self) -> Vec<FieldValue> {
        vec![
            self.source_id.into(),
            self.token_address.clone().into(),
            self.coin_price.into(),
            self.dev_pubkey.clone().into(),
            self.dev_capital.into(),
            self.dev_holder_percentage.into(),
            self.token_supply.into(),
            self.total_holders_supply.into(),
            self.is_bundle.into(),
            self.liquidity_to_mcap_ratio.into(),
            self.reserves_in_sol.into(),
            self.date_captured.into(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::hasher::hash_record;
    use crate::pipeline::pairing::{pair_fills, MatchStatus};
    use crate::pipeline::types::{FillSide, SourceFill};

    fn arb_row(buy: f64, sell: f64) -> ArbTransactionRow {
        ArbTransactionRow {
            source_id: 11,
            token_address: "mintArb".to_string(),
            buy_exchange: Some("Raydium".to_string()),
            sell_exchange: Some("Orca".to_string()),
            buy_amount: buy,
            sell_amount: sell,
            buy_price: Some(0.5),
            sell_price: Some(0.55),
            buy_timestamp: Some(1_000),
            sell_timestamp: Some(1_005),
            symbol: None,
            name: None,
        }
    }

    #[test]
    fn test_values_match_table_layout() {
        let arb = ProcessedArb::from_row(&arb_row(100.0, 110.0), &TokenMetadata::unknown());
        assert_eq!(arb.values().len(), PROCESSED_ARB.columns.len());

        let fills = vec![SourceFill {
            source_id: 1,
            token_address: "m".to_string(),
            side: FillSide::Buy,
            amount: 1.0,
            price: Some(1.0),
            value: None,
            timestamp: 1,
            venue: None,
            coin_info_id: Some(3),
        }];
        let open = &pair_fills(&fills)[0];
        let trade = ProcessedTrade::from_match(open, &TokenMetadata::unknown());
        assert_eq!(trade.values().len(), PROCESSED_SNIPER.columns.len());
        assert_eq!(trade.status, MatchStatus::Open.as_str());
        assert_eq!(trade.coin_info_id, Some(3));

        let opportunity = CleanArbOpportunity {
            source_id: 1,
            token_address: None,
            buy_exchange: None,
            sell_exchange: None,
            buy_price: None,
            sell_price: None,
            price_difference: None,
            profit_percentage: None,
            volume: None,
            liquidity: None,
            timestamp: None,
            status: None,
        };
        assert_eq!(opportunity.values().len(), CLEAN_ARB_OPPORTUNITY.columns.len());
    }

    #[test]
    fn test_arb_profit_and_outcome() {
        let win = ProcessedArb::from_row(&arb_row(100.0, 110.0), &TokenMetadata::unknown());
        assert!((win.profit - 10.0).abs() < 1e-9);
        assert!((win.profit_pct.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(win.outcome, Outcome::Win);

        let flat = ProcessedArb::from_row(&arb_row(0.0, 0.0), &TokenMetadata::unknown());
        assert_eq!(flat.outcome, Outcome::Breakeven);
        assert_eq!(flat.profit_pct, None);
    }

    #[test]
    fn test_metadata_does_not_change_hash() {
        let row = arb_row(100.0, 90.0);
        let unknown = hash_record(&ProcessedArb::from_row(&row, &TokenMetadata::unknown()));
        let known = hash_record(&ProcessedArb::from_row(&row, &TokenMetadata::new("ARB", "Arb Token")));

        assert_eq!(unknown.row_hash, known.row_hash);
        assert_ne!(unknown.values, known.values);
    }

    #[test]
    fn test_coin_info_cleaning() {
        let row = CoinInfoRow {
            source_id: 4,
            token_address: FieldValue::from(" mintC "),
            coin_price: FieldValue::from(""),
            dev_pubkey: FieldValue::from("dev"),
            dev_capital: FieldValue::from("12.5"),
            dev_holder_percentage: FieldValue::Null,
            token_supply: FieldValue::from(1_000_000_i64),
            total_holders_supply: FieldValue::from("abc"),
            is_bundle: FieldValue::from("true"),
            liquidity_to_mcap_ratio: FieldValue::from(0.2),
            reserves_in_sol: FieldValue::from("  "),
            date_captured: FieldValue::from("2024-01-01 00:00:00"),
        };

        let clean = CleanCoinInfo::from(&row);
        assert_eq!(clean.token_address.as_deref(), Some("mintC"));
        assert_eq!(clean.coin_price, None);
        assert_eq!(clean.dev_capital, Some(12.5));
        assert_eq!(clean.total_holders_supply, None);
        assert_eq!(clean.is_bundle, Some(true));
        assert_eq!(clean.reserves_in_sol, None);
        assert_eq!(clean.date_captured, Some(1_704_067_200));
        assert_eq!(clean.values().len(), CLEAN_BTS_COIN_INFO.columns.len());
    }
}
