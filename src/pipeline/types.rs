//! Core data structures shared by readers, transforms and writers

use serde::{Deserialize, Serialize};

/// Direction of a single fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FillSide {
    Buy,
    Sell,
    /// Any other `type` (transfers, airdrops); never paired
    Other,
}

impl FillSide {
    /// Parse a source `type` column.
    ///
    /// `partial_sell` rows are sells: the pairing engine decides how much of a
    /// position they close.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buy" => Some(FillSide::Buy),
            "sell" | "partial_sell" => Some(FillSide::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FillSide::Buy => "BUY",
            FillSide::Sell => "SELL",
            FillSide::Other => "OTHER",
        }
    }
}

/// One raw trade event from the fills source table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFill {
    pub source_id: i64,
    pub token_address: String,
    pub side: FillSide,
    pub amount: f64,
    pub price: Option<f64>,
    /// Total value of the fill (amount in dollars)
    pub value: Option<f64>,
    pub timestamp: i64,
    /// Wallet or exchange the fill originated from
    pub venue: Option<String>,
    /// Coin info snapshot the bot recorded with the fill
    pub coin_info_id: Option<i64>,
}

impl SourceFill {
    /// Total value, falling back to `amount * price` when the source has no value
    pub fn total_value(&self) -> Option<f64> {
        self.value.or_else(|| self.price.map(|p| p * self.amount))
    }
}

/// One row of the arbitrage transaction source table
#[derive(Debug, Clone, PartialEq)]
pub struct ArbTransactionRow {
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
    pub symbol: Option<String>,
    pub name: Option<String>,
}

/// One row of the arbitrage opportunity source table, values as stored
#[derive(Debug, Clone, PartialEq)]
pub struct ArbOpportunityRow {
    pub source_id: i64,
    pub token_address: FieldValue,
    pub buy_exchange: FieldValue,
    pub sell_exchange: FieldValue,
    pub buy_price: FieldValue,
    pub sell_price: FieldValue,
    pub price_difference: FieldValue,
    pub profit_percentage: FieldValue,
    pub volume: FieldValue,
    pub liquidity: FieldValue,
    pub timestamp: FieldValue,
    pub status: FieldValue,
}

/// One row of the coin info source table, values as stored
#[derive(Debug, Clone, PartialEq)]
pub struct CoinInfoRow {
    pub source_id: i64,
    pub token_address: FieldValue,
    pub coin_price: FieldValue,
    pub dev_pubkey: FieldValue,
    pub dev_capital: FieldValue,
    pub dev_holder_percentage: FieldValue,
    pub token_supply: FieldValue,
    pub total_holders_supply: FieldValue,
    pub is_bundle: FieldValue,
    pub liquidity_to_mcap_ratio: FieldValue,
    pub reserves_in_sol: FieldValue,
    pub date_captured: FieldValue,
}

/// A single column value, loosely typed like SQLite storage classes
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Real(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// Column definition of a destination relation
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub sql_type: &'static str,
}

/// Destination relation layout (excluding `id`, `row_hash` and `created_at`,
/// which every processed table carries)
#[derive(Debug)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [ColumnSpec],
}

impl TableSpec {
    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }
}

/// A hashed record ready for insertion, values in `TableSpec::columns` order
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRow {
    pub values: Vec<FieldValue>,
    pub row_hash: String,
}

/// A typed record that can be written to a destination relation
pub trait DestinationRecord {
    /// Relation this record belongs to
    fn table() -> &'static TableSpec
    where
        Self: Sized;

    /// Column values in `table().columns` order
    fn values(&self) -> Vec<FieldValue>;

    /// Descriptive columns left out of the row hash
    fn hash_excluded() -> &'static [&'static str]
    where
        Self: Sized,
    {
        &[]
    }
}

/// Symbol used for symbol and name when a lookup fails
pub const UNKNOWN_SENTINEL: &str = "UNKNOWN";

/// Token metadata from the external metadata service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub symbol: String,
    pub name: String,
}

impl TokenMetadata {
    pub fn new(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
        }
    }

    /// Explicit sentinel for tokens whose lookup failed
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_SENTINEL, UNKNOWN_SENTINEL)
    }

    pub fn is_unknown(&self) -> bool {
        self.symbol == UNKNOWN_SENTINEL && self.name == UNKNOWN_SENTINEL
    }
}

/// Outcome classification of a realized trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Win,
    Loss,
    Breakeven,
}

impl Outcome {
    /// Exact comparison: only a profit of exactly zero is breakeven
    pub fn classify(profit: f64) -> Self {
        if profit > 0.0 {
            Outcome::Win
        } else if profit < 0.0 {
            Outcome::Loss
        } else {
            Outcome::Breakeven
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Win => "WIN",
            Outcome::Loss => "LOSS",
            Outcome::Breakeven => "BREAKEVEN",
        }
    }
}

/// Percentage return on `basis`, undefined (None) when the basis is zero
pub fn profit_percentage(profit: f64, basis: f64) -> Option<f64> {
    if basis == 0.0 {
        None
    } else {
        Some(profit / basis * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_side_parse() {
        assert_eq!(FillSide::parse("buy"), Some(FillSide::Buy));
        assert_eq!(FillSide::parse(" SELL "), Some(FillSide::Sell));
        assert_eq!(FillSide::parse("partial_sell"), Some(FillSide::Sell));
        assert_eq!(FillSide::parse("transfer"), None);
    }

    #[test]
    fn test_total_value_falls_back_to_price() {
        let mut fill = SourceFill {
            source_id: 1,
            token_address: "mint".to_string(),
            side: FillSide::Buy,
            amount: 4.0,
            price: Some(2.5),
            value: None,
            timestamp: 1,
            venue: None,
            coin_info_id: None,
        };
        assert_eq!(fill.total_value(), Some(10.0));

        fill.value = Some(12.0);
        assert_eq!(fill.total_value(), Some(12.0));
    }

    #[test]
    fn test_outcome_classification() {
        assert_eq!(Outcome::classify(0.5), Outcome::Win);
        assert_eq!(Outcome::classify(-0.01), Outcome::Loss);
        assert_eq!(Outcome::classify(0.0), Outcome::Breakeven);
    }

    #[test]
    fn test_profit_percentage_zero_basis() {
        assert_eq!(profit_percentage(5.0, 0.0), None);
        assert_eq!(profit_percentage(5.0, 10.0), Some(50.0));
    }

    #[test]
    fn test_option_into_field_value() {
        assert_eq!(FieldValue::from(None::<f64>), FieldValue::Null);
        assert_eq!(FieldValue::from(Some(3_i64)), FieldValue::Integer(3));
    }
}
