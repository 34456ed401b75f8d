//! Read-only access to the raw source tables
//!
//! Every source table is append-only and keyed by an increasing integer `id`.
//! Reads are always `WHERE id > cursor ORDER BY id ASC LIMIT batch`, so a run
//! never sees a row below its cursor. Column names are matched
//! case-insensitively (`tokenAddress` and `tokenaddress` are the same column).

use super::cleaning::{clean_numeric, clean_text, clean_timestamp};
use super::db::{field_from_sql, quote_identifier};
use super::error::PipelineError;
use super::types::{ArbOpportunityRow, ArbTransactionRow, CoinInfoRow, FieldValue, FillSide, SourceFill};
use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

static NULL_FIELD: FieldValue = FieldValue::Null;

/// Data-access interface for the source schema
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Trade fills (buy / sell / partial_sell)
    async fn fetch_fills(
        &self,
        table: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<SourceFill>, PipelineError>;

    async fn fetch_arb_transactions(
        &self,
        table: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<ArbTransactionRow>, PipelineError>;

    async fn fetch_arb_opportunities(
        &self,
        table: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<ArbOpportunityRow>, PipelineError>;

    async fn fetch_coin_info(
        &self,
        table: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<CoinInfoRow>, PipelineError>;
}

/// One source row with lowercased column names
#[derive(Debug, Clone)]
pub struct SourceRow {
    pub id: i64,
    fields: HashMap<String, FieldValue>,
}

impl SourceRow {
    pub fn new(id: i64, fields: HashMap<String, FieldValue>) -> Self {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self { id, fields }
    }

    /// Column value, NULL when the column is absent
    pub fn get(&self, column: &str) -> &FieldValue {
        self.fields.get(column).unwrap_or(&NULL_FIELD)
    }

    fn text(&self, column: &str) -> Option<String> {
        clean_text(self.get(column))
    }

    fn number(&self, column: &str) -> Option<f64> {
        clean_numeric(self.get(column))
    }

    fn timestamp(&self, column: &str) -> Option<i64> {
        clean_timestamp(self.get(column))
    }
}

/// Map a raw fill row
///
/// A missing timestamp makes the whole batch malformed. Unrecognized sides
/// map to `FillSide::Other` and a missing token or amount is left for the
/// pairing engine to ignore.
pub fn fill_from_row(row: &SourceRow) -> Result<SourceFill, PipelineError> {
    let raw_side = row.text("type").unwrap_or_default();
    let side = FillSide::parse(&raw_side).unwrap_or_else(|| {
        log::debug!("Row {}: unrecognized side '{}'", row.id, raw_side);
        FillSide::Other
    });

    let timestamp = row
        .timestamp("timestamp")
        .ok_or_else(|| PipelineError::SourceRead(format!("row {}: missing timestamp", row.id)))?;

    Ok(SourceFill {
        source_id: row.id,
        token_address: row.text("tokenaddress").unwrap_or_default(),
        side,
        amount: row.number("amount").unwrap_or(0.0),
        price: row.number("price"),
        value: row.number("amountindollars"),
        timestamp,
        venue: row.text("walletaddress"),
        coin_info_id: row.number("btscoininfoid").map(|v| v as i64),
    })
}

pub fn arb_transaction_from_row(row: &SourceRow) -> ArbTransactionRow {
    ArbTransactionRow {
        source_id: row.id,
        token_address: row.text("tokenaddress").unwrap_or_default(),
        buy_exchange: row.text("buyexchange"),
        sell_exchange: row.text("sellexchange"),
        buy_amount: row.number("buyamount").unwrap_or(0.0),
        sell_amount: row.number("sellamount").unwrap_or(0.0),
        buy_price: row.number("buyprice"),
        sell_price: row.number("sellprice"),
        buy_timestamp: row.timestamp("buytimestamp"),
        sell_timestamp: row.timestamp("selltimestamp"),
        symbol: row.text("symbol"),
        name: row.text("name"),
    }
}

pub fn arb_opportunity_from_row(row: &SourceRow) -> ArbOpportunityRow {
    ArbOpportunityRow {
        source_id: row.id,
        token_address: row.get("tokenaddress").clone(),
        buy_exchange: row.get("buyexchange").clone(),
        sell_exchange: row.get("sellexchange").clone(),
        buy_price: row.get("buyprice").clone(),
        sell_price: row.get("sellprice").clone(),
        price_difference: row.get("pricedifference").clone(),
        profit_percentage: row.get("profitpercentage").clone(),
        volume: row.get("volume").clone(),
        liquidity: row.get("liquidity").clone(),
        timestamp: row.get("timestamp").clone(),
        status: row.get("status").clone(),
    }
}

pub fn coin_info_from_row(row: &SourceRow) -> CoinInfoRow {
    CoinInfoRow {
        source_id: row.id,
        token_address: row.get("tokenaddress").clone(),
        coin_price: row.get("coinprice").clone(),
        dev_pubkey: row.get("devpubkey").clone(),
        dev_capital: row.get("devcapital").clone(),
        dev_holder_percentage: row.get("devholderpercentage").clone(),
        token_supply: row.get("tokensupply").clone(),
        total_holders_supply: row.get("totalholderssupply").clone(),
        is_bundle: row.get("isbundle").clone(),
        liquidity_to_mcap_ratio: row.get("liquiditytomcapratio").clone(),
        reserves_in_sol: row.get("reservesinsol").clone(),
        date_captured: row.get("datecaptured").clone(),
    }
}

/// SQLite source reader (read-only connection)
pub struct SqliteSource {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSource {
    /// Open an existing source database read-only
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = db_path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| {
            PipelineError::SourceRead(format!("Failed to open {}: {}", path.display(), e))
        })?;

        log::info!("📥 Source database opened read-only: {}", path.display());
        Self::from_connection(conn)
    }

    /// Wrap an existing connection, switching it to query-only mode
    pub fn from_connection(conn: Connection) -> Result<Self, PipelineError> {
        conn.execute_batch("PRAGMA query_only = ON")
            .map_err(|e| PipelineError::SourceRead(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Raw rows with `id > after_id`, ascending
    pub fn fetch_rows(
        &self,
        table: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<SourceRow>, PipelineError> {
        let quoted = quote_identifier(table).map_err(PipelineError::SourceRead)?;
        let conn = self
            .conn
            .lock()
            .map_err(|e| PipelineError::SourceRead(format!("Source connection poisoned: {}", e)))?;

        let sql = format!(
            "SELECT * FROM {} WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
            quoted
        );
        let read_err = |e: rusqlite::Error| PipelineError::SourceRead(format!("{}: {}", table, e));

        let mut stmt = conn.prepare(&sql).map_err(read_err)?;
        let columns: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|c| c.to_ascii_lowercase())
            .collect();
        let id_index = columns
            .iter()
            .position(|c| c == "id")
            .ok_or_else(|| PipelineError::SourceRead(format!("{} has no id column", table)))?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = stmt.query(rusqlite::params![after_id, limit]).map_err(read_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(read_err)? {
            let mut fields = HashMap::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                let value = row.get_ref(i).map_err(read_err)?;
                fields.insert(name.clone(), field_from_sql(value));
            }

            let id = match fields.get(&columns[id_index]) {
                Some(FieldValue::Integer(id)) => *id,
                other => {
                    return Err(PipelineError::SourceRead(format!(
                        "{}: non-integer id {:?}",
                        table, other
                    )))
                }
            };
            out.push(SourceRow::new(id, fields));
        }

        log::debug!("📥 Read {} rows from {} after id={}", out.len(), table, after_id);
        Ok(out)
    }
}

#[async_trait]
impl SourceReader for SqliteSource {
    async fn fetch_fills(
        &self,
        table: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<SourceFill>, PipelineError> {
        self.fetch_rows(table, after_id, limit)?
            .iter()
            .map(fill_from_row)
            .collect()
    }

    async fn fetch_arb_transactions(
        &self,
        table: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<ArbTransactionRow>, PipelineError> {
        Ok(self
            .fetch_rows(table, after_id, limit)?
            .iter()
            .map(arb_transaction_from_row)
            .collect())
    }

    async fn fetch_arb_opportunities(
        &self,
        table: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<ArbOpportunityRow>, PipelineError> {
        Ok(self
            .fetch_rows(table, after_id, limit)?
            .iter()
            .map(arb_opportunity_from_row)
            .collect())
    }

    async fn fetch_coin_info(
        &self,
        table: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<CoinInfoRow>, PipelineError> {
        Ok(self
            .fetch_rows(table, after_id, limit)?
            .iter()
            .map(coin_info_from_row)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;
    use tempfile::TempDir;

    fn create_test_source() -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("source.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE btstransaction (
                id INTEGER PRIMARY KEY,
                tokenAddress TEXT,
                type TEXT,
                amount TEXT,
                price REAL,
                amountInDollars REAL,
                walletAddress TEXT,
                timestamp TEXT,
                btsCoinInfoId INTEGER
            );",
        )
        .unwrap();

        let rows: &[(i64, &str, &str, &str, f64, i64)] = &[
            (1, "mintA", "buy", "10", 1.0, 100),
            (2, "mintA", "partial_sell", "4", 2.0, 200),
            (3, "mintA", "SELL", "6", 2.0, 300),
        ];
        for (id, token, side, amount, price, ts) in rows {
            conn.execute(
                "INSERT INTO btstransaction (id, tokenAddress, type, amount, price, walletAddress, timestamp, btsCoinInfoId)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'wallet', ?6, 9)",
                params![id, token, side, amount, price, ts.to_string()],
            )
            .unwrap();
        }

        (dir, path)
    }

    #[tokio::test]
    async fn test_fetch_fills_after_cursor() {
        let (_dir, path) = create_test_source();
        let source = SqliteSource::open(&path).unwrap();

        let fills = source.fetch_fills("btstransaction", 1, 10).await.unwrap();

        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].source_id, 2);
        assert_eq!(fills[0].side, FillSide::Sell);
        assert_eq!(fills[0].amount, 4.0);
        assert_eq!(fills[0].timestamp, 200);
        assert_eq!(fills[0].value, None);
        assert_eq!(fills[0].coin_info_id, Some(9));
        assert_eq!(fills[1].venue.as_deref(), Some("wallet"));
    }

    #[tokio::test]
    async fn test_limit_bounds_batch() {
        let (_dir, path) = create_test_source();
        let source = SqliteSource::open(&path).unwrap();

        let fills = source.fetch_fills("btstransaction", 0, 2).await.unwrap();
        assert_eq!(fills.iter().map(|f| f.source_id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_source_is_read_only() {
        let (_dir, path) = create_test_source();
        let source = SqliteSource::open(&path).unwrap();

        let conn = source.conn.lock().unwrap();
        let result = conn.execute("DELETE FROM btstransaction", []);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unknown_side_is_kept_as_other() {
        let (_dir, path) = create_test_source();
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(
                "INSERT INTO btstransaction (id, tokenAddress, type, amount, timestamp) VALUES (4, 'm', 'transfer', '1', '400')",
                [],
            )
            .unwrap();
        }
        let source = SqliteSource::open(&path).unwrap();

        let fills = source.fetch_fills("btstransaction", 3, 10).await.unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].side, FillSide::Other);
        assert_eq!(fills[0].source_id, 4);
    }

    #[tokio::test]
    async fn test_missing_timestamp_is_malformed() {
        let (_dir, path) = create_test_source();
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(
                "INSERT INTO btstransaction (id, tokenAddress, type, amount) VALUES (4, 'm', 'buy', '1')",
                [],
            )
            .unwrap();
        }
        let source = SqliteSource::open(&path).unwrap();

        let result = source.fetch_fills("btstransaction", 3, 10).await;
        assert!(matches!(result, Err(PipelineError::SourceRead(_))));
    }

    #[tokio::test]
    async fn test_rejects_non_identifier_table() {
        let (_dir, path) = create_test_source();
        let source = SqliteSource::open(&path).unwrap();

        let result = source.fetch_fills("btstransaction; DROP TABLE x", 0, 10).await;
        assert!(matches!(result, Err(PipelineError::SourceRead(_))));
    }

    #[test]
    fn test_missing_columns_read_as_null() {
        let mut fields = HashMap::new();
        fields.insert("tokenAddress".to_string(), FieldValue::from("mintZ"));
        let row = SourceRow::new(5, fields);

        let opportunity = arb_opportunity_from_row(&row);
        assert_eq!(opportunity.token_address, FieldValue::from("mintZ"));
        assert_eq!(opportunity.volume, FieldValue::Null);
    }
}
