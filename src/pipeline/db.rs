//! Destination schema: processed relations, progress tracker and run locks
//!
//! The destination is a SQLite database attached under the configured schema
//! name, so every relation is addressed as `"<schema>"."<table>"`. Tables
//! written:
//! - one relation per category, unique index on `row_hash`
//! - `pipeline_tracker` - one cursor row per source table
//! - `pipeline_locks` - single-instance run leases

use super::error::PipelineError;
use super::tracker::{Cursor, CursorStore};
use super::types::{FieldValue, RecordRow, TableSpec};
use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, OptionalExtension, ToSql};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// true for `[A-Za-z_][A-Za-z0-9_]*`, at most 64 characters
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 64 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Double-quoted identifier, rejecting anything that is not a plain identifier
pub fn quote_identifier(name: &str) -> Result<String, String> {
    if is_plain_identifier(name) {
        Ok(format!("\"{}\"", name))
    } else {
        Err(format!("invalid identifier '{}'", name))
    }
}

/// Convert a SQLite value to a `FieldValue` (blobs become lossy text)
pub fn field_from_sql(value: ValueRef<'_>) -> FieldValue {
    match value {
        ValueRef::Null => FieldValue::Null,
        ValueRef::Integer(i) => FieldValue::Integer(i),
        ValueRef::Real(f) => FieldValue::Real(f),
        ValueRef::Text(t) => FieldValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => FieldValue::Text(String::from_utf8_lossy(b).into_owned()),
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Null => ToSqlOutput::Owned(Value::Null),
            FieldValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            FieldValue::Real(f) if f.is_finite() => ToSqlOutput::Owned(Value::Real(*f)),
            FieldValue::Real(_) => ToSqlOutput::Owned(Value::Null),
            FieldValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            FieldValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
        })
    }
}

/// Result of one conflict-skipping batch insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertSummary {
    pub inserted: usize,
    pub skipped_duplicate: usize,
}

/// Data-access interface for the destination schema
#[async_trait]
pub trait Destination: Send + Sync {
    /// Create the tracker and lock relations
    async fn setup(&self) -> Result<(), PipelineError>;

    /// Create a processed relation and its row-hash index if absent
    async fn ensure_table(&self, table: &'static TableSpec) -> Result<(), PipelineError>;

    /// Insert rows in one transaction, skipping rows whose hash already exists
    async fn insert_if_absent(
        &self,
        table: &'static TableSpec,
        rows: &[RecordRow],
    ) -> Result<InsertSummary, PipelineError>;

    /// Take the run lease of a process; false when a live lease exists
    async fn try_acquire_run_lock(&self, process: &str, ttl_secs: i64) -> Result<bool, PipelineError>;

    async fn release_run_lock(&self, process: &str) -> Result<(), PipelineError>;
}

/// SQLite destination, also the persistent cursor store
pub struct SqliteDestination {
    conn: Arc<Mutex<Connection>>,
    schema: String,
}

fn write_err(e: rusqlite::Error) -> PipelineError {
    PipelineError::Write(e.to_string())
}

fn tracker_err(e: rusqlite::Error) -> PipelineError {
    PipelineError::Tracker(e.to_string())
}

impl SqliteDestination {
    /// Open (or create) the destination database and attach it as `schema`
    pub fn open(db_path: impl AsRef<Path>, schema: &str) -> Result<Self, PipelineError> {
        let path = db_path.as_ref();
        let quoted = quote_identifier(schema).map_err(PipelineError::Write)?;

        if path != Path::new(":memory:") {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PipelineError::Write(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open_in_memory().map_err(write_err)?;
        let path_str = path.to_string_lossy().into_owned();
        conn.execute(&format!("ATTACH DATABASE ?1 AS {}", quoted), [&path_str])
            .map_err(write_err)?;
        conn.execute_batch(&format!("PRAGMA {}.journal_mode = WAL;", quoted))
            .map_err(write_err)?;

        log::info!("✅ Destination database attached as {}: {}", schema, path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            schema: schema.to_string(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, String> {
        self.conn
            .lock()
            .map_err(|e| format!("Destination connection poisoned: {}", e))
    }

    /// `"schema"."table"`
    fn qualified(&self, table: &str) -> Result<String, String> {
        Ok(format!(
            "{}.{}",
            quote_identifier(&self.schema)?,
            quote_identifier(table)?
        ))
    }

    /// Number of rows in a processed relation
    pub fn count_rows(&self, table: &TableSpec) -> Result<i64, PipelineError> {
        let qualified = self.qualified(table.name).map_err(PipelineError::Write)?;
        let conn = self.lock().map_err(PipelineError::Write)?;
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", qualified), [], |row| {
            row.get(0)
        })
        .map_err(write_err)
    }

    /// All values of one column, in insertion order
    pub fn column_values(&self, table: &TableSpec, column: &str) -> Result<Vec<FieldValue>, PipelineError> {
        let qualified = self.qualified(table.name).map_err(PipelineError::Write)?;
        let column = quote_identifier(column).map_err(PipelineError::Write)?;
        let conn = self.lock().map_err(PipelineError::Write)?;

        let mut stmt = conn
            .prepare(&format!("SELECT {} FROM {} ORDER BY id ASC", column, qualified))
            .map_err(write_err)?;
        let values = stmt
            .query_map([], |row| Ok(field_from_sql(row.get_ref(0)?)))
            .map_err(write_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(write_err)?;

        Ok(values)
    }
}

#[async_trait]
impl Destination for SqliteDestination {
    async fn setup(&self) -> Result<(), PipelineError> {
        let tracker = self.qualified("pipeline_tracker").map_err(PipelineError::Write)?;
        let locks = self.qualified("pipeline_locks").map_err(PipelineError::Write)?;
        let conn = self.lock().map_err(PipelineError::Write)?;

        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                table_name TEXT PRIMARY KEY,
                last_processed_id INTEGER NOT NULL DEFAULT 0,
                last_processed_ts INTEGER,
                updated_at INTEGER
            );
            CREATE TABLE IF NOT EXISTS {} (
                process_name TEXT PRIMARY KEY,
                acquired_at INTEGER NOT NULL
            );",
            tracker, locks
        ))
        .map_err(write_err)?;

        log::debug!("🔧 Tracker and lock relations ready in {}", self.schema);
        Ok(())
    }

    async fn ensure_table(&self, table: &'static TableSpec) -> Result<(), PipelineError> {
        let qualified = self.qualified(table.name).map_err(PipelineError::Write)?;
        let schema = quote_identifier(&self.schema).map_err(PipelineError::Write)?;
        let index = quote_identifier(&format!("idx_{}_row_hash", table.name))
            .map_err(PipelineError::Write)?;

        let mut columns = Vec::with_capacity(table.columns.len() + 3);
        columns.push("id INTEGER PRIMARY KEY AUTOINCREMENT".to_string());
        for column in table.columns {
            let name = quote_identifier(column.name).map_err(PipelineError::Write)?;
            columns.push(format!("{} {}", name, column.sql_type));
        }
        columns.push("row_hash TEXT NOT NULL".to_string());
        columns.push("created_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))".to_string());

        let conn = self.lock().map_err(PipelineError::Write)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({});
             CREATE UNIQUE INDEX IF NOT EXISTS {}.{} ON \"{}\"(row_hash);",
            qualified,
            columns.join(", "),
            schema,
            index,
            table.name
        ))
        .map_err(write_err)?;

        Ok(())
    }

    async fn insert_if_absent(
        &self,
        table: &'static TableSpec,
        rows: &[RecordRow],
    ) -> Result<InsertSummary, PipelineError> {
        if rows.is_empty() {
            return Ok(InsertSummary::default());
        }

        let qualified = self.qualified(table.name).map_err(PipelineError::Write)?;
        let names: Vec<String> = table
            .column_names()
            .chain(std::iter::once("row_hash"))
            .map(|c| format!("\"{}\"", c))
            .collect();
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(row_hash) DO NOTHING",
            qualified,
            names.join(", "),
            placeholders.join(", ")
        );

        let mut conn = self.lock().map_err(PipelineError::Write)?;
        let tx = conn.transaction().map_err(write_err)?;
        let mut summary = InsertSummary::default();

        {
            let mut stmt = tx.prepare(&sql).map_err(write_err)?;
            for row in rows {
                if row.values.len() != table.columns.len() {
                    return Err(PipelineError::Write(format!(
                        "{}: expected {} values, got {}",
                        table.name,
                        table.columns.len(),
                        row.values.len()
                    )));
                }

                let mut params: Vec<&dyn ToSql> =
                    row.values.iter().map(|v| v as &dyn ToSql).collect();
                params.push(&row.row_hash);

                let changed = stmt.execute(params.as_slice()).map_err(write_err)?;
                if changed == 0 {
                    summary.skipped_duplicate += 1;
                } else {
                    summary.inserted += changed;
                }
            }
        }

        tx.commit().map_err(write_err)?;

        log::debug!(
            "✅ {}: {} inserted, {} duplicates skipped",
            table.name,
            summary.inserted,
            summary.skipped_duplicate
        );
        Ok(summary)
    }

    async fn try_acquire_run_lock(&self, process: &str, ttl_secs: i64) -> Result<bool, PipelineError> {
        let locks = self.qualified("pipeline_locks").map_err(PipelineError::Write)?;
        let now = chrono::Utc::now().timestamp();
        let conn = self.lock().map_err(PipelineError::Write)?;

        let changed = conn
            .execute(
                &format!(
                    "INSERT INTO {} (process_name, acquired_at) VALUES (?1, ?2)
                     ON CONFLICT(process_name) DO UPDATE SET acquired_at = excluded.acquired_at
                     WHERE pipeline_locks.acquired_at <= ?3",
                    locks
                ),
                rusqlite::params![process, now, now - ttl_secs],
            )
            .map_err(write_err)?;

        Ok(changed == 1)
    }

    async fn release_run_lock(&self, process: &str) -> Result<(), PipelineError> {
        let locks = self.qualified("pipeline_locks").map_err(PipelineError::Write)?;
        let conn = self.lock().map_err(PipelineError::Write)?;

        conn.execute(
            &format!("DELETE FROM {} WHERE process_name = ?1", locks),
            [process],
        )
        .map_err(write_err)?;

        Ok(())
    }
}

#[async_trait]
impl CursorStore for SqliteDestination {
    async fn get_cursor(&self, table: &str) -> Result<Cursor, PipelineError> {
        let tracker = self.qualified("pipeline_tracker").map_err(PipelineError::Tracker)?;
        let conn = self.lock().map_err(PipelineError::Tracker)?;

        let cursor = conn
            .query_row(
                &format!(
                    "SELECT table_name, last_processed_id, last_processed_ts, updated_at
                     FROM {} WHERE table_name = ?1",
                    tracker
                ),
                [table],
                |row| {
                    Ok(Cursor {
                        table_name: row.get(0)?,
                        last_processed_id: row.get(1)?,
                        last_processed_ts: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(tracker_err)?;

        Ok(cursor.unwrap_or_else(|| Cursor::initial(table)))
    }

    async fn advance(
        &self,
        table: &str,
        new_last_id: i64,
        last_ts: Option<i64>,
    ) -> Result<Cursor, PipelineError> {
        let tracker = self.qualified("pipeline_tracker").map_err(PipelineError::Tracker)?;
        let now = chrono::Utc::now().timestamp();

        {
            let conn = self.lock().map_err(PipelineError::Tracker)?;
            conn.execute(
                &format!(
                    "INSERT INTO {} (table_name, last_processed_id, last_processed_ts, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(table_name) DO UPDATE SET
                        last_processed_ts = CASE
                            WHEN excluded.last_processed_id > last_processed_id
                            THEN excluded.last_processed_ts
                            ELSE last_processed_ts
                        END,
                        last_processed_id = MAX(last_processed_id, excluded.last_processed_id),
                        updated_at = excluded.updated_at",
                    tracker
                ),
                rusqlite::params![table, new_last_id.max(0), last_ts, now],
            )
            .map_err(tracker_err)?;
        }

        self.get_cursor(table).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::ColumnSpec;
    use tempfile::TempDir;

    static TEST_TABLE: TableSpec = TableSpec {
        name: "processed_test",
        columns: &[
            ColumnSpec { name: "token_address", sql_type: "TEXT NOT NULL" },
            ColumnSpec { name: "profit", sql_type: "REAL" },
            ColumnSpec { name: "flag", sql_type: "INTEGER" },
        ],
    };

    async fn create_test_db() -> (TempDir, SqliteDestination) {
        let dir = TempDir::new().unwrap();
        let dest = SqliteDestination::open(dir.path().join("nested/processed.db"), "processed").unwrap();
        dest.setup().await.unwrap();
        dest.ensure_table(&TEST_TABLE).await.unwrap();
        (dir, dest)
    }

    fn row(token: &str, profit: f64, hash: &str) -> RecordRow {
        RecordRow {
            values: vec![token.into(), profit.into(), true.into()],
            row_hash: hash.to_string(),
        }
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_plain_identifier("processed"));
        assert!(is_plain_identifier("_tmp1"));
        assert!(!is_plain_identifier(""));
        assert!(!is_plain_identifier("1abc"));
        assert!(!is_plain_identifier("a-b"));
        assert!(!is_plain_identifier("x\"; DROP TABLE y; --"));
        assert_eq!(quote_identifier("abc").unwrap(), "\"abc\"");
    }

    #[tokio::test]
    async fn test_insert_skips_duplicates() {
        let (_dir, dest) = create_test_db().await;

        let first = dest
            .insert_if_absent(&TEST_TABLE, &[row("a", 1.0, "h1"), row("b", 2.0, "h2")])
            .await
            .unwrap();
        assert_eq!(first, InsertSummary { inserted: 2, skipped_duplicate: 0 });

        let second = dest
            .insert_if_absent(&TEST_TABLE, &[row("a", 1.0, "h1"), row("c", 3.0, "h3"), row("c", 3.0, "h3")])
            .await
            .unwrap();
        assert_eq!(second, InsertSummary { inserted: 1, skipped_duplicate: 2 });
        assert_eq!(dest.count_rows(&TEST_TABLE).unwrap(), 3);

        let flags = dest.column_values(&TEST_TABLE, "flag").unwrap();
        assert!(flags.iter().all(|f| *f == FieldValue::Integer(1)));
    }

    #[tokio::test]
    async fn test_arity_mismatch_rolls_back() {
        let (_dir, dest) = create_test_db().await;
        let bad = RecordRow {
            values: vec!["short".into()],
            row_hash: "hx".to_string(),
        };

        let result = dest.insert_if_absent(&TEST_TABLE, &[row("a", 1.0, "h1"), bad]).await;

        assert!(matches!(result, Err(PipelineError::Write(_))));
        assert_eq!(dest.count_rows(&TEST_TABLE).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cursor_persists_and_never_regresses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("processed.db");

        {
            let dest = SqliteDestination::open(&path, "processed").unwrap();
            dest.setup().await.unwrap();
            assert_eq!(dest.get_cursor("btstransaction").await.unwrap().last_processed_id, 0);

            dest.advance("btstransaction", 40, Some(1_000)).await.unwrap();
            let cursor = dest.advance("btstransaction", 10, Some(500)).await.unwrap();
            assert_eq!(cursor.last_processed_id, 40);
            assert_eq!(cursor.last_processed_ts, Some(1_000));
        }

        let reopened = SqliteDestination::open(&path, "processed").unwrap();
        reopened.setup().await.unwrap();
        let cursor = reopened.get_cursor("btstransaction").await.unwrap();
        assert_eq!(cursor.last_processed_id, 40);
        assert!(cursor.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_run_lock_lease() {
        let (_dir, dest) = create_test_db().await;

        assert!(dest.try_acquire_run_lock("process_arb", 3600).await.unwrap());
        assert!(!dest.try_acquire_run_lock("process_arb", 3600).await.unwrap());
        assert!(dest.try_acquire_run_lock("process_sniper", 3600).await.unwrap());

        // An expired lease can be taken over
        assert!(dest.try_acquire_run_lock("process_arb", -1).await.unwrap());

        dest.release_run_lock("process_arb").await.unwrap();
        assert!(dest.try_acquire_run_lock("process_arb", 3600).await.unwrap());
    }

    #[test]
    fn test_rejects_bad_schema_name() {
        let dir = TempDir::new().unwrap();
        let result = SqliteDestination::open(dir.path().join("p.db"), "bad schema");
        assert!(matches!(result, Err(PipelineError::Write(_))));
    }
}
