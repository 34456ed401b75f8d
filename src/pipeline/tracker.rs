//! Progress tracking: one persisted high-water mark per source table
//!
//! Runners never touch the tracker relation directly. They go through the
//! `CursorStore` trait, implemented by `SqliteDestination` for production and
//! by `InMemoryCursorStore` for tests and dry runs.
//!
//! Rules:
//! - An absent cursor reads as 0 (process all history)
//! - `advance` stores `max(existing, new)`, so a cursor never regresses
//! - Callers advance only after the rows a cursor certifies are committed

use super::error::PipelineError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Persisted progress of one source table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub table_name: String,
    pub last_processed_id: i64,
    pub last_processed_ts: Option<i64>,
    pub updated_at: Option<i64>,
}

impl Cursor {
    /// Cursor of a table that has never been processed
    pub fn initial(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            last_processed_id: 0,
            last_processed_ts: None,
            updated_at: None,
        }
    }

    /// Merge an advance request, never moving backwards
    pub fn advanced(&self, new_last_id: i64, last_ts: Option<i64>, now: i64) -> Self {
        if new_last_id > self.last_processed_id {
            Self {
                table_name: self.table_name.clone(),
                last_processed_id: new_last_id,
                last_processed_ts: last_ts,
                updated_at: Some(now),
            }
        } else {
            Self {
                updated_at: Some(now),
                ..self.clone()
            }
        }
    }
}

/// Data-access interface for cursors
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Current cursor, `Cursor::initial` when the table was never processed
    async fn get_cursor(&self, table: &str) -> Result<Cursor, PipelineError>;

    /// Move the cursor to `max(existing, new_last_id)` and return the stored value
    async fn advance(
        &self,
        table: &str,
        new_last_id: i64,
        last_ts: Option<i64>,
    ) -> Result<Cursor, PipelineError>;
}

/// Process-local cursor store
#[derive(Default)]
pub struct InMemoryCursorStore {
    cursors: Mutex<HashMap<String, Cursor>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a cursor, e.g. to resume from a known position
    pub fn with_cursor(self, table: &str, last_id: i64) -> Self {
        if let Ok(mut cursors) = self.cursors.lock() {
            let cursor = Cursor::initial(table).advanced(last_id, None, 0);
            cursors.insert(table.to_string(), cursor);
        }
        self
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn get_cursor(&self, table: &str) -> Result<Cursor, PipelineError> {
        let cursors = self
            .cursors
            .lock()
            .map_err(|e| PipelineError::Tracker(format!("Cursor store poisoned: {}", e)))?;

        Ok(cursors
            .get(table)
            .cloned()
            .unwrap_or_else(|| Cursor::initial(table)))
    }

    async fn advance(
        &self,
        table: &str,
        new_last_id: i64,
        last_ts: Option<i64>,
    ) -> Result<Cursor, PipelineError> {
        let mut cursors = self
            .cursors
            .lock()
            .map_err(|e| PipelineError::Tracker(format!("Cursor store poisoned: {}", e)))?;

        let now = chrono::Utc::now().timestamp();
        let current = cursors
            .get(table)
            .cloned()
            .unwrap_or_else(|| Cursor::initial(table));
        let next = current.advanced(new_last_id, last_ts, now);
        cursors.insert(table.to_string(), next.clone());

        Ok(next)
    }
}
