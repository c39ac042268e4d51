mod catalog;
mod progress;
pub mod schema;
mod sessions;
mod stats;

use std::path::Path;
use std::time::Duration;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::Result;
use crate::models::{Category, ProgressStatus, SessionItemStatus};
use crate::policy::{NoOpenSessionPolicy, SessionComposition, SessionPolicy};

/// SQLite-backed store for the catalog, the per-user overlay, stats and review
/// sessions.
pub struct Database {
    conn: Connection,
    policy: Box<dyn SessionPolicy>,
    composition: SessionComposition,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn,
            policy: Box::new(NoOpenSessionPolicy),
            composition: SessionComposition::default(),
        })
    }

    pub fn with_policy<P: SessionPolicy + 'static>(mut self, policy: P) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn with_composition(mut self, composition: SessionComposition) -> Self {
        self.composition = composition;
        self
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(schema::SCHEMA)?;
        Ok(())
    }

    // IMMEDIATE takes the write lock up front, so two writers for the same
    // user can't both read "pending" and then both flip to in_progress.
    fn begin(&self) -> Result<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }
}

fn unknown_variant(kind: &str, raw: &str) -> FromSqlError {
    FromSqlError::Other(format!("unknown {kind} '{raw}'").into())
}

impl ToSql for Category {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for Category {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        Category::from_str(raw).ok_or_else(|| unknown_variant("category", raw))
    }
}

impl ToSql for ProgressStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for ProgressStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        ProgressStatus::from_str(raw).ok_or_else(|| unknown_variant("progress status", raw))
    }
}

impl ToSql for SessionItemStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for SessionItemStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        SessionItemStatus::from_str(raw).ok_or_else(|| unknown_variant("session status", raw))
    }
}
