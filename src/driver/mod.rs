//! Driver substrate
//!
//! Traits the access layer consumes from a concrete database driver, and the
//! driver-native value representation that flows out of result cursors before
//! normalization. The bundled implementation is SQLite (`sqlite.rs`).

pub mod sqlite;

use crate::core::db::table::Column;
use crate::core::value::Value;
use crate::core::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use sqlite::SqliteDriver;

/// Database engines the access layer knows how to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Sqlite,
    Postgres,
    MySql,
}

impl DriverKind {
    /// Name used in configuration files and connection metadata.
    pub fn name(&self) -> &'static str {
        match self {
            DriverKind::Sqlite => "sqlite3",
            DriverKind::Postgres => "postgres",
            DriverKind::MySql => "mysql",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DriverKind {
    type Err = crate::core::DbxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(DriverKind::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(DriverKind::Postgres),
            "mysql" => Ok(DriverKind::MySql),
            other => Err(crate::core::DbxError::Config(format!(
                "Unknown driver '{}'. Supported drivers: sqlite3, postgres, mysql",
                other
            ))),
        }
    }
}

/// A value exactly as the driver reported it, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl RawValue {
    /// Short name of the representation, used in conversion errors.
    pub fn kind(&self) -> &'static str {
        match self {
            RawValue::Null => "null",
            RawValue::Integer(_) => "integer",
            RawValue::Real(_) => "real",
            RawValue::Text(_) => "text",
            RawValue::Blob(_) => "blob",
            RawValue::Bool(_) => "bool",
            RawValue::Timestamp(_) => "timestamp",
        }
    }
}

/// Outcome of a statement that does not produce rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

/// A single row fetched through `Queryable::query_row`, with the column
/// metadata needed to normalize it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub columns: Vec<Column>,
    pub values: Vec<RawValue>,
}

/// A forward-only driver result cursor.
///
/// `scan` fills the caller's buffer with the current row, replacing its
/// contents but keeping its allocation.
pub trait Cursor: Send {
    /// Column metadata for the result set.
    fn columns(&mut self) -> Result<Vec<Column>>;

    /// Moves to the next row. `Ok(false)` means the cursor is exhausted.
    fn advance(&mut self) -> Result<bool>;

    /// Copies the current row into `dest`.
    fn scan(&mut self, dest: &mut Vec<RawValue>) -> Result<()>;

    /// Releases the underlying driver resources.
    fn close(&mut self) -> Result<()>;
}

/// Statement execution primitives, available on both the base connection and
/// an open engine transaction.
pub trait Queryable: Send + Sync {
    /// Validates `sql` and returns the number of bind parameters it expects.
    fn prepare(&self, sql: &str) -> Result<usize>;

    fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecResult>;

    fn query(&self, sql: &str, params: &[Value]) -> Result<Box<dyn Cursor>>;

    /// First row of the result, if any. Remaining rows are discarded.
    fn query_row(&self, sql: &str, params: &[Value]) -> Result<Option<RawRow>>;
}

/// An engine-level transaction. Once committed or rolled back it rejects
/// further statements.
pub trait EngineTransaction: Queryable {
    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;
}

/// A connection (or pool) to one database server or file.
pub trait Driver: Queryable {
    fn kind(&self) -> DriverKind;

    /// Opens a new engine-level transaction.
    fn begin(&self) -> Result<Arc<dyn EngineTransaction>>;
}
