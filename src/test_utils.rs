/// # Test Utilities Module
///
/// Shared fixtures for unit and integration tests:
/// - `FakeCursor`: a scripted driver cursor with failure injection
/// - `RecordingDriver`: an in-process driver that counts engine transaction calls
/// - `DatabaseFixture`: a temporary SQLite database behind a `Db` handle

use crate::core::db::table::Column;
use crate::core::db::Db;
use crate::core::value::Value;
use crate::core::{DbxError, Result};
use crate::driver::{Cursor, Driver, DriverKind, EngineTransaction, ExecResult, Queryable, RawRow, RawValue};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// A cursor over rows held in memory.
pub struct FakeCursor {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<RawValue>>,
    /// Fail the advance after this many rows were produced
    pub fail_after: Option<usize>,
    position: usize,
    current: Option<usize>,
    closed: Arc<AtomicBool>,
    columns_calls: Arc<AtomicUsize>,
}

impl FakeCursor {
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<RawValue>>) -> Self {
        FakeCursor {
            columns,
            rows,
            fail_after: None,
            position: 0,
            current: None,
            closed: Arc::new(AtomicBool::new(false)),
            columns_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Set once `close` has been called.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    /// Number of `columns` calls made so far.
    pub fn columns_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.columns_calls)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbxError::Cursor("cursor is closed".to_string()));
        }
        Ok(())
    }
}

impl Cursor for FakeCursor {
    fn columns(&mut self) -> Result<Vec<Column>> {
        self.ensure_open()?;
        self.columns_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.columns.clone())
    }

    fn advance(&mut self) -> Result<bool> {
        self.ensure_open()?;
        if let Some(limit) = self.fail_after {
            if self.position >= limit {
                self.current = None;
                return Err(DbxError::Driver(format!("cursor failed after {} rows", limit)));
            }
        }
        if self.position < self.rows.len() {
            self.current = Some(self.position);
            self.position += 1;
            Ok(true)
        } else {
            self.current = None;
            Ok(false)
        }
    }

    fn scan(&mut self, dest: &mut Vec<RawValue>) -> Result<()> {
        self.ensure_open()?;
        let index = self
            .current
            .ok_or_else(|| DbxError::Cursor("no current row".to_string()))?;
        dest.clear();
        dest.extend(self.rows[index].iter().cloned());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct Counters {
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    tx_statements: AtomicUsize,
    fail_begin: AtomicBool,
    fail_commit: AtomicBool,
}

/// A driver that executes nothing and records every engine transaction call.
#[derive(Default)]
pub struct RecordingDriver {
    counters: Arc<Counters>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begins(&self) -> usize {
        self.counters.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.counters.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.counters.rollbacks.load(Ordering::SeqCst)
    }

    /// Statements executed through any transaction of this driver.
    pub fn tx_statements(&self) -> usize {
        self.counters.tx_statements.load(Ordering::SeqCst)
    }

    pub fn fail_begin(&self, fail: bool) {
        self.counters.fail_begin.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commit(&self, fail: bool) {
        self.counters.fail_commit.store(fail, Ordering::SeqCst);
    }
}

fn placeholder_count(sql: &str) -> usize {
    sql.matches('?').count()
}

fn empty_cursor() -> Box<dyn Cursor> {
    Box::new(FakeCursor::new(Vec::new(), Vec::new()))
}

impl Queryable for RecordingDriver {
    fn prepare(&self, sql: &str) -> Result<usize> {
        Ok(placeholder_count(sql))
    }

    fn exec(&self, _sql: &str, _params: &[Value]) -> Result<ExecResult> {
        Ok(ExecResult::default())
    }

    fn query(&self, _sql: &str, _params: &[Value]) -> Result<Box<dyn Cursor>> {
        Ok(empty_cursor())
    }

    fn query_row(&self, _sql: &str, _params: &[Value]) -> Result<Option<RawRow>> {
        Ok(None)
    }
}

impl Driver for RecordingDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    fn begin(&self) -> Result<Arc<dyn EngineTransaction>> {
        if self.counters.fail_begin.load(Ordering::SeqCst) {
            return Err(DbxError::Driver("begin refused".to_string()));
        }
        self.counters.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordingTransaction {
            counters: Arc::clone(&self.counters),
            finished: AtomicBool::new(false),
        }))
    }
}

struct RecordingTransaction {
    counters: Arc<Counters>,
    finished: AtomicBool,
}

impl RecordingTransaction {
    fn statement(&self) -> Result<()> {
        if self.finished.load(Ordering::SeqCst) {
            return Err(DbxError::Driver("transaction has already been committed or rolled back".to_string()));
        }
        self.counters.tx_statements.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Err(DbxError::Driver("transaction has already been committed or rolled back".to_string()));
        }
        Ok(())
    }
}

impl Queryable for RecordingTransaction {
    fn prepare(&self, sql: &str) -> Result<usize> {
        self.statement()?;
        Ok(placeholder_count(sql))
    }

    fn exec(&self, _sql: &str, _params: &[Value]) -> Result<ExecResult> {
        self.statement()?;
        Ok(ExecResult::default())
    }

    fn query(&self, _sql: &str, _params: &[Value]) -> Result<Box<dyn Cursor>> {
        self.statement()?;
        Ok(empty_cursor())
    }

    fn query_row(&self, _sql: &str, _params: &[Value]) -> Result<Option<RawRow>> {
        self.statement()?;
        Ok(None)
    }
}

impl EngineTransaction for RecordingTransaction {
    fn commit(&self) -> Result<()> {
        self.finish()?;
        if self.counters.fail_commit.load(Ordering::SeqCst) {
            return Err(DbxError::Driver("commit refused".to_string()));
        }
        self.counters.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.finish()?;
        self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Isolated database test fixture backed by a temporary file.
pub struct DatabaseFixture {
    pub db: Db,
    _dir: TempDir,
}

impl DatabaseFixture {
    /// Creates an empty database file.
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("test.db");
        let db = Db::open("sqlite3", &path.to_string_lossy())?;
        Ok(DatabaseFixture { db, _dir: dir })
    }

    /// Creates the `cars` table with `rows` identical rows named 'ford'.
    pub fn with_cars(rows: usize) -> Result<Self> {
        let fixture = Self::new()?;
        fixture
            .db
            .exec_raw("CREATE TABLE cars(id INTEGER PRIMARY KEY, name TEXT, price INTEGER)", &[])?;
        for _ in 0..rows {
            fixture
                .db
                .exec_raw("INSERT INTO cars (name, price) VALUES (?, ?)", &["ford".into(), 99.into()])?;
        }
        Ok(fixture)
    }

    pub fn count(&self, table: &str) -> Result<i64> {
        let value = self
            .db
            .query_value_raw(&format!("SELECT COUNT(*) FROM {}", table), &[])?;
        Ok(value.and_then(|v| v.as_i64()).unwrap_or(0))
    }
}

/// Error testing utilities
pub mod error_testing {
    use crate::core::DbxError;

    /// Asserts that a result failed and that its message contains `expected`.
    pub fn assert_error_message<T: std::fmt::Debug>(result: crate::core::Result<T>, expected: &str) {
        match result {
            Err(e) => {
                let message = e.to_string();
                assert!(
                    message.contains(expected),
                    "Error message '{}' does not contain '{}'",
                    message,
                    expected
                );
            }
            Ok(v) => panic!("Expected an error containing '{}', got Ok({:?})", expected, v),
        }
    }

    /// Asserts that a result failed with `NoTransactionOpen`.
    pub fn assert_no_transaction<T: std::fmt::Debug>(result: crate::core::Result<T>) {
        match result {
            Err(DbxError::NoTransactionOpen) => {}
            other => panic!("Expected NoTransactionOpen, got {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cars_fixture() {
        let fixture = DatabaseFixture::with_cars(3).unwrap();
        assert_eq!(fixture.count("cars").unwrap(), 3);
        assert!(!fixture.db.has_transaction());
    }

    #[test]
    fn test_recording_transaction_rejects_reuse() {
        let driver = RecordingDriver::new();
        let tx = driver.begin().unwrap();
        tx.exec("x", &[]).unwrap();
        tx.commit().unwrap();

        assert!(tx.exec("x", &[]).is_err());
        assert!(tx.rollback().is_err());
        assert_eq!(driver.tx_statements(), 1);
        assert_eq!(driver.commits(), 1);
        assert_eq!(driver.rollbacks(), 0);
    }

    #[test]
    fn test_fake_cursor_failure_injection() {
        let mut cursor = FakeCursor::new(Vec::new(), vec![vec![RawValue::Integer(1)]; 3]);
        cursor.fail_after = Some(2);
        assert!(cursor.advance().unwrap());
        assert!(cursor.advance().unwrap());
        assert!(cursor.advance().is_err());
    }
}
