//! SQLite driver
//!
//! `rusqlite`-backed implementation of the driver traits. Every engine
//! transaction runs on a dedicated connection, so a transaction on one handle
//! never captures statements issued through other handles on the same
//! database. In-memory databases are opened as uniquely named shared-cache
//! databases so that those extra connections see the same data.
//!
//! Query cursors are stepped on demand by a worker thread that owns the
//! connection lock for the cursor's lifetime and hands rows over a bounded
//! channel.

use crate::core::db::table::Column;
use crate::core::value::{format_datetime, ColumnType, Value};
use crate::core::{DbxError, Result};
use crate::driver::{Cursor, Driver, DriverKind, EngineTransaction, ExecResult, Queryable, RawRow, RawValue};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags, Statement, ToSql};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Rows a cursor worker may step ahead of its reader.
const PREFETCH_ROWS: usize = 16;

static MEMORY_DATABASES: AtomicUsize = AtomicUsize::new(0);

type SharedConnection = Arc<Mutex<Connection>>;

fn lock<'a>(conn: &'a SharedConnection, context: &str) -> Result<MutexGuard<'a, Connection>> {
    conn.lock()
        .map_err(|e| DbxError::Driver(format!("connection mutex poisoned in {}: {}", context, e)))
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Int(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Bool(b) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(i64::from(*b))),
            Value::DateTime(t) => ToSqlOutput::Owned(rusqlite::types::Value::Text(format_datetime(t))),
            Value::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b.as_slice())),
        })
    }
}

impl From<ValueRef<'_>> for RawValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => RawValue::Null,
            ValueRef::Integer(i) => RawValue::Integer(i),
            ValueRef::Real(f) => RawValue::Real(f),
            ValueRef::Text(t) => match std::str::from_utf8(t) {
                Ok(s) => RawValue::Text(s.to_string()),
                Err(_) => RawValue::Blob(t.to_vec()),
            },
            ValueRef::Blob(b) => RawValue::Blob(b.to_vec()),
        }
    }
}

fn configure(conn: &Connection, in_memory: bool) -> Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    if !in_memory {
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    }
    Ok(())
}

fn prepare_on(conn: &Connection, sql: &str) -> Result<usize> {
    Ok(conn.prepare(sql)?.parameter_count())
}

fn exec_on(conn: &Connection, sql: &str, params: &[Value]) -> Result<ExecResult> {
    let affected = conn.execute(sql, params_from_iter(params.iter()))?;
    Ok(ExecResult {
        rows_affected: affected as u64,
        last_insert_id: Some(conn.last_insert_rowid()),
    })
}

fn statement_columns(stmt: &Statement<'_>) -> Vec<Column> {
    stmt.columns()
        .iter()
        .map(|c| Column::new(c.name(), ColumnType::from_decl_type(c.decl_type())))
        .collect()
}

fn row_values(row: &rusqlite::Row<'_>, width: usize) -> Result<Vec<RawValue>> {
    (0..width)
        .map(|i| row.get_ref(i).map(RawValue::from).map_err(DbxError::from))
        .collect()
}

fn query_row_on(conn: &Connection, sql: &str, params: &[Value]) -> Result<Option<RawRow>> {
    let mut stmt = conn.prepare(sql)?;
    let columns = statement_columns(&stmt);
    let width = columns.len();

    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    match rows.next()? {
        Some(row) => Ok(Some(RawRow {
            values: row_values(row, width)?,
            columns,
        })),
        None => Ok(None),
    }
}

enum Fetch {
    Columns(Vec<Column>),
    Row(Vec<RawValue>),
    Failed(DbxError),
}

/// Worker body: prepares and binds, reports the columns, then steps rows into
/// the channel until the result ends or the cursor hangs up.
fn stream_rows(
    conn: &SharedConnection,
    sql: &str,
    params: &[Value],
    sender: &SyncSender<Fetch>,
    stepped: &AtomicUsize,
) -> Result<()> {
    let guard = lock(conn, "query")?;
    let mut stmt = guard.prepare(sql)?;
    let columns = statement_columns(&stmt);
    let width = columns.len();

    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    if sender.send(Fetch::Columns(columns)).is_err() {
        return Ok(());
    }
    while let Some(row) = rows.next()? {
        stepped.fetch_add(1, Ordering::SeqCst);
        if sender.send(Fetch::Row(row_values(row, width)?)).is_err() {
            debug!("cursor closed before the result was exhausted");
            break;
        }
    }
    Ok(())
}

/// Result cursor over a live SQLite statement.
///
/// The connection stays locked until the cursor is closed or dropped; other
/// statements on the same connection wait for it.
pub struct SqliteCursor {
    columns: Vec<Column>,
    rows: Option<Receiver<Fetch>>,
    current: Option<Vec<RawValue>>,
    worker: Option<JoinHandle<()>>,
    stepped: Arc<AtomicUsize>,
    closed: bool,
}

impl SqliteCursor {
    fn open(conn: &SharedConnection, sql: &str, params: &[Value]) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel(PREFETCH_ROWS);
        let stepped = Arc::new(AtomicUsize::new(0));

        let worker = {
            let conn = Arc::clone(conn);
            let sql = sql.to_string();
            let params = params.to_vec();
            let stepped = Arc::clone(&stepped);
            thread::Builder::new()
                .name("dbx-sqlite-cursor".to_string())
                .spawn(move || {
                    if let Err(e) = stream_rows(&conn, &sql, &params, &sender, &stepped) {
                        if sender.send(Fetch::Failed(e)).is_err() {
                            debug!("cursor closed before a statement error was delivered");
                        }
                    }
                })?
        };

        let mut cursor = SqliteCursor {
            columns: Vec::new(),
            rows: Some(receiver),
            current: None,
            worker: Some(worker),
            stepped,
            closed: false,
        };
        let first = cursor.rows.as_ref().map(|rows| rows.recv());
        match first {
            Some(Ok(Fetch::Columns(columns))) => {
                cursor.columns = columns;
                Ok(cursor)
            }
            Some(Ok(Fetch::Failed(e))) => {
                cursor.close()?;
                Err(e)
            }
            _ => {
                cursor.close()?;
                Err(DbxError::Cursor("cursor worker stopped before reporting columns".to_string()))
            }
        }
    }

    /// Rows stepped out of SQLite so far, including prefetched ones.
    pub fn rows_stepped(&self) -> usize {
        self.stepped.load(Ordering::SeqCst)
    }

    /// Hangs up on the worker and waits for it to release the connection.
    fn stop_worker(&mut self) -> Result<()> {
        self.rows = None;
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| DbxError::Cursor("cursor worker panicked".to_string())),
            None => Ok(()),
        }
    }
}

impl Cursor for SqliteCursor {
    fn columns(&mut self) -> Result<Vec<Column>> {
        Ok(self.columns.clone())
    }

    fn advance(&mut self) -> Result<bool> {
        if self.closed {
            return Err(DbxError::Cursor("cursor is closed".to_string()));
        }
        self.current = None;
        let Some(rows) = &self.rows else {
            return Ok(false);
        };

        match rows.recv() {
            Ok(Fetch::Row(values)) => {
                self.current = Some(values);
                Ok(true)
            }
            Ok(Fetch::Failed(e)) => {
                if let Err(join) = self.stop_worker() {
                    warn!("Failed to stop cursor worker: {}", join);
                }
                Err(e)
            }
            Ok(Fetch::Columns(_)) => Err(DbxError::Cursor("unexpected column report".to_string())),
            Err(_) => {
                self.stop_worker()?;
                Ok(false)
            }
        }
    }

    fn scan(&mut self, dest: &mut Vec<RawValue>) -> Result<()> {
        let row = self
            .current
            .take()
            .ok_or_else(|| DbxError::Cursor("no current row to scan".to_string()))?;
        dest.clear();
        dest.extend(row);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.current = None;
        self.stop_worker()
    }
}

impl Drop for SqliteCursor {
    fn drop(&mut self) {
        if let Err(e) = self.stop_worker() {
            warn!("Failed to release cursor: {}", e);
        }
    }
}

/// SQLite database opened from a file path or `:memory:`.
pub struct SqliteDriver {
    path: String,
    /// What connections actually open; a shared-cache URI for in-memory
    /// databases
    target: String,
    conn: SharedConnection,
}

impl std::fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDriver")
            .field("path", &self.path)
            .field("target", &self.target)
            .finish()
    }
}

fn open_connection(target: &str, in_memory: bool) -> Result<Connection> {
    let conn = Connection::open_with_flags(target, OpenFlags::default() | OpenFlags::SQLITE_OPEN_URI)?;
    configure(&conn, in_memory)?;
    Ok(conn)
}

impl SqliteDriver {
    /// Opens the database at `path` (`:memory:` for an in-memory database).
    ///
    /// Each `:memory:` driver gets its own private database, which lives as
    /// long as the driver.
    pub fn open(path: &str) -> Result<Self> {
        let in_memory = is_memory_path(path);
        let target = if path.is_empty() || path == ":memory:" {
            let n = MEMORY_DATABASES.fetch_add(1, Ordering::SeqCst);
            format!("file:dbx-memory-{}-{}?mode=memory&cache=shared", std::process::id(), n)
        } else {
            path.to_string()
        };

        let conn = open_connection(&target, in_memory)?;
        debug!("Opened SQLite database at {:?}", target);
        Ok(SqliteDriver {
            path: path.to_string(),
            target,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_memory(&self) -> bool {
        is_memory_path(&self.path)
    }

    fn transaction_connection(&self) -> Result<SharedConnection> {
        let conn = open_connection(&self.target, self.is_memory())?;
        Ok(Arc::new(Mutex::new(conn)))
    }
}

fn is_memory_path(path: &str) -> bool {
    path.is_empty() || path == ":memory:" || path.contains("mode=memory")
}

impl Queryable for SqliteDriver {
    fn prepare(&self, sql: &str) -> Result<usize> {
        let conn = lock(&self.conn, "prepare")?;
        prepare_on(&conn, sql)
    }

    fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        let conn = lock(&self.conn, "exec")?;
        exec_on(&conn, sql, params)
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Box<dyn Cursor>> {
        Ok(Box::new(SqliteCursor::open(&self.conn, sql, params)?))
    }

    fn query_row(&self, sql: &str, params: &[Value]) -> Result<Option<RawRow>> {
        let conn = lock(&self.conn, "query_row")?;
        query_row_on(&conn, sql, params)
    }
}

impl Driver for SqliteDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    fn begin(&self) -> Result<Arc<dyn EngineTransaction>> {
        let conn = self.transaction_connection()?;
        lock(&conn, "begin")?.execute_batch("BEGIN")?;
        Ok(Arc::new(SqliteTransaction {
            conn,
            open: AtomicBool::new(true),
        }))
    }
}

/// An open `BEGIN ... COMMIT/ROLLBACK` block on its own connection.
pub struct SqliteTransaction {
    conn: SharedConnection,
    open: AtomicBool,
}

impl SqliteTransaction {
    fn ensure_open(&self) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(DbxError::Driver(
                "transaction has already been committed or rolled back".to_string(),
            ));
        }
        Ok(())
    }

    fn connection(&self, context: &str) -> Result<MutexGuard<'_, Connection>> {
        self.ensure_open()?;
        lock(&self.conn, context)
    }

    /// Marks the transaction finished; false if it already was.
    fn finish(&self) -> bool {
        self.open.swap(false, Ordering::SeqCst)
    }
}

impl Queryable for SqliteTransaction {
    fn prepare(&self, sql: &str) -> Result<usize> {
        let conn = self.connection("prepare")?;
        prepare_on(&conn, sql)
    }

    fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        let conn = self.connection("exec")?;
        exec_on(&conn, sql, params)
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Box<dyn Cursor>> {
        self.ensure_open()?;
        Ok(Box::new(SqliteCursor::open(&self.conn, sql, params)?))
    }

    fn query_row(&self, sql: &str, params: &[Value]) -> Result<Option<RawRow>> {
        let conn = self.connection("query_row")?;
        query_row_on(&conn, sql, params)
    }
}

impl EngineTransaction for SqliteTransaction {
    fn commit(&self) -> Result<()> {
        let conn = self.connection("commit")?;
        self.finish();
        if let Err(e) = conn.execute_batch("COMMIT") {
            // Not retried; leave the connection out of the transaction
            if !conn.is_autocommit() {
                if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                    warn!("Rollback after failed commit failed: {}", rollback);
                }
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let conn = self.connection("rollback")?;
        self.finish();
        conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if self.finish() {
            warn!("SQLite transaction dropped while open; rolling back");
            if let Ok(conn) = lock(&self.conn, "drop") {
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    warn!("Rollback on drop failed: {}", e);
                }
            }
        }
    }
}
