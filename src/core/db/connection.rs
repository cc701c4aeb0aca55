/// Connection Management Module
///
/// `Db` is the handle applications hold. It names a logical database on a
/// shared driver, owns the nested transaction state for everything issued
/// through it, and routes each statement to either the open transaction or the
/// base connection.
use crate::compiler::{CompiledQuery, QueryCompiler, SqlCompiler};
use crate::config::DatabaseConfig;
use crate::core::db::transaction::{Executor, TransactionManager};
use crate::core::value::Value;
use crate::core::{DbxError, Result};
use crate::driver::{Driver, DriverKind, SqliteDriver};
use sqlparser::ast::Statement;
use std::sync::Arc;
use tracing::debug;

/// A handle to one logical database.
///
/// Handles are `Send + Sync` and may be shared across threads; all of them
/// then take part in the same nested transaction. Use `clone` (or
/// `for_database`) to get a handle with independent transaction state over
/// the same driver.
pub struct Db {
    kind: DriverKind,
    dsn: String,
    database: String,
    read_only: bool,
    pool: Arc<dyn Driver>,
    compiler: Arc<dyn QueryCompiler>,
    tx: TransactionManager,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("driver", &self.kind)
            .field("dsn", &self.dsn)
            .field("database", &self.database)
            .field("read_only", &self.read_only)
            .field("transaction", &self.tx)
            .finish()
    }
}

impl Db {
    /// Opens a database with one of the bundled drivers.
    ///
    /// # Arguments
    ///
    /// * `driver` - Driver name, e.g. `"sqlite3"`
    /// * `dsn` - Connection string; a file path or `":memory:"` for SQLite
    ///
    /// # Examples
    ///
    /// ```
    /// let db = dbx::Db::open("sqlite3", ":memory:")?;
    /// assert!(!db.has_transaction());
    /// # Ok::<(), dbx::DbxError>(())
    /// ```
    pub fn open(driver: &str, dsn: &str) -> Result<Self> {
        Self::open_database("", driver, dsn)
    }

    /// Opens a handle for the logical database `database`.
    ///
    /// SQLite has no logical databases inside a file, so the name is dropped
    /// and the DSN identifies the database.
    pub fn open_database(database: &str, driver: &str, dsn: &str) -> Result<Self> {
        let kind: DriverKind = driver.parse()?;
        match kind {
            DriverKind::Sqlite => {
                if !database.is_empty() {
                    debug!(database, "SQLite has no logical databases; ignoring name");
                }
                let pool = Arc::new(SqliteDriver::open(dsn)?);
                Ok(Self::with_driver(pool, "", dsn))
            }
            other => Err(DbxError::Config(format!(
                "No bundled driver for {}; construct the handle with Db::with_driver",
                other
            ))),
        }
    }

    /// Opens a handle from the `[database]` section of a config file.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let db = Self::open_database(&config.name, &config.driver, &config.dsn)?;
        Ok(db.with_read_only(config.read_only))
    }

    /// Wraps an already opened driver.
    pub fn with_driver(pool: Arc<dyn Driver>, database: &str, dsn: &str) -> Self {
        debug!(driver = %pool.kind(), database, "opening handle");
        Db {
            kind: pool.kind(),
            dsn: dsn.to_string(),
            database: database.to_string(),
            read_only: false,
            pool,
            compiler: Arc::new(SqlCompiler),
            tx: TransactionManager::new(),
        }
    }

    /// Replaces the query compiler.
    pub fn with_compiler(mut self, compiler: Arc<dyn QueryCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// A handle for another logical database on the same driver, with its own
    /// transaction state.
    pub fn for_database(&self, database: &str) -> Db {
        let mut db = self.clone();
        db.database = database.to_string();
        db
    }

    pub fn driver(&self) -> DriverKind {
        self.kind
    }

    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Whether an engine transaction is open on this handle.
    pub fn has_transaction(&self) -> bool {
        self.tx.has_transaction()
    }

    /// Number of `begin` calls not yet matched by `commit`/`rollback`.
    pub fn nested_transaction_depth(&self) -> usize {
        self.tx.depth()
    }

    /// Starts a transaction, or nests one level inside the open one.
    pub fn begin(&self) -> Result<()> {
        self.tx.begin(self.pool.as_ref())
    }

    /// Closes one nesting level; the outermost commit reaches the engine.
    pub fn commit(&self) -> Result<()> {
        self.tx.commit()
    }

    /// Commits the engine transaction at any nesting depth.
    pub fn commit_force(&self) -> Result<()> {
        self.tx.commit_force()
    }

    /// Rolls back the whole engine transaction and closes one nesting level.
    pub fn rollback(&self) -> Result<()> {
        self.tx.rollback()
    }

    /// The execution target for the next statement.
    pub fn queryable(&self) -> Result<Executor> {
        self.tx.select(&self.pool)
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(DbxError::ReadOnly);
        }
        Ok(())
    }

    /// Parses a textual query with the handle's compiler.
    pub fn parse(&self, text: &str) -> Result<Statement> {
        self.compiler.parse(text, self.kind)
    }

    /// Renders a statement to engine SQL and parameters.
    pub fn to_sql(&self, stmt: &Statement, params: &[Value]) -> Result<CompiledQuery> {
        self.compiler.compile(stmt, params, &self.database, self.kind)
    }
}

impl Clone for Db {
    /// Copies configuration and shares the driver. Transaction state is not
    /// copied: the clone starts with no transaction.
    fn clone(&self) -> Self {
        Db {
            kind: self.kind,
            dsn: self.dsn.clone(),
            database: self.database.clone(),
            read_only: self.read_only,
            pool: Arc::clone(&self.pool),
            compiler: Arc::clone(&self.compiler),
            tx: TransactionManager::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingDriver;

    #[test]
    fn test_open_sqlite_drops_database_name() {
        let db = Db::open_database("inventory", "sqlite3", ":memory:").unwrap();
        assert_eq!(db.driver(), DriverKind::Sqlite);
        assert_eq!(db.database(), "");
        assert_eq!(db.dsn(), ":memory:");
        assert!(!db.is_read_only());
    }

    #[test]
    fn test_open_unsupported_driver() {
        match Db::open("postgres", "host=localhost") {
            Err(DbxError::Config(msg)) => assert!(msg.contains("with_driver")),
            other => panic!("Expected Config error, got {:?}", other),
        }
        assert!(matches!(Db::open("oracle", "x"), Err(DbxError::Config(_))));
    }

    #[test]
    fn test_open_invalid_path() {
        match Db::open("sqlite3", "/nonexistent/path/database.db") {
            Err(DbxError::Database(_)) => {}
            other => panic!("Expected Database error, got {:?}", other),
        }
    }

    #[test]
    fn test_clone_gets_fresh_transaction_state() {
        let driver = Arc::new(RecordingDriver::new());
        let db = Db::with_driver(driver.clone(), "main", "fake://").with_read_only(true);
        db.begin().unwrap();
        db.begin().unwrap();

        let copy = db.clone();
        assert!(copy.is_read_only());
        assert_eq!(copy.database(), "main");
        assert!(!copy.has_transaction());
        assert_eq!(copy.nested_transaction_depth(), 0);

        let other = db.for_database("archive");
        assert_eq!(other.database(), "archive");
        assert!(!other.has_transaction());

        // Independent transactions over the shared driver
        copy.begin().unwrap();
        assert_eq!(driver.begins(), 2);
        copy.commit().unwrap();
        assert_eq!(db.nested_transaction_depth(), 2);
        db.commit_force().unwrap();
        assert_eq!(driver.commits(), 2);
    }

    #[test]
    fn test_queryable_selects_transaction() {
        let driver = Arc::new(RecordingDriver::new());
        let db = Db::with_driver(driver, "", "fake://");
        assert!(!db.queryable().unwrap().is_transaction());
        db.begin().unwrap();
        assert!(db.queryable().unwrap().is_transaction());
        db.rollback().unwrap();
        assert!(!db.queryable().unwrap().is_transaction());
    }

    #[test]
    fn test_handle_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Db>();
    }
}
