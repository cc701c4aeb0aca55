/// Transaction Management Module
///
/// Tracks nested transaction depth over a single engine-level transaction.
/// Only the outermost `begin` opens an engine transaction and only the
/// outermost `commit` commits it. A `rollback` at any depth closes the engine
/// transaction immediately but unwinds the depth by one level, so the commits
/// that follow at the remaining depth report `NoTransactionOpen`.
///
/// Every transition, the engine call included, runs under one mutex owned by
/// the manager. Each `Db` handle owns its own manager.
use crate::core::value::Value;
use crate::core::{DbxError, Result};
use crate::driver::{Cursor, Driver, EngineTransaction, ExecResult, Queryable, RawRow};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Default)]
struct TxState {
    /// Logical nesting depth requested by callers
    depth: usize,
    /// The engine transaction; `Some` only while depth > 0
    tx: Option<Arc<dyn EngineTransaction>>,
}

/// Nested transaction state machine for one connection handle.
#[derive(Default)]
pub struct TransactionManager {
    state: Mutex<TxState>,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("depth", &self.depth())
            .field("has_transaction", &self.has_transaction())
            .finish()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, TxState>> {
        self.state
            .lock()
            .map_err(|e| DbxError::Transaction(format!("transaction state lock poisoned: {}", e)))
    }

    /// Opens an engine transaction at depth 0, otherwise nests one level.
    pub fn begin(&self, driver: &dyn Driver) -> Result<()> {
        let mut state = self.lock()?;

        if state.tx.is_none() && state.depth > 0 {
            return Err(DbxError::PreviousTransactionStillOpen);
        }

        if state.tx.is_none() {
            state.tx = Some(driver.begin()?);
        }
        state.depth += 1;
        debug!(depth = state.depth, "begin");
        Ok(())
    }

    /// Closes one nesting level; commits the engine transaction when the
    /// outermost level closes.
    pub fn commit(&self) -> Result<()> {
        let mut state = self.lock()?;

        if state.depth == 0 {
            return Err(DbxError::NoTransactionOpen);
        }
        state.depth -= 1;

        if state.tx.is_none() {
            debug!(depth = state.depth, "commit after rollback");
            return Err(DbxError::NoTransactionOpen);
        }
        if state.depth > 0 {
            debug!(depth = state.depth, "nested commit");
            return Ok(());
        }

        let result = match state.tx.take() {
            Some(tx) => tx.commit(),
            None => Err(DbxError::NoTransactionOpen),
        };
        debug!(depth = state.depth, ok = result.is_ok(), "commit");
        result
    }

    /// Commits the engine transaction regardless of nesting and resets the
    /// depth to 0.
    pub fn commit_force(&self) -> Result<()> {
        let mut state = self.lock()?;

        if state.depth == 0 {
            return Err(DbxError::NoTransactionOpen);
        }
        let tx = state.tx.take().ok_or(DbxError::NoTransactionOpen)?;
        let nested = state.depth;
        state.depth = 0;

        let result = tx.commit();
        debug!(nested, ok = result.is_ok(), "forced commit");
        result
    }

    /// Rolls back the engine transaction if one is open and closes one
    /// nesting level.
    pub fn rollback(&self) -> Result<()> {
        let mut state = self.lock()?;

        let result = match state.tx.take() {
            Some(tx) => tx.rollback(),
            None => Ok(()),
        };

        if state.depth == 0 {
            return Err(DbxError::Transaction(
                "rollback requested with no transaction open".to_string(),
            ));
        }
        state.depth -= 1;
        debug!(depth = state.depth, ok = result.is_ok(), "rollback");
        result
    }

    /// Whether an engine transaction is open.
    pub fn has_transaction(&self) -> bool {
        self.lock().map(|s| s.tx.is_some()).unwrap_or(false)
    }

    /// Current logical nesting depth.
    pub fn depth(&self) -> usize {
        self.lock().map(|s| s.depth).unwrap_or(0)
    }

    /// Chooses where the next statement runs: the open engine transaction,
    /// or the base connection.
    pub fn select(&self, base: &Arc<dyn Driver>) -> Result<Executor> {
        let state = self.lock()?;
        Ok(match &state.tx {
            Some(tx) => Executor::Transaction(Arc::clone(tx)),
            None => Executor::Base(Arc::clone(base)),
        })
    }
}

/// Execution target picked by `TransactionManager::select`.
///
/// Holds its own reference, so a concurrent commit cannot pull the handle out
/// from under a statement; statements on a finished transaction fail in the
/// driver instead.
#[derive(Clone)]
pub enum Executor {
    Transaction(Arc<dyn EngineTransaction>),
    Base(Arc<dyn Driver>),
}

impl Executor {
    pub fn is_transaction(&self) -> bool {
        matches!(self, Executor::Transaction(_))
    }
}

impl Queryable for Executor {
    fn prepare(&self, sql: &str) -> Result<usize> {
        match self {
            Executor::Transaction(tx) => tx.prepare(sql),
            Executor::Base(driver) => driver.prepare(sql),
        }
    }

    fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        match self {
            Executor::Transaction(tx) => tx.exec(sql, params),
            Executor::Base(driver) => driver.exec(sql, params),
        }
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Box<dyn Cursor>> {
        match self {
            Executor::Transaction(tx) => tx.query(sql, params),
            Executor::Base(driver) => driver.query(sql, params),
        }
    }

    fn query_row(&self, sql: &str, params: &[Value]) -> Result<Option<RawRow>> {
        match self {
            Executor::Transaction(tx) => tx.query_row(sql, params),
            Executor::Base(driver) => driver.query_row(sql, params),
        }
    }
}
