/// Prepared Statements
///
/// A `Stmt` is SQL validated against the engine once and bound to the handle
/// that prepared it. The execution target is chosen again at every call, so a
/// statement prepared outside a transaction runs inside one opened later.
use crate::core::db::connection::Db;
use crate::core::db::reader::Reader;
use crate::core::db::table::{Row, Table};
use crate::core::value::Value;
use crate::core::{DbxError, Result};
use crate::driver::{ExecResult, Queryable};

#[derive(Debug)]
pub struct Stmt<'db> {
    db: &'db Db,
    sql: String,
    param_count: usize,
}

impl Db {
    /// Validates `sql` and returns a statement bound to this handle.
    pub fn prepare(&self, sql: &str) -> Result<Stmt<'_>> {
        let param_count = self.queryable()?.prepare(sql)?;
        Ok(Stmt {
            db: self,
            sql: sql.to_string(),
            param_count,
        })
    }
}

impl Stmt<'_> {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Number of bind parameters the statement expects.
    pub fn param_count(&self) -> usize {
        self.param_count
    }

    fn check_params(&self, params: &[Value]) -> Result<()> {
        if params.len() != self.param_count {
            return Err(DbxError::Compile(format!(
                "statement expects {} parameters, got {}",
                self.param_count,
                params.len()
            )));
        }
        Ok(())
    }

    pub fn exec(&self, params: &[Value]) -> Result<ExecResult> {
        self.db.ensure_writable()?;
        self.check_params(params)?;
        self.db.exec_raw(&self.sql, params)
    }

    pub fn query(&self, params: &[Value]) -> Result<Table> {
        self.check_params(params)?;
        self.db.query_raw(&self.sql, params)
    }

    pub fn reader(&self, params: &[Value]) -> Result<Reader> {
        self.check_params(params)?;
        self.db.reader_raw(&self.sql, params)
    }

    pub fn query_row(&self, params: &[Value]) -> Result<Option<Row>> {
        self.check_params(params)?;
        self.db.query_row_raw(&self.sql, params)
    }

    pub fn query_value(&self, params: &[Value]) -> Result<Option<Value>> {
        self.check_params(params)?;
        self.db.query_value_raw(&self.sql, params)
    }
}
