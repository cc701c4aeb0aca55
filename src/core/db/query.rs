/// Query Execution Module
///
/// The exec/query/row/value family on `Db`. Each operation comes in three
/// forms: textual (parsed and compiled), structured (an already parsed
/// statement, compiled) and raw (engine SQL sent as is). Reads are built on
/// the table materializer with the row-count expectation of the operation.
use crate::compiler::{is_select, CompiledQuery};
use crate::core::db::connection::Db;
use crate::core::db::reader::Reader;
use crate::core::db::table::{to_table, to_table_limit, Row, Table};
use crate::core::value::{convert, Value};
use crate::core::{DbxError, Result};
use crate::driver::{ExecResult, Queryable};
use sqlparser::ast::Statement;
use tracing::debug;

impl Db {
    /// Parses, compiles and executes a statement that returns no rows.
    ///
    /// Read-only handles reject the call before the query is parsed.
    pub fn exec(&self, query: &str, params: &[Value]) -> Result<ExecResult> {
        self.ensure_writable()?;
        let stmt = self.parse(query)?;
        self.exec_statement(&stmt, params)
    }

    /// Compiles and executes a structured statement.
    pub fn exec_statement(&self, stmt: &Statement, params: &[Value]) -> Result<ExecResult> {
        self.ensure_writable()?;
        let CompiledQuery { sql, params } = self.to_sql(stmt, params)?;
        self.exec_raw(&sql, &params)
    }

    /// Executes engine SQL without compiling it.
    pub fn exec_raw(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        self.ensure_writable()?;
        let target = self.queryable()?;
        debug!(sql, in_transaction = target.is_transaction(), "exec");
        target.exec(sql, params)
    }

    /// Runs a SELECT and materializes the whole result.
    pub fn query(&self, query: &str, params: &[Value]) -> Result<Table> {
        to_table(self.reader(query, params)?)
    }

    pub fn query_statement(&self, stmt: &Statement, params: &[Value]) -> Result<Table> {
        to_table(self.reader_statement(stmt, params)?)
    }

    pub fn query_raw(&self, sql: &str, params: &[Value]) -> Result<Table> {
        to_table(self.reader_raw(sql, params)?)
    }

    /// Runs a SELECT and returns a streaming reader over its rows.
    ///
    /// The reader must be closed (or dropped) to release the cursor.
    pub fn reader(&self, query: &str, params: &[Value]) -> Result<Reader> {
        let stmt = self.parse_select(query)?;
        self.reader_statement(&stmt, params)
    }

    pub fn reader_statement(&self, stmt: &Statement, params: &[Value]) -> Result<Reader> {
        let CompiledQuery { sql, params } = self.to_sql(stmt, params)?;
        self.reader_raw(&sql, &params)
    }

    pub fn reader_raw(&self, sql: &str, params: &[Value]) -> Result<Reader> {
        let target = self.queryable()?;
        debug!(sql, in_transaction = target.is_transaction(), "query");
        Ok(Reader::new(target.query(sql, params)?))
    }

    /// Runs a SELECT expected to match at most one row.
    ///
    /// Returns `Ok(None)` when nothing matched and `UnexpectedRowCount` when
    /// more than one row did.
    pub fn query_row(&self, query: &str, params: &[Value]) -> Result<Option<Row>> {
        expect_one_row(self.reader(query, params)?)
    }

    pub fn query_row_statement(&self, stmt: &Statement, params: &[Value]) -> Result<Option<Row>> {
        expect_one_row(self.reader_statement(stmt, params)?)
    }

    /// First row of a raw query, ignoring any further rows.
    pub fn query_row_raw(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let target = self.queryable()?;
        debug!(sql, in_transaction = target.is_transaction(), "query_row");
        let Some(raw) = target.query_row(sql, params)? else {
            return Ok(None);
        };

        let values = raw
            .values
            .into_iter()
            .zip(&raw.columns)
            .map(|(value, column)| convert(value, column))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(Row::new(values)))
    }

    /// Runs a SELECT expected to produce at most one row of exactly one
    /// column, and returns that value.
    pub fn query_value(&self, query: &str, params: &[Value]) -> Result<Option<Value>> {
        single_value(self.query_row(query, params)?)
    }

    pub fn query_value_statement(&self, stmt: &Statement, params: &[Value]) -> Result<Option<Value>> {
        single_value(self.query_row_statement(stmt, params)?)
    }

    pub fn query_value_raw(&self, sql: &str, params: &[Value]) -> Result<Option<Value>> {
        single_value(expect_one_row(self.reader_raw(sql, params)?)?)
    }

    fn parse_select(&self, query: &str) -> Result<Statement> {
        let stmt = self.parse(query)?;
        if !is_select(&stmt) {
            return Err(DbxError::Compile("Not a select query".to_string()));
        }
        Ok(stmt)
    }
}

fn expect_one_row(reader: Reader) -> Result<Option<Row>> {
    let (mut table, more) = to_table_limit(reader, 1)?;
    if more {
        return Err(DbxError::UnexpectedRowCount {
            count: table.rows.len() + 1,
            more: true,
        });
    }
    Ok(table.rows.pop())
}

fn single_value(row: Option<Row>) -> Result<Option<Value>> {
    match row {
        None => Ok(None),
        Some(mut row) if row.values.len() == 1 => Ok(row.values.pop()),
        Some(row) => Err(DbxError::UnexpectedColumnCount(row.values.len())),
    }
}
