//! Query Compiler
//!
//! Turns textual queries into structured statements and renders structured
//! statements into engine SQL plus bound parameters. The access layer only
//! depends on the `QueryCompiler` trait; `SqlCompiler` is the bundled
//! implementation on top of `sqlparser`.

use crate::core::value::Value;
use crate::core::{DbxError, Result};
use crate::driver::DriverKind;
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;

/// SQL text and parameters ready for the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Parses and renders queries for a target engine.
pub trait QueryCompiler: Send + Sync {
    /// Parses exactly one statement.
    fn parse(&self, text: &str, kind: DriverKind) -> Result<Statement>;

    /// Renders `stmt` for the engine behind `kind`, in the context of the
    /// logical database `database`.
    fn compile(
        &self,
        stmt: &Statement,
        params: &[Value],
        database: &str,
        kind: DriverKind,
    ) -> Result<CompiledQuery>;
}

/// `sqlparser`-backed compiler.
///
/// Statements are re-rendered through the AST, so anything the dialect can
/// parse round-trips. Table names are emitted as written; the logical
/// database name is not used for qualification.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlCompiler;

fn dialect(kind: DriverKind) -> Box<dyn Dialect> {
    match kind {
        DriverKind::Sqlite => Box::new(SQLiteDialect {}),
        DriverKind::Postgres => Box::new(PostgreSqlDialect {}),
        DriverKind::MySql => Box::new(MySqlDialect {}),
    }
}

impl QueryCompiler for SqlCompiler {
    fn parse(&self, text: &str, kind: DriverKind) -> Result<Statement> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(DbxError::Compile(
                "Cannot execute empty SQL query - please provide a valid SQL statement".to_string(),
            ));
        }

        let dialect = dialect(kind);
        let mut statements = Parser::parse_sql(dialect.as_ref(), trimmed)
            .map_err(|e| DbxError::Compile(e.to_string()))?;

        match statements.len() {
            1 => Ok(statements.remove(0)),
            n => Err(DbxError::Compile(format!(
                "expected exactly one statement, found {}",
                n
            ))),
        }
    }

    fn compile(
        &self,
        stmt: &Statement,
        params: &[Value],
        _database: &str,
        _kind: DriverKind,
    ) -> Result<CompiledQuery> {
        Ok(CompiledQuery {
            sql: stmt.to_string(),
            params: params.to_vec(),
        })
    }
}

/// Whether `stmt` produces a result set that the query family can read.
pub fn is_select(stmt: &Statement) -> bool {
    matches!(stmt, Statement::Query(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_render_select() {
        let stmt = SqlCompiler
            .parse("select name from cars where price > 10", DriverKind::Sqlite)
            .unwrap();
        assert!(is_select(&stmt));

        let compiled = SqlCompiler
            .compile(&stmt, &[Value::Int(1)], "", DriverKind::Sqlite)
            .unwrap();
        assert_eq!(compiled.sql, "SELECT name FROM cars WHERE price > 10");
        assert_eq!(compiled.params, vec![Value::Int(1)]);
    }

    #[test]
    fn test_insert_is_not_a_select() {
        let stmt = SqlCompiler
            .parse("insert into cars (name, price) values ('ford', 99)", DriverKind::Sqlite)
            .unwrap();
        assert!(!is_select(&stmt));
    }

    #[test]
    fn test_rejects_empty_and_multiple_statements() {
        match SqlCompiler.parse("   ", DriverKind::Sqlite) {
            Err(DbxError::Compile(msg)) => assert!(msg.contains("empty SQL query")),
            other => panic!("Expected Compile error, got {:?}", other),
        }
        match SqlCompiler.parse("select 1; select 2", DriverKind::Sqlite) {
            Err(DbxError::Compile(msg)) => assert!(msg.contains("exactly one")),
            other => panic!("Expected Compile error, got {:?}", other),
        }
    }

    #[test]
    fn test_syntax_errors_are_compile_errors() {
        assert!(matches!(
            SqlCompiler.parse("selec name form cars", DriverKind::Postgres),
            Err(DbxError::Compile(_))
        ));
    }
}
