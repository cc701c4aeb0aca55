// Core infrastructure modules
pub mod core;

// Driver substrate and query compilation
pub mod compiler;
pub mod driver;

// Configuration
pub mod config;

#[cfg(test)]
mod test_utils;

pub use crate::core::db::{Column, Db, Executor, Reader, Row, Stmt, Table, TransactionManager};
pub use crate::core::value::{ColumnType, Value};
pub use crate::core::{DbxError, Result};
pub use crate::driver::{DriverKind, ExecResult};
