/// DBX Error Module
///
/// This module defines the error taxonomy for the access layer. Transaction
/// misuse, cardinality violations and value conversion failures get their own
/// variants; driver and compiler errors pass through unchanged.
use thiserror::Error;

/// Error type shared by every operation in the crate.
#[derive(Error, Debug)]
pub enum DbxError {
    /// A write was attempted on a handle opened in read-only mode
    #[error("Error 1299. Can't write changes in Read-Only mode")]
    ReadOnly,

    /// Commit was requested but there is no engine transaction to commit
    #[error("No transaction open")]
    NoTransactionOpen,

    /// Begin was requested while the nesting counter still expects a
    /// transaction that a rollback has already closed
    #[error("Previous transaction still open")]
    PreviousTransactionStillOpen,

    /// A driver value could not be coerced to its column's declared type
    #[error("Error converting {column}: {reason}")]
    Conversion { column: String, reason: String },

    /// A single-row query returned more than one row
    #[error("The query returned {count}{} results", or_more(.more))]
    UnexpectedRowCount { count: usize, more: bool },

    /// A single-value query returned a row whose width is not one
    #[error("The query returned {0} values")]
    UnexpectedColumnCount(usize),

    /// Errors raised by the bundled SQLite driver
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Errors raised by other driver implementations
    #[error("Driver error: {0}")]
    Driver(String),

    /// Query parsing and rendering errors
    #[error("Compile error: {0}")]
    Compile(String),

    /// Internal consistency errors in the transaction state
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Reader used outside its valid state sequence
    #[error("Cursor error: {0}")]
    Cursor(String),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON export errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DbxError {
    /// Builds a conversion error for the named column.
    pub fn conversion(column: &str, reason: impl Into<String>) -> Self {
        DbxError::Conversion {
            column: column.to_string(),
            reason: reason.into(),
        }
    }
}

fn or_more(more: &bool) -> &'static str {
    if *more {
        " or more"
    } else {
        ""
    }
}

/// Type alias for Result to use DbxError as the error type.
pub type Result<T> = std::result::Result<T, DbxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let db_err = DbxError::Database(rusqlite::Error::ExecuteReturnedResults);
        assert!(db_err.to_string().contains("Database error"));

        assert!(DbxError::ReadOnly.to_string().contains("Read-Only"));
        assert_eq!(DbxError::NoTransactionOpen.to_string(), "No transaction open");

        let conv = DbxError::conversion("price", "invalid digit");
        assert_eq!(conv.to_string(), "Error converting price: invalid digit");
    }

    #[test]
    fn test_row_count_display() {
        let exact = DbxError::UnexpectedRowCount { count: 3, more: false };
        assert_eq!(exact.to_string(), "The query returned 3 results");

        let open_ended = DbxError::UnexpectedRowCount { count: 2, more: true };
        assert_eq!(open_ended.to_string(), "The query returned 2 or more results");

        assert_eq!(
            DbxError::UnexpectedColumnCount(2).to_string(),
            "The query returned 2 values"
        );
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let dbx_err: DbxError = io_err.into();
        match dbx_err {
            DbxError::Io(_) => {}
            _ => panic!("Expected IO error"),
        }

        let json_err: std::result::Result<serde_json::Value, serde_json::Error> =
            serde_json::from_str("{ invalid json }");
        let dbx_err: DbxError = json_err.unwrap_err().into();
        match dbx_err {
            DbxError::Json(_) => {}
            _ => panic!("Expected JSON error"),
        }
    }
}
