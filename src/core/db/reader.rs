/// Streaming Result Reader
///
/// A forward-only, single-pass reader over a live driver cursor. Rows are
/// normalized on demand into buffers owned by the reader and reused for every
/// row, so a row returned by `read` is only valid until the reader is advanced
/// again. The borrow checker enforces this: `read` hands out a slice borrowed
/// from the reader.
use crate::core::db::table::Column;
use crate::core::value::{convert, Value};
use crate::core::{DbxError, Result};
use crate::driver::{Cursor, RawValue};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    /// Created, `next` not called yet
    Unopened,
    /// `next` has been called; `on_row` tells whether a row is current
    Iterating { on_row: bool },
    Closed,
}

/// Lazily normalizing reader over a driver cursor. Not for concurrent use.
pub struct Reader {
    cursor: Box<dyn Cursor>,
    columns: Option<Vec<Column>>,
    raw: Vec<RawValue>,
    values: Vec<Value>,
    state: ReaderState,
    error: Option<DbxError>,
}

impl Reader {
    pub fn new(cursor: Box<dyn Cursor>) -> Self {
        Reader {
            cursor,
            columns: None,
            raw: Vec::new(),
            values: Vec::new(),
            state: ReaderState::Unopened,
            error: None,
        }
    }

    /// Column metadata, resolved from the cursor on first access.
    pub fn columns(&mut self) -> Result<&[Column]> {
        if self.state == ReaderState::Closed {
            return Err(DbxError::Cursor("reader is closed".to_string()));
        }
        if self.columns.is_none() {
            self.columns = Some(self.cursor.columns()?);
        }
        Ok(self.columns.as_deref().unwrap_or_default())
    }

    /// Advances to the next row. Returns false when the cursor is exhausted or
    /// fails; in the latter case the error is available from `err`.
    pub fn next(&mut self) -> bool {
        if self.state == ReaderState::Closed || self.error.is_some() {
            return false;
        }
        let on_row = match self.cursor.advance() {
            Ok(on_row) => on_row,
            Err(err) => {
                self.error = Some(err);
                false
            }
        };
        self.state = ReaderState::Iterating { on_row };
        on_row
    }

    /// Normalizes and returns the current row.
    ///
    /// Only valid after `next` returned true. The returned values are
    /// overwritten by the following `read`.
    pub fn read(&mut self) -> Result<&[Value]> {
        if self.state != (ReaderState::Iterating { on_row: true }) {
            return Err(DbxError::Cursor(
                "read called without a current row; call next first".to_string(),
            ));
        }

        self.cursor.scan(&mut self.raw)?;
        self.columns()?;
        let columns = self.columns.as_deref().unwrap_or_default();

        if columns.len() != self.raw.len() {
            return Err(DbxError::Cursor(format!(
                "row has {} values but the result has {} columns",
                self.raw.len(),
                columns.len()
            )));
        }

        self.values.clear();
        for (raw, column) in self.raw.drain(..).zip(columns) {
            self.values.push(convert(raw, column)?);
        }
        Ok(&self.values)
    }

    /// The cursor error that ended iteration, if any.
    pub fn err(&self) -> Option<&DbxError> {
        self.error.as_ref()
    }

    /// Takes ownership of the cursor error that ended iteration, if any.
    pub fn take_err(&mut self) -> Option<DbxError> {
        self.error.take()
    }

    pub fn is_closed(&self) -> bool {
        self.state == ReaderState::Closed
    }

    /// Releases the cursor. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.state == ReaderState::Closed {
            return Ok(());
        }
        self.state = ReaderState::Closed;
        self.cursor.close()
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        if self.state != ReaderState::Closed {
            warn!("Reader dropped without being closed; releasing cursor");
            if let Err(e) = self.close() {
                warn!("Failed to release cursor: {}", e);
            }
        }
    }
}
