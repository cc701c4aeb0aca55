/// Result Tables
///
/// Column, row and table holders for fully materialized result sets, plus the
/// materializer that drains a `Reader` into a `Table`.
use crate::core::db::reader::Reader;
use crate::core::value::{ColumnType, Value};
use crate::core::Result;
use crate::driver::Cursor;
use serde::Serialize;
use std::fmt;

/// A result column as reported by the driver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    /// Column name (or expression text when the engine reports no alias)
    pub name: String,
    /// Canonical type all values in this column are normalized to
    #[serde(rename = "type")]
    pub kind: ColumnType,
    /// Whether the column may hold NULL
    pub nullable: bool,
}

impl Column {
    /// Creates a null-capable column.
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Column {
            name: name.into(),
            kind,
            nullable: true,
        }
    }
}

/// One row of normalized values, aligned with its table's columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Row { values }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A fully materialized result set.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Table {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Self {
        Table {
            columns,
            rows: Vec::new(),
        }
    }

    /// Materializes a raw driver cursor.
    pub fn from_cursor(cursor: Box<dyn Cursor>) -> Result<Self> {
        to_table(Reader::new(cursor))
    }

    /// Position of the column called `name` (ASCII case-insensitive).
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Value at `row` in the column called `name`.
    pub fn value(&self, row: usize, name: &str) -> Option<&Value> {
        let index = self.column_index(name)?;
        self.rows.get(row)?.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Serializes the table as `{"columns": [...], "rows": [[...], ...]}`.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for Table {
    /// Renders a plain-text grid: header, underline, one line per row.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|r| r.values.iter().map(|v| v.to_string()).collect())
            .collect();

        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                cells
                    .iter()
                    .filter_map(|r| r.get(i))
                    .map(|s| s.chars().count())
                    .chain(std::iter::once(c.name.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let line = |values: Vec<&str>| -> String {
            values
                .iter()
                .zip(&widths)
                .map(|(v, w)| format!("{:<width$}", v, width = *w))
                .collect::<Vec<_>>()
                .join(" | ")
                .trim_end()
                .to_string()
        };

        writeln!(f, "{}", line(self.columns.iter().map(|c| c.name.as_str()).collect()))?;
        let underline: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        writeln!(f, "{}", underline.join("-|-"))?;
        for row in &cells {
            writeln!(f, "{}", line(row.iter().map(String::as_str).collect()))?;
        }
        Ok(())
    }
}

/// Drains every row of `reader` into a table.
pub fn to_table(reader: Reader) -> Result<Table> {
    materialize(reader, None).map(|(table, _)| table)
}

/// Reads at most `limit` rows. The flag reports whether more rows existed
/// beyond the limit; those rows are not read.
pub fn to_table_limit(reader: Reader, limit: usize) -> Result<(Table, bool)> {
    materialize(reader, Some(limit))
}

fn materialize(mut reader: Reader, limit: Option<usize>) -> Result<(Table, bool)> {
    let drained = drain(&mut reader, limit);
    let closed = reader.close();
    let drained = drained?;
    closed?;
    Ok(drained)
}

fn drain(reader: &mut Reader, limit: Option<usize>) -> Result<(Table, bool)> {
    let mut table = Table::new(reader.columns()?.to_vec());

    while limit.map_or(true, |l| table.rows.len() < l) {
        if !reader.next() {
            return finish(reader, table, false);
        }
        let values = reader.read()?.to_vec();
        table.rows.push(Row::new(values));
    }

    // Step once past the limit without scanning the row
    let more = reader.next();
    finish(reader, table, more)
}

fn finish(reader: &mut Reader, table: Table, more: bool) -> Result<(Table, bool)> {
    match reader.take_err() {
        Some(err) => Err(err),
        None => Ok((table, more)),
    }
}
