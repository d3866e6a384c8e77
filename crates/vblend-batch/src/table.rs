//! Reading argument tables.
//!
//! The first row names the columns; every following row becomes one
//! [`TableRow`]. Empty cells read as `None`. Rows with no values at all are
//! skipped, and so are columns without a header.

use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};
use indexmap::IndexMap;
use tracing::debug;

use crate::{BatchError, Result};

/// Column name to cell value, in column order.
pub type Row = IndexMap<String, Option<String>>;

/// One data row together with its line number in the source table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    /// 1-based line (or spreadsheet row) number; the header is line 1.
    pub line: usize,
    /// Cell values keyed by column name.
    pub values: Row,
}

impl TableRow {
    /// Value of `column`, if the column exists and the cell is not empty.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(|v| v.as_deref())
    }
}

/// A parsed table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    /// Column names in order.
    pub headers: Vec<String>,
    /// Data rows in order.
    pub rows: Vec<TableRow>,
}

impl Table {
    /// Build a table from a header row and raw cell rows.
    ///
    /// `first_line` is the line number of the first data row.
    pub fn from_cells<I>(headers: Vec<String>, cells: I, first_line: usize) -> Self
    where
        I: IntoIterator<Item = Vec<Option<String>>>,
    {
        let rows = cells
            .into_iter()
            .enumerate()
            .filter_map(|(idx, cells)| {
                let values: Row = headers
                    .iter()
                    .zip(cells.into_iter().chain(std::iter::repeat(None)))
                    .filter(|(header, _)| !header.is_empty())
                    .map(|(header, value)| (header.clone(), value))
                    .collect();
                values.values().any(Option::is_some).then_some(TableRow {
                    line: first_line + idx,
                    values,
                })
            })
            .collect();

        Self { headers, rows }
    }

    /// Number of data rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no data rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableFormat {
    Csv,
    Tsv,
    Spreadsheet,
}

impl TableFormat {
    fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("csv") => Ok(Self::Csv),
            Some("tsv") | Some("tab") => Ok(Self::Tsv),
            Some("xlsx") | Some("xlsm") | Some("xlsb") | Some("xls") | Some("ods") => {
                Ok(Self::Spreadsheet)
            }
            _ => Err(BatchError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// Read a table, picking the parser from the file extension.
pub fn read_table(path: impl AsRef<Path>) -> Result<Table> {
    let path = path.as_ref();
    let table = match TableFormat::from_path(path)? {
        TableFormat::Csv => read_delimited(path, b',')?,
        TableFormat::Tsv => read_delimited(path, b'\t')?,
        TableFormat::Spreadsheet => read_spreadsheet(path)?,
    };
    debug!("Read {} rows from {:?}", table.len(), path);
    Ok(table)
}

fn table_error(path: &Path) -> impl Fn(String) -> BatchError + '_ {
    move |reason| BatchError::TableRead {
        path: PathBuf::from(path),
        reason,
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn read_delimited(path: &Path, delimiter: u8) -> Result<Table> {
    let error = table_error(path);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .quoting(delimiter != b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| error(e.to_string()))?;

    let mut records = reader.records();
    let headers: Vec<String> = match records.next() {
        Some(record) => record
            .map_err(|e| error(e.to_string()))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect(),
        None => return Err(BatchError::MissingHeader(path.to_path_buf())),
    };

    let cells = records
        .map(|record| {
            record
                .map(|r| r.iter().map(non_empty).collect::<Vec<_>>())
                .map_err(|e| error(e.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Table::from_cells(headers, cells, 2))
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) => non_empty(s),
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => Some(f.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        other => non_empty(&other.to_string()),
    }
}

fn read_spreadsheet(path: &Path) -> Result<Table> {
    let error = table_error(path);
    let mut workbook = open_workbook_auto(path).map_err(|e| error(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| error("workbook has no worksheets".to_string()))?
        .map_err(|e| error(e.to_string()))?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(cells) => cells
            .iter()
            .map(|c| cell_text(c).unwrap_or_default())
            .collect(),
        None => return Err(BatchError::MissingHeader(path.to_path_buf())),
    };

    // Ranges start at the first used cell, not necessarily row 1.
    let first_line = range.start().map_or(1, |(row, _)| row as usize + 1) + 1;
    let cells = rows.map(|cells| cells.iter().map(cell_text).collect::<Vec<_>>());

    Ok(Table::from_cells(headers, cells, first_line))
}
