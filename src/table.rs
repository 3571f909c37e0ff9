use std::path::PathBuf;

use crate::domain::DVError;

pub type Row = Vec<String>;

/// A fully loaded file: header row plus data rows.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Table {
    path: PathBuf,
    header: Row,
    rows: Vec<Row>,
}

impl Table {
    pub fn new(path: PathBuf, header: Row, rows: Vec<Row>) -> Self {
        Self { path, header, rows }
    }

    /// Build a table from header-first rows. Mostly useful in tests.
    pub fn from_rows(mut rows: Vec<Row>) -> Self {
        if rows.is_empty() {
            return Self::default();
        }
        let header = rows.remove(0);
        Self {
            path: PathBuf::new(),
            header,
            rows,
        }
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("???")
            .to_string()
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn column_count(&self) -> usize {
        self.header.len()
    }

    /// Number of data rows, header excluded.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, idx: usize) -> Option<&Row> {
        self.rows.get(idx)
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Cell value with missing trailing fields read as empty.
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Consumer side accumulator for one ingestion attempt.
///
/// Rows are only ever appended. Nothing is visible to the rest of the
/// application until `finish` hands out the complete table.
#[derive(Debug, Default)]
pub struct TableBuilder {
    path: PathBuf,
    header: Option<Row>,
    rows: Vec<Row>,
}

impl TableBuilder {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            header: None,
            rows: Vec::new(),
        }
    }

    pub fn set_header(&mut self, header: Row) {
        self.header = Some(header);
    }

    pub fn append(&mut self, mut batch: Vec<Row>) {
        self.rows.append(&mut batch);
    }

    pub fn rows_received(&self) -> usize {
        self.rows.len()
    }

    pub fn finish(self) -> Result<Table, DVError> {
        match self.header {
            Some(header) => Ok(Table::new(self.path, header, self.rows)),
            None => Err(DVError::EmptyOrHeaderless),
        }
    }
}
