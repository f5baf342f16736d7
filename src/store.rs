//! Row-store boundary: the tabular backend is an external collaborator, so
//! the pipeline only sees this trait. [`MemoryRowStore`] backs the tests and
//! doubles as a reference implementation.

use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Mutex;

/// One row of the backing sheet: a stable index plus the raw column values.
#[derive(Debug, Clone, Default)]
pub struct SheetRow {
    pub row_index: u64,
    pub fields: BTreeMap<String, String>,
}

impl SheetRow {
    pub fn new(row_index: u64) -> Self {
        Self {
            row_index,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(column.into(), value.into());
        self
    }
}

#[derive(Debug)]
pub enum StoreError {
    NotFound { row_index: u64 },
    WriteFailed { row_index: u64, column: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound { row_index } => {
                write!(f, "row {row_index} does not exist in the store")
            }
            StoreError::WriteFailed { row_index, column } => {
                write!(f, "failed to write column {column:?} of row {row_index}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Read/write contract consumed by the pipeline.
pub trait RowStore: Send + Sync {
    fn read_rows(&self) -> BoxFuture<'_, Result<Vec<SheetRow>>>;

    fn write_cell<'a>(
        &'a self,
        row_index: u64,
        column: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<()>>;
}

/// In-memory row store with per-cell write-failure injection for tests.
#[derive(Debug, Default)]
pub struct MemoryRowStore {
    rows: Mutex<Vec<SheetRow>>,
    failing_cells: Mutex<BTreeSet<(u64, String)>>,
}

impl MemoryRowStore {
    pub fn new(rows: Vec<SheetRow>) -> Self {
        Self {
            rows: Mutex::new(rows),
            failing_cells: Mutex::new(BTreeSet::new()),
        }
    }

    /// Makes every subsequent write to the given cell fail with
    /// [`StoreError::WriteFailed`].
    pub fn fail_writes_to(&self, row_index: u64, column: impl Into<String>) {
        self.failing_cells
            .lock()
            .unwrap()
            .insert((row_index, column.into()));
    }

    pub fn cell(&self, row_index: u64, column: &str) -> Option<String> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.row_index == row_index)
            .and_then(|row| row.fields.get(column).cloned())
    }
}

impl RowStore for MemoryRowStore {
    fn read_rows(&self) -> BoxFuture<'_, Result<Vec<SheetRow>>> {
        Box::pin(async move { Ok(self.rows.lock().unwrap().clone()) })
    }

    fn write_cell<'a>(
        &'a self,
        row_index: u64,
        column: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self
                .failing_cells
                .lock()
                .unwrap()
                .contains(&(row_index, column.to_string()))
            {
                return Err(StoreError::WriteFailed {
                    row_index,
                    column: column.to_string(),
                }
                .into());
            }

            let mut rows = self.rows.lock().unwrap();
            let Some(row) = rows.iter_mut().find(|row| row.row_index == row_index) else {
                return Err(StoreError::NotFound { row_index }.into());
            };

            row.fields.insert(column.to_string(), value.to_string());
            Ok(())
        })
    }
}
