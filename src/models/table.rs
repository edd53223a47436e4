//! Table (schema) model

use serde::{Deserialize, Serialize};

use super::column::Column;

/// Ordered description of a resource's output rows
///
/// Column order is the output field order. A table is built once per resolution pass
/// and not modified while rows are streamed through it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn add_column(&mut self, column: Column) {
        self.columns.push(column);
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_at(&self, position: usize) -> Option<&Column> {
        self.columns.get(position)
    }

    /// Headers of the output rows, one per column, sentinels included
    pub fn output_headers(&self) -> Vec<String> {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, c)| c.header(i + 1))
            .collect()
    }

    /// Headers of the physical source, sentinel columns omitted
    pub fn source_headers(&self) -> Vec<String> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_sentinel())
            .map(|(i, c)| c.header(i + 1))
            .collect()
    }

    /// Declared widths for fixed-width sources, in source order
    ///
    /// Returns `None` unless every source column declares a width.
    pub fn source_widths(&self) -> Option<Vec<usize>> {
        self.columns
            .iter()
            .filter(|c| !c.is_sentinel())
            .map(|c| c.width)
            .collect()
    }
}
