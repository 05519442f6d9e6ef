//! Tabular data model and the data-engine boundary
//!
//! The cache and the hybrid searcher only talk to tables through
//! [`TableEngine`]. [`MemoryEngine`] is the in-process implementation.

pub mod codec;

use crate::error::{Result, RetraceError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

/// Logical column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Boolean,
    Json,
    /// GeoJSON geometry object
    Geometry,
    /// Array of floats
    Embedding,
}

/// Named, typed column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Ordered columns plus row-major values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl RecordSet {
    /// Create an empty record set with the given columns
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Create a record set, checking every row against the column count
    pub fn with_rows(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut records = Self::new(columns);
        for row in rows {
            records.push_row(row)?;
        }
        Ok(records)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(RetraceError::Table(format!(
                "Row has {} values but the table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Append a column, one value per existing row
    pub fn add_column(&mut self, column: Column, values: Vec<Value>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(RetraceError::Table(format!(
                "Column {} has {} values but the table has {} rows",
                column.name,
                values.len(),
                self.rows.len()
            )));
        }
        if self.column_index(&column.name).is_some() {
            return Err(RetraceError::Table(format!(
                "Column {} already exists",
                column.name
            )));
        }
        self.columns.push(column);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Values of one column, in row order
    pub fn column_values(&self, name: &str) -> Option<impl Iterator<Item = &Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    pub fn has_geometry(&self) -> bool {
        self.columns.iter().any(|c| c.ty == ColumnType::Geometry)
    }
}

/// Key used to match ids across adapters and the source table.
///
/// Strings are used verbatim; any other JSON value uses its compact form.
pub fn id_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Boundary to the engine that owns tabular and geospatial data
pub trait TableEngine: Send + Sync {
    fn has_table(&self, name: &str) -> bool;

    /// Columns of a table, in order
    fn column_types(&self, name: &str) -> Result<Vec<Column>>;

    /// Snapshot of a table
    fn table(&self, name: &str) -> Result<RecordSet>;

    /// Create or replace a table
    fn put_table(&self, name: &str, records: RecordSet) -> Result<()>;

    fn drop_table(&self, name: &str) -> Result<()>;

    /// Write a table to `path` in the tabular payload format
    fn store_tabular(&self, name: &str, path: &Path) -> Result<()> {
        codec::write_tabular(&self.table(name)?, path)
    }

    /// Write a table to `path` as GeoJSON
    fn store_geospatial(&self, name: &str, path: &Path) -> Result<()> {
        codec::write_geospatial(&self.table(name)?, path)
    }

    /// Replace table `name` with the tabular payload at `path`
    fn load_tabular(&self, name: &str, path: &Path) -> Result<()> {
        self.put_table(name, codec::read_tabular(path)?)
    }

    /// Replace table `name` with the GeoJSON payload at `path`
    fn load_geospatial(&self, name: &str, path: &Path) -> Result<()> {
        self.put_table(name, codec::read_geospatial(path)?)
    }
}

/// In-process table engine
#[derive(Debug, Default)]
pub struct MemoryEngine {
    tables: RwLock<HashMap<String, RecordSet>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all tables, sorted
    pub fn table_names(&self) -> Result<Vec<String>> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

fn poisoned() -> RetraceError {
    RetraceError::Table("Table lock poisoned".to_string())
}

impl TableEngine for MemoryEngine {
    fn has_table(&self, name: &str) -> bool {
        self.tables
            .read()
            .map(|tables| tables.contains_key(name))
            .unwrap_or(false)
    }

    fn column_types(&self, name: &str) -> Result<Vec<Column>> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        tables
            .get(name)
            .map(|t| t.columns().to_vec())
            .ok_or_else(|| RetraceError::TableNotFound {
                name: name.to_string(),
            })
    }

    fn table(&self, name: &str) -> Result<RecordSet> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        tables
            .get(name)
            .cloned()
            .ok_or_else(|| RetraceError::TableNotFound {
                name: name.to_string(),
            })
    }

    fn put_table(&self, name: &str, records: RecordSet) -> Result<()> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        tables.insert(name.to_string(), records);
        Ok(())
    }

    fn drop_table(&self, name: &str) -> Result<()> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        tables.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn people() -> RecordSet {
        RecordSet::with_rows(
            vec![
                Column::new("id", ColumnType::Integer),
                Column::new("name", ColumnType::Text),
            ],
            vec![vec![json!(1), json!("ada")], vec![json!(2), json!("grace")]],
        )
        .unwrap()
    }

    #[test]
    fn test_row_width_checked() {
        let mut records = people();
        assert!(records.push_row(vec![json!(3)]).is_err());
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_add_column() {
        let mut records = people();
        records
            .add_column(Column::new("age", ColumnType::Integer), vec![json!(36), json!(85)])
            .unwrap();

        assert_eq!(records.columns().len(), 3);
        assert_eq!(records.rows()[1][2], json!(85));

        let duplicate = records.add_column(
            Column::new("age", ColumnType::Integer),
            vec![json!(0), json!(0)],
        );
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_id_key() {
        assert_eq!(id_key(&json!("doc-1")), "doc-1");
        assert_eq!(id_key(&json!(42)), "42");
    }

    #[test]
    fn test_memory_engine() {
        let engine = MemoryEngine::new();
        assert!(!engine.has_table("people"));
        assert!(matches!(
            engine.table("people"),
            Err(RetraceError::TableNotFound { .. })
        ));

        engine.put_table("people", people()).unwrap();
        assert!(engine.has_table("people"));
        assert_eq!(engine.column_types("people").unwrap()[1].name, "name");
        assert_eq!(engine.table_names().unwrap(), vec!["people".to_string()]);

        engine.drop_table("people").unwrap();
        assert!(!engine.has_table("people"));
    }
}
