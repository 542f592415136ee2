//! Tabular sinks for projections.
//!
//! A projection materializes the current state of a dataset into a table
//! with one row per live aggregate. Rows are keyed by their `AggregateId`
//! cell.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use geofold_engine::AggregateId;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Name of the key column every projection table carries.
pub const AGGREGATE_ID_COLUMN: &str = "AggregateId";
/// Name of the geometry column every projection table carries.
pub const GEOMETRY_COLUMN: &str = "Geometry";

/// Sink errors.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("unknown table {0}")]
    UnknownTable(String),

    #[error("table {0} already exists with different columns")]
    ColumnMismatch(String),

    #[error("unknown column {column} in table {table}")]
    UnknownColumn { table: String, column: String },

    #[error("row for table {0} has no AggregateId cell")]
    MissingKey(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Column type of a projection table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    String,
    Guid,
    Object,
    /// Geometry column carrying the geometry type name
    Geometry(String),
}

impl ColumnType {
    pub fn as_str(&self) -> &str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::String => "string",
            ColumnType::Guid => "guid",
            ColumnType::Object => "object",
            ColumnType::Geometry(name) => name,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Value held by one cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Guid(AggregateId),
    Bytes(Vec<u8>),
    Integer(i64),
    String(String),
    Object(serde_json::Value),
    Null,
}

/// One keyed value of a row.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub key: String,
    pub value: CellValue,
}

impl Cell {
    pub fn new(key: impl Into<String>, value: CellValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Find the aggregate id a row is keyed by.
pub fn row_key(table: &str, row: &[Cell]) -> Result<AggregateId, SinkError> {
    row.iter()
        .find_map(|cell| match (&cell.value, cell.key.as_str()) {
            (CellValue::Guid(id), AGGREGATE_ID_COLUMN) => Some(*id),
            _ => None,
        })
        .ok_or_else(|| SinkError::MissingKey(table.to_string()))
}

/// Destination table store for projections.
#[async_trait]
pub trait TabularSink: Send + Sync {
    /// Create a table. Creating an existing table with the same columns is
    /// a no-op.
    async fn create_table(&self, name: &str, columns: &[Column]) -> Result<(), SinkError>;

    /// Insert a row, or replace the row with the same aggregate id.
    async fn upsert(&self, name: &str, row: Vec<Cell>) -> Result<(), SinkError>;

    /// Remove the row of an aggregate. Removing a missing row is a no-op.
    async fn delete_row(&self, name: &str, aggregate_id: AggregateId) -> Result<(), SinkError>;
}

#[derive(Debug)]
struct Table {
    columns: Vec<Column>,
    rows: HashMap<AggregateId, Vec<Cell>>,
}

/// Sink holding tables in process memory.
#[derive(Debug, Default)]
pub struct InMemorySink {
    tables: RwLock<HashMap<String, Table>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Columns of a table, if it exists.
    pub async fn columns(&self, name: &str) -> Option<Vec<Column>> {
        self.tables.read().await.get(name).map(|t| t.columns.clone())
    }

    /// The row stored for an aggregate.
    pub async fn row(&self, name: &str, aggregate_id: AggregateId) -> Option<Vec<Cell>> {
        self.tables
            .read()
            .await
            .get(name)
            .and_then(|t| t.rows.get(&aggregate_id).cloned())
    }

    /// Number of rows in a table; zero for a missing table.
    pub async fn row_count(&self, name: &str) -> usize {
        self.tables
            .read()
            .await
            .get(name)
            .map_or(0, |t| t.rows.len())
    }
}

#[async_trait]
impl TabularSink for InMemorySink {
    async fn create_table(&self, name: &str, columns: &[Column]) -> Result<(), SinkError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.get(name) {
            if existing.columns != columns {
                return Err(SinkError::ColumnMismatch(name.to_string()));
            }
            return Ok(());
        }

        tables.insert(
            name.to_string(),
            Table {
                columns: columns.to_vec(),
                rows: HashMap::new(),
            },
        );
        tracing::info!(table = %name, columns = columns.len(), "Table created");
        Ok(())
    }

    async fn upsert(&self, name: &str, row: Vec<Cell>) -> Result<(), SinkError> {
        let mut tables = self.tables.write().await;
        let table = tables
            .get_mut(name)
            .ok_or_else(|| SinkError::UnknownTable(name.to_string()))?;

        if let Some(cell) = row
            .iter()
            .find(|cell| !table.columns.iter().any(|c| c.name == cell.key))
        {
            return Err(SinkError::UnknownColumn {
                table: name.to_string(),
                column: cell.key.clone(),
            });
        }

        let key = row_key(name, &row)?;
        table.rows.insert(key, row);
        Ok(())
    }

    async fn delete_row(&self, name: &str, aggregate_id: AggregateId) -> Result<(), SinkError> {
        let mut tables = self.tables.write().await;
        let table = tables
            .get_mut(name)
            .ok_or_else(|| SinkError::UnknownTable(name.to_string()))?;
        table.rows.remove(&aggregate_id);
        Ok(())
    }
}
