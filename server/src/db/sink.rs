//! Projection tables in PostgreSQL.
//!
//! Each projection is a plain table named after its dataset id. Identifiers
//! are always double-quoted since dataset ids are not valid bare names.

use async_trait::async_trait;
use geofold_engine::AggregateId;
use sqlx::PgPool;

use crate::sink::{
    row_key, Cell, CellValue, Column, ColumnType, SinkError, TabularSink, AGGREGATE_ID_COLUMN,
};

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type(column: &Column) -> &'static str {
    match column.column_type {
        ColumnType::Integer => "BIGINT",
        ColumnType::String => "TEXT",
        ColumnType::Guid => "UUID",
        ColumnType::Object => "JSONB",
        // EWKB bytes; PostGIS can read them with ST_GeomFromEWKB
        ColumnType::Geometry(_) => "BYTEA",
    }
}

/// Build the CREATE TABLE statement for a projection.
pub fn create_table_sql(name: &str, columns: &[Column]) -> String {
    let definitions: Vec<String> = columns
        .iter()
        .map(|column| {
            let mut definition = format!("{} {}", quote_ident(&column.name), sql_type(column));
            if column.name == AGGREGATE_ID_COLUMN {
                definition.push_str(" PRIMARY KEY");
            }
            definition
        })
        .collect();

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(name),
        definitions.join(", ")
    )
}

/// Build the upsert statement for a row.
///
/// Null cells are written as literal NULLs so they take the column's type;
/// every other cell gets a positional parameter, in row order.
pub fn upsert_sql(name: &str, row: &[Cell]) -> String {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());
    let mut updates = Vec::new();
    let mut param = 0;

    for cell in row {
        let column = quote_ident(&cell.key);
        if cell.value == CellValue::Null {
            values.push("NULL".to_string());
        } else {
            param += 1;
            values.push(format!("${param}"));
        }
        if cell.key != AGGREGATE_ID_COLUMN {
            updates.push(format!("{column} = EXCLUDED.{column}"));
        }
        columns.push(column);
    }

    let conflict = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
        quote_ident(name),
        columns.join(", "),
        values.join(", "),
        quote_ident(AGGREGATE_ID_COLUMN),
        conflict
    )
}

/// Tabular sink writing projection tables to PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgTableSink {
    pool: PgPool,
}

impl PgTableSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TabularSink for PgTableSink {
    async fn create_table(&self, name: &str, columns: &[Column]) -> Result<(), SinkError> {
        sqlx::query(&create_table_sql(name, columns))
            .execute(&self.pool)
            .await?;
        tracing::info!(table = %name, columns = columns.len(), "Projection table ready");
        Ok(())
    }

    async fn upsert(&self, name: &str, row: Vec<Cell>) -> Result<(), SinkError> {
        row_key(name, &row)?;
        let sql = upsert_sql(name, &row);

        let mut query = sqlx::query(&sql);
        for cell in row {
            query = match cell.value {
                CellValue::Guid(id) => query.bind(id),
                CellValue::Bytes(bytes) => query.bind(bytes),
                CellValue::Integer(n) => query.bind(n),
                CellValue::String(s) => query.bind(s),
                CellValue::Object(value) => query.bind(value),
                CellValue::Null => query,
            };
        }
        query.execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_row(&self, name: &str, aggregate_id: AggregateId) -> Result<(), SinkError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1",
            quote_ident(name),
            quote_ident(AGGREGATE_ID_COLUMN)
        );
        sqlx::query(&sql)
            .bind(aggregate_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::GEOMETRY_COLUMN;
    use uuid::Uuid;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("name"), "\"name\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_create_table_sql() {
        let columns = vec![
            Column::new(AGGREGATE_ID_COLUMN, ColumnType::Guid),
            Column::new(GEOMETRY_COLUMN, ColumnType::Geometry("linestring".into())),
            Column::new("lanes", ColumnType::Integer),
            Column::new("tags", ColumnType::Object),
        ];
        let sql = create_table_sql("5f0e", &columns);
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"5f0e\" (\"AggregateId\" UUID PRIMARY KEY, \
             \"Geometry\" BYTEA, \"lanes\" BIGINT, \"tags\" JSONB)"
        );
    }

    #[test]
    fn test_upsert_sql_skips_params_for_nulls() {
        let row = vec![
            Cell::new(AGGREGATE_ID_COLUMN, CellValue::Guid(Uuid::nil())),
            Cell::new("name", CellValue::Null),
            Cell::new("lanes", CellValue::Integer(2)),
        ];
        assert_eq!(
            upsert_sql("t", &row),
            "INSERT INTO \"t\" (\"AggregateId\", \"name\", \"lanes\") VALUES ($1, NULL, $2) \
             ON CONFLICT (\"AggregateId\") DO UPDATE SET \"name\" = EXCLUDED.\"name\", \
             \"lanes\" = EXCLUDED.\"lanes\""
        );
    }

    #[test]
    fn test_key_only_row_does_nothing_on_conflict() {
        let row = vec![Cell::new(AGGREGATE_ID_COLUMN, CellValue::Guid(Uuid::nil()))];
        assert!(upsert_sql("t", &row).ends_with("ON CONFLICT (\"AggregateId\") DO NOTHING"));
    }
}
