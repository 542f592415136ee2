//! Event storage in the events table.

use async_trait::async_trait;
use geofold_engine::{AggregateId, DatasetId, Event, FeatureDiff, Operation};
use sqlx::{PgPool, Row};

use crate::storage::{EventStorage, StorageError};

/// Postgres unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

/// A stored event row from the database.
#[derive(Debug)]
pub struct StoredEvent {
    pub aggregate_id: AggregateId,
    pub version: i64,
    pub operation: String,
    pub payload: Vec<u8>,
    pub timestamp: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredEvent {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEvent {
            aggregate_id: row.try_get("aggregate_id")?,
            version: row.try_get("version")?,
            operation: row.try_get("operation")?,
            payload: row.try_get("payload")?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}

impl StoredEvent {
    /// Convert database row to an engine event.
    pub fn to_event(&self) -> Result<Event, StorageError> {
        let operation: Operation = self
            .operation
            .parse()
            .map_err(|e| StorageError::Corrupt(format!("{e}")))?;
        let payload = FeatureDiff::from_bytes(&self.payload).map_err(|e| {
            StorageError::Corrupt(format!(
                "payload of aggregate {} version {}: {e}",
                self.aggregate_id, self.version
            ))
        })?;

        Ok(Event::new(
            self.aggregate_id,
            self.version as u64,
            operation,
            payload,
            self.timestamp as u64,
        ))
    }
}

/// Event storage backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgEventStorage {
    pool: PgPool,
}

impl PgEventStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStorage for PgEventStorage {
    async fn list_aggregate_ids(
        &self,
        dataset_id: DatasetId,
    ) -> Result<Vec<AggregateId>, StorageError> {
        let rows: Vec<(AggregateId,)> = sqlx::query_as(
            r#"
            SELECT aggregate_id
            FROM events
            WHERE dataset_id = $1
            GROUP BY aggregate_id
            ORDER BY MIN(id) ASC
            "#,
        )
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn list_events(
        &self,
        dataset_id: DatasetId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<Event>, StorageError> {
        let rows = sqlx::query_as::<_, StoredEvent>(
            r#"
            SELECT aggregate_id, version, operation, payload, timestamp
            FROM events
            WHERE dataset_id = $1 AND aggregate_id = $2
            ORDER BY version ASC
            "#,
        )
        .bind(dataset_id)
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(StoredEvent::to_event).collect()
    }

    async fn append_event(&self, dataset_id: DatasetId, event: Event) -> Result<(), StorageError> {
        let conflict = || StorageError::VersionConflict {
            aggregate_id: event.aggregate_id,
            version: event.version,
        };
        let payload = event
            .payload
            .to_bytes()
            .map_err(|e| StorageError::Encoding(e.to_string()))?;

        // Inserts only when the version directly follows the stored maximum.
        let result = sqlx::query(
            r#"
            INSERT INTO events (dataset_id, aggregate_id, version, operation, payload, timestamp)
            SELECT $1, $2, $3, $4, $5, $6
            WHERE (
                SELECT COALESCE(MAX(version), 0)
                FROM events
                WHERE dataset_id = $1 AND aggregate_id = $2
            ) = $3 - 1
            "#,
        )
        .bind(dataset_id)
        .bind(event.aggregate_id)
        .bind(event.version as i64)
        .bind(event.operation.as_str())
        .bind(payload)
        .bind(event.timestamp as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                conflict()
            }
            _ => StorageError::Database(e),
        })?;

        if result.rows_affected() == 0 {
            return Err(conflict());
        }

        tracing::debug!(
            dataset_id = %dataset_id,
            aggregate_id = %event.aggregate_id,
            version = event.version,
            "Event stored"
        );
        Ok(())
    }
}
