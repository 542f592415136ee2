//! Projection writer.
//!
//! Keeps one table per dataset in step with the event log. The table is
//! named after the dataset id and holds one row per live aggregate:
//! `AggregateId`, `Geometry` (little-endian EWKB) and one column per schema
//! field. Rows are rebuilt from the replayed aggregate, not from the event
//! payload.

use std::sync::Arc;

use futures::future::BoxFuture;
use geofold_engine::{
    AggregateId, DatasetId, Event, Feature, FieldType, Geometry, Operation, Schema,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::bus::{MessageBus, SubscriptionId};
use crate::error::Result;
use crate::sink::{
    Cell, CellValue, Column, ColumnType, TabularSink, AGGREGATE_ID_COLUMN, GEOMETRY_COLUMN,
};
use crate::store_api::EventStoreApi;

type Transform<G, A, OG, OA> = Arc<dyn Fn(Feature<G, A>) -> Feature<OG, OA> + Send + Sync>;
type Filter<OG, OA> = Arc<dyn Fn(&Feature<OG, OA>) -> BoxFuture<'static, bool> + Send + Sync>;

/// Name of the table projecting a dataset.
pub fn table_name(dataset_id: DatasetId) -> String {
    dataset_id.to_string()
}

/// Writes a dataset's live aggregates to a [`TabularSink`].
pub struct ProjectionWriter<G, A, OG, OA> {
    bus: Arc<MessageBus>,
    sink: Arc<dyn TabularSink>,
    store: EventStoreApi<G, A>,
    schema: Schema,
    transform: Transform<G, A, OG, OA>,
    filter: Option<Filter<OG, OA>>,
}

impl<G, A, OG, OA> ProjectionWriter<G, A, OG, OA>
where
    G: Geometry,
    A: Serialize + DeserializeOwned + Send + Sync + 'static,
    OG: Geometry,
    OA: Serialize + Send + Sync + 'static,
{
    /// Create a writer projecting transformed features with `schema`.
    ///
    /// Schema fields may not reuse the `AggregateId` or `Geometry` column
    /// names.
    pub fn new(
        bus: Arc<MessageBus>,
        sink: Arc<dyn TabularSink>,
        store: EventStoreApi<G, A>,
        schema: Schema,
        transform: impl Fn(Feature<G, A>) -> Feature<OG, OA> + Send + Sync + 'static,
    ) -> Result<Self> {
        if let Some(field) = schema
            .fields
            .iter()
            .find(|f| f.name == AGGREGATE_ID_COLUMN || f.name == GEOMETRY_COLUMN)
        {
            return Err(geofold_engine::Error::InvalidArgument(format!(
                "field '{}' clashes with a reserved projection column",
                field.name
            ))
            .into());
        }

        Ok(Self {
            bus,
            sink,
            store,
            schema,
            transform: Arc::new(transform),
            filter: None,
        })
    }

    /// Builder-style method to skip features the filter rejects.
    ///
    /// A rejected feature leaves its row untouched.
    pub fn with_filter(
        mut self,
        filter: impl Fn(&Feature<OG, OA>) -> BoxFuture<'static, bool> + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Columns of the projection table, in row order.
    pub fn columns(&self) -> Vec<Column> {
        let mut columns = vec![
            Column::new(AGGREGATE_ID_COLUMN, ColumnType::Guid),
            Column::new(GEOMETRY_COLUMN, ColumnType::Geometry(OG::type_name().to_string())),
        ];
        columns.extend(self.schema.fields.iter().map(|field| {
            let column_type = match field.field_type {
                FieldType::Integer => ColumnType::Integer,
                FieldType::String => ColumnType::String,
                FieldType::Object => ColumnType::Object,
            };
            Column::new(field.name.clone(), column_type)
        }));
        columns
    }

    /// Create the dataset's table and keep it updated from the bus.
    pub async fn create_projection(
        self: &Arc<Self>,
        dataset_id: DatasetId,
    ) -> Result<SubscriptionId> {
        let table = table_name(dataset_id);
        self.sink.create_table(&table, &self.columns()).await?;

        let writer = Arc::clone(self);
        let subscription_id = self.bus.subscribe(dataset_id, move |event: Event| {
            let writer = Arc::clone(&writer);
            async move { writer.update(dataset_id, &event).await }
        });

        tracing::info!(
            dataset_id = %dataset_id,
            table = %table,
            fields = self.schema.fields.len(),
            "Projection created"
        );

        Ok(subscription_id)
    }

    /// Apply one event to the dataset's table.
    pub async fn update(&self, dataset_id: DatasetId, event: &Event) -> Result<()> {
        let table = table_name(dataset_id);
        match event.operation {
            Operation::NoOp => Err(geofold_engine::Error::UnsupportedOperation(format!(
                "cannot project noop event for aggregate {}",
                event.aggregate_id
            ))
            .into()),
            Operation::Delete => {
                self.sink.delete_row(&table, event.aggregate_id).await?;
                tracing::debug!(
                    dataset_id = %dataset_id,
                    aggregate_id = %event.aggregate_id,
                    "Projection row deleted"
                );
                Ok(())
            }
            Operation::Create | Operation::Modify => {
                let aggregate = self
                    .store
                    .aggregate_at_latest_version(dataset_id, event.aggregate_id)
                    .await?;

                let Some(feature) = aggregate.data else {
                    self.sink.delete_row(&table, aggregate.id).await?;
                    return Ok(());
                };

                let projected = (self.transform)(feature);
                if let Some(filter) = &self.filter {
                    if !filter(&projected).await {
                        tracing::debug!(
                            dataset_id = %dataset_id,
                            aggregate_id = %aggregate.id,
                            "Projection filter rejected feature"
                        );
                        return Ok(());
                    }
                }

                let row = self.row(aggregate.id, &projected)?;
                self.sink.upsert(&table, row).await?;
                tracing::debug!(
                    dataset_id = %dataset_id,
                    aggregate_id = %aggregate.id,
                    version = aggregate.version,
                    "Projection row written"
                );
                Ok(())
            }
        }
    }

    /// Build the row for a projected feature.
    pub fn row(&self, aggregate_id: AggregateId, feature: &Feature<OG, OA>) -> Result<Vec<Cell>> {
        let mut row = vec![
            Cell::new(AGGREGATE_ID_COLUMN, CellValue::Guid(aggregate_id)),
            Cell::new(GEOMETRY_COLUMN, CellValue::Bytes(feature.geometry.to_wkb())),
        ];
        for (field, value) in self.schema.read(&feature.attributes)? {
            let value = cell_value(&field.name, field.field_type, value)?;
            row.push(Cell::new(field.name.clone(), value));
        }
        Ok(row)
    }
}

fn cell_value(name: &str, field_type: FieldType, value: Value) -> Result<CellValue> {
    Ok(match (field_type, value) {
        (_, Value::Null) => CellValue::Null,
        (FieldType::Integer, value) => CellValue::Integer(value.as_i64().ok_or_else(|| {
            geofold_engine::Error::TypeMismatch {
                field: name.to_string(),
                expected: "64-bit signed integer".into(),
                got: value.to_string(),
            }
        })?),
        (FieldType::String, Value::String(s)) => CellValue::String(s),
        (FieldType::String, other) => CellValue::String(other.to_string()),
        (FieldType::Object, value) => CellValue::Object(value),
    })
}
