//! Dataset endpoint routes.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use dashmap::mapref::entry::Entry;
use geofold_engine::{
    Aggregate, AggregateId, Dataset, DatasetId, Feature, FieldDef, Geometry, Schema, Shape,
    Version,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::converter::UpdateSummary;
use crate::error::{AppError, Result};
use crate::projection::{table_name, ProjectionWriter};
use crate::sink::Column;
use crate::AppState;

/// Create dataset routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/datasets/{dataset_id}/snapshots", post(post_snapshot))
        .route("/datasets/{dataset_id}/aggregates", get(list_aggregates))
        .route(
            "/datasets/{dataset_id}/aggregates/{aggregate_id}",
            get(get_aggregate),
        )
        .route("/datasets/{dataset_id}/projections", post(create_projection))
}

/// A feature on the wire: hex-encoded EWKB plus a JSON attribute document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureBody {
    pub geometry: String,
    pub attributes: Value,
}

impl FeatureBody {
    pub fn encode(feature: &Feature<Shape, Value>) -> Self {
        Self {
            geometry: hex::encode(feature.geometry.to_wkb()),
            attributes: feature.attributes.clone(),
        }
    }

    pub fn decode(self) -> Result<Feature<Shape, Value>> {
        let bytes = hex::decode(&self.geometry)
            .map_err(|e| AppError::BadRequest(format!("geometry is not valid hex: {e}")))?;
        Ok(Feature::new(Shape::from_wkb(&bytes)?, self.attributes))
    }
}

/// Request body for a new full snapshot.
#[derive(Debug, Deserialize)]
pub struct SnapshotRequest {
    pub features: Vec<FeatureBody>,
}

/// Replayed state of one aggregate.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResponse {
    pub id: AggregateId,
    pub version: Version,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature: Option<FeatureBody>,
}

impl From<Aggregate<Feature<Shape, Value>>> for AggregateResponse {
    fn from(aggregate: Aggregate<Feature<Shape, Value>>) -> Self {
        Self {
            id: aggregate.id,
            version: aggregate.version,
            feature: aggregate.data.as_ref().map(FeatureBody::encode),
        }
    }
}

/// Request body for provisioning a projection.
#[derive(Debug, Deserialize)]
pub struct ProjectionRequest {
    pub fields: Vec<FieldDef>,
}

/// Response for a provisioned projection.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionResponse {
    pub table: String,
    pub columns: Vec<Column>,
}

/// POST /datasets/{dataset_id}/snapshots - Convert a full snapshot to events.
async fn post_snapshot(
    State(state): State<AppState>,
    Path(dataset_id): Path<DatasetId>,
    Json(request): Json<SnapshotRequest>,
) -> Result<Json<UpdateSummary>> {
    let features = request
        .features
        .into_iter()
        .map(FeatureBody::decode)
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(
        dataset_id = %dataset_id,
        features = features.len(),
        "Snapshot received"
    );

    let summary = state
        .converter
        .update_dataset(Dataset::new(dataset_id, features))
        .await?;
    Ok(Json(summary))
}

/// GET /datasets/{dataset_id}/aggregates - Current aggregates of a dataset.
async fn list_aggregates(
    State(state): State<AppState>,
    Path(dataset_id): Path<DatasetId>,
) -> Result<Json<Vec<AggregateResponse>>> {
    let aggregates = state.store.dataset_at_latest_version(dataset_id).await?;
    Ok(Json(aggregates.into_iter().map(Into::into).collect()))
}

/// GET /datasets/{dataset_id}/aggregates/{aggregate_id} - One replayed aggregate.
async fn get_aggregate(
    State(state): State<AppState>,
    Path((dataset_id, aggregate_id)): Path<(DatasetId, AggregateId)>,
) -> Result<Json<AggregateResponse>> {
    let aggregate = state
        .store
        .aggregate_at_latest_version(dataset_id, aggregate_id)
        .await?;
    if aggregate.version == 0 {
        return Err(AppError::NotFound(format!(
            "aggregate {aggregate_id} in dataset {dataset_id}"
        )));
    }
    Ok(Json(aggregate.into()))
}

/// POST /datasets/{dataset_id}/projections - Provision the dataset's projection.
async fn create_projection(
    State(state): State<AppState>,
    Path(dataset_id): Path<DatasetId>,
    Json(request): Json<ProjectionRequest>,
) -> Result<Json<ProjectionResponse>> {
    let schema = Schema::new(request.fields)?;
    let writer = Arc::new(ProjectionWriter::new(
        Arc::clone(&state.bus),
        Arc::clone(&state.sink),
        state.store.clone(),
        schema,
        |feature: Feature<Shape, Value>| feature,
    )?);

    // Reserve the slot before awaiting; a failed provisioning releases it.
    match state.projections.entry(dataset_id) {
        Entry::Occupied(_) => {
            return Err(AppError::BadRequest(format!(
                "dataset {dataset_id} is already projected"
            )))
        }
        Entry::Vacant(slot) => {
            slot.insert(None);
        }
    }

    let subscription_id = match writer.create_projection(dataset_id).await {
        Ok(id) => id,
        Err(e) => {
            state.projections.remove(&dataset_id);
            return Err(e);
        }
    };
    state.projections.insert(dataset_id, Some(subscription_id));

    Ok(Json(ProjectionResponse {
        table: table_name(dataset_id),
        columns: writer.columns(),
    }))
}
