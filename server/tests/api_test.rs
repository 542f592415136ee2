//! Integration tests for the HTTP surface.
//!
//! The router runs over the in-memory storage and sink, so no database is
//! needed. The PostgreSQL adapters are exercised against a live server only.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use geofold_engine::{Feature, LineString, Point, Shape};
use geofold_server::config::Config;
use geofold_server::routes::FeatureBody;
use geofold_server::sink::{CellValue, InMemorySink};
use geofold_server::storage::InMemoryEventStorage;
use geofold_server::AppState;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_url: "postgres://unused".to_string(),
        identity_field: "id".to_string(),
        max_connections: 1,
    }
}

fn test_state() -> (AppState, Arc<InMemorySink>) {
    let sink = Arc::new(InMemorySink::new());
    let state = AppState::new(
        test_config(),
        Arc::new(InMemoryEventStorage::new()),
        sink.clone(),
    );
    (state, sink)
}

fn test_app() -> (Router, Arc<InMemorySink>) {
    let (state, sink) = test_state();
    (geofold_server::app(state), sink)
}

fn projection_fields() -> Value {
    json!({"fields": [
        {"name": "id", "fieldType": "integer"},
        {"name": "name", "fieldType": "string"},
    ]})
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let body = match body {
        Some(value) => Body::from(value.to_string()),
        None => Body::empty(),
    };
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn road(id: i64, name: &str, coords: &[(f64, f64)]) -> Value {
    let feature = Feature::new(
        Shape::from(LineString::new(coords.iter().copied()).with_srid(4326)),
        json!({"id": id, "name": name}),
    );
    serde_json::to_value(FeatureBody::encode(&feature)).unwrap()
}

fn version_one() -> Value {
    json!({"features": [
        road(1, "Ring road", &[(0.0, 0.0), (1.0, 0.0)]),
        road(2, "Harbour street", &[(0.0, 1.0), (1.0, 1.0), (2.0, 1.0)]),
        road(3, "Mill lane", &[(0.0, 2.0), (1.0, 2.0)]),
        road(4, "Old bridge", &[(0.0, 3.0), (1.0, 3.0)]),
        road(5, "Station road", &[(0.0, 4.0), (1.0, 4.0)]),
        road(6, "Quarry track", &[(0.0, 5.0), (1.0, 5.0)]),
    ]})
}

fn version_two() -> Value {
    json!({"features": [
        road(1, "Ring road", &[(0.0, 0.0), (1.0, 0.0)]),
        road(2, "Harbour street", &[(0.0, 1.0), (1.5, 1.2), (2.0, 1.0)]),
        road(3, "Mill lane", &[(0.0, 2.0), (1.0, 2.0)]),
        road(5, "Station avenue", &[(0.0, 4.0), (1.0, 4.0)]),
        road(7, "New bridge", &[(0.0, 3.0), (1.0, 3.5)]),
        road(8, "Quarry track", &[(0.0, 5.0), (1.0, 5.0)]),
    ]})
}

#[cfg(test)]
mod api_tests {
    use super::*;

    #[tokio::test]
    async fn test_health() {
        let (app, _) = test_app();
        let (status, body) = send(&app, Method::GET, "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["identityField"], "id");
        assert_eq!(body["projections"], 0);
    }

    #[tokio::test]
    async fn test_snapshot_sequence() {
        let (app, _) = test_app();
        let dataset = Uuid::new_v4();
        let uri = format!("/datasets/{dataset}/snapshots");

        let (status, first) = send(&app, Method::POST, &uri, Some(version_one())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["created"], 6);
        assert_eq!(first["datasetId"], dataset.to_string());

        let (status, second) = send(&app, Method::POST, &uri, Some(version_two())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["created"], 2);
        assert_eq!(second["modified"], 2);
        assert_eq!(second["deleted"], 2);
        assert_eq!(second["unchanged"], 2);

        let (status, aggregates) = send(
            &app,
            Method::GET,
            &format!("/datasets/{dataset}/aggregates"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let aggregates = aggregates.as_array().unwrap();
        assert_eq!(aggregates.len(), 6);

        let mut names: Vec<_> = aggregates
            .iter()
            .map(|a| a["feature"]["attributes"]["name"].as_str().unwrap().to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "Harbour street",
                "Mill lane",
                "New bridge",
                "Quarry track",
                "Ring road",
                "Station avenue"
            ]
        );
    }

    #[tokio::test]
    async fn test_get_aggregate() {
        let (app, _) = test_app();
        let dataset = Uuid::new_v4();
        send(
            &app,
            Method::POST,
            &format!("/datasets/{dataset}/snapshots"),
            Some(version_one()),
        )
        .await;

        let (_, aggregates) = send(
            &app,
            Method::GET,
            &format!("/datasets/{dataset}/aggregates"),
            None,
        )
        .await;
        let id = aggregates[0]["id"].as_str().unwrap().to_string();

        let uri = format!("/datasets/{dataset}/aggregates/{id}");
        let (status, aggregate) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(aggregate["version"], 1);
        assert_eq!(aggregate["feature"], aggregates[0]["feature"]);

        let uri = format!("/datasets/{dataset}/aggregates/{}", Uuid::new_v4());
        let (status, body) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("aggregate"));
    }

    #[tokio::test]
    async fn test_deleted_aggregate_still_readable() {
        let (app, _) = test_app();
        let dataset = Uuid::new_v4();
        let uri = format!("/datasets/{dataset}/snapshots");
        send(&app, Method::POST, &uri, Some(version_one())).await;

        let (_, aggregates) = send(
            &app,
            Method::GET,
            &format!("/datasets/{dataset}/aggregates"),
            None,
        )
        .await;
        let id = aggregates[0]["id"].as_str().unwrap().to_string();

        send(&app, Method::POST, &uri, Some(json!({"features": []}))).await;

        let uri = format!("/datasets/{dataset}/aggregates/{id}");
        let (status, aggregate) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(aggregate["version"], 2);
        assert!(aggregate.get("feature").is_none());
    }

    #[tokio::test]
    async fn test_invalid_snapshots_rejected() {
        let (app, _) = test_app();
        let uri = format!("/datasets/{}/snapshots", Uuid::new_v4());

        let bad_hex = json!({"features": [{"geometry": "zz", "attributes": {"id": 1}}]});
        let (status, body) = send(&app, Method::POST, &uri, Some(bad_hex)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("hex"));

        let bad_wkb = json!({"features": [{"geometry": "0102", "attributes": {"id": 1}}]});
        let (status, _) = send(&app, Method::POST, &uri, Some(bad_wkb)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let duplicate = json!({"features": [
            road(1, "a", &[(0.0, 0.0), (1.0, 0.0)]),
            road(1, "b", &[(0.0, 1.0), (1.0, 1.0)]),
        ]});
        let (status, body) = send(&app, Method::POST, &uri, Some(duplicate)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("duplicate"));
    }

    #[tokio::test]
    async fn test_projection_follows_snapshots() {
        let (app, sink) = test_app();
        let dataset = Uuid::new_v4();

        let fields = json!({"fields": [
            {"name": "id", "fieldType": "integer"},
            {"name": "name", "fieldType": "string"},
        ]});
        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/datasets/{dataset}/projections"),
            Some(fields.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["table"], dataset.to_string());
        assert_eq!(body["columns"][1]["columnType"]["geometry"], "geometry");

        let uri = format!("/datasets/{dataset}/snapshots");
        send(&app, Method::POST, &uri, Some(version_one())).await;
        assert_eq!(sink.row_count(&dataset.to_string()).await, 6);

        send(&app, Method::POST, &uri, Some(version_two())).await;
        assert_eq!(sink.row_count(&dataset.to_string()).await, 6);

        let (_, aggregates) = send(
            &app,
            Method::GET,
            &format!("/datasets/{dataset}/aggregates"),
            None,
        )
        .await;
        let renamed = aggregates
            .as_array()
            .unwrap()
            .iter()
            .find(|a| a["feature"]["attributes"]["id"] == 5)
            .unwrap();
        let id: Uuid = renamed["id"].as_str().unwrap().parse().unwrap();
        let row = sink.row(&dataset.to_string(), id).await.unwrap();
        assert_eq!(row[3].value, CellValue::String("Station avenue".into()));

        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/datasets/{dataset}/projections"),
            Some(fields),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, health) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(health["projections"], 1);
    }

    #[tokio::test]
    async fn test_projection_schema_validated() {
        let (app, _) = test_app();
        let uri = format!("/datasets/{}/projections", Uuid::new_v4());
        let fields = json!({"fields": [
            {"name": "id", "fieldType": "integer"},
            {"name": "id", "fieldType": "string"},
        ]});

        let (status, _) = send(&app, Method::POST, &uri, Some(fields)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_projection_reserved_columns_rejected() {
        let (app, sink) = test_app();
        let dataset = Uuid::new_v4();
        let uri = format!("/datasets/{dataset}/projections");

        for name in ["AggregateId", "Geometry"] {
            let fields = json!({"fields": [{"name": name, "fieldType": "string"}]});
            let (status, body) = send(&app, Method::POST, &uri, Some(fields)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body["error"].as_str().unwrap().contains(name));
        }
        assert!(sink.columns(&dataset.to_string()).await.is_none());

        let (status, _) = send(&app, Method::POST, &uri, Some(projection_fields())).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_concurrent_projection_requests_subscribe_once() {
        let (state, _) = test_state();
        let bus = Arc::clone(&state.bus);
        let app = geofold_server::app(state);
        let dataset = Uuid::new_v4();
        let uri = format!("/datasets/{dataset}/projections");

        let (first, second) = tokio::join!(
            send(&app, Method::POST, &uri, Some(projection_fields())),
            send(&app, Method::POST, &uri, Some(projection_fields())),
        );

        let mut statuses = vec![first.0, second.0];
        statuses.sort_by_key(|status| status.as_u16());
        assert_eq!(statuses, vec![StatusCode::OK, StatusCode::BAD_REQUEST]);
        assert_eq!(bus.subscriber_count(dataset), 1);

        let (_, health) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(health["projections"], 1);
    }

    #[test]
    fn test_feature_body_roundtrip() {
        let feature = Feature::new(
            Shape::from(Point::new(10.75, 59.91).with_srid(4326)),
            json!({"id": 1}),
        );
        let body = FeatureBody::encode(&feature);
        assert!(body.geometry.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(body.decode().unwrap(), feature);
    }
}
