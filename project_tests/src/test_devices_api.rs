//! # Devices API Integration Tests
//!
//! Exercises `DeviceApi` and the underlying `ApiClient` against a local axum
//! server standing in for the fleet backend.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;

use lib_fleet::retrieve::{ApiClient, DeviceApi};
use lib_fleet::tracking::PowerStatus;
use lib_fleet::FleetError;

const TOKEN: &str = "secret-token";

async fn devices(headers: HeaderMap) -> impl IntoResponse {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"));
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "missing token").into_response();
    }
    Json(json!([
        {"uid": "d1", "name": "Van 1", "car_name": "Kangoo", "company_manager": {"name": "Acme"}},
        {"uid": "d2", "name": "Van 2", "car_name": "Partner", "company_manager": {"name": "Acme"}},
        {"uid": "", "name": "Unassigned"}
    ]))
    .into_response()
}

async fn position(Path(uid): Path<String>, Query(query): Query<HashMap<String, String>>) -> impl IntoResponse {
    match (uid.as_str(), query.get("date").map(String::as_str)) {
        ("d1", Some("")) => Json(json!({"lat": 48.85, "lng": 2.35, "city": "Paris", "status": "On"})).into_response(),
        ("d1", Some("2024-05-01")) => {
            Json(json!({"lat": 45.76, "lng": 4.83, "city": "Lyon", "status": "Off"})).into_response()
        }
        _ => (StatusCode::NOT_FOUND, "no position").into_response(),
    }
}

async fn fleet_backend() -> String {
    let app = Router::new()
        .route("/api/devices/get-device-user/", get(devices))
        .route("/api/devices/get-position/{uid}/", get(position));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn roster_and_positions_load_with_token() {
    let base = fleet_backend().await;
    let api = DeviceApi::connect(&base, Some(TOKEN.to_string())).unwrap();

    let (devices, locations) = api.load_roster().await.unwrap();

    assert_eq!(devices.len(), 3);
    assert_eq!(devices[0].company_manager.name, "Acme");
    // d2 has no position; the unnamed device is never looked up
    assert_eq!(locations.len(), 1);
    let (uid, location) = &locations[0];
    assert_eq!(uid, "d1");
    assert_eq!(location.city, "Paris");
    assert_eq!(location.status, PowerStatus::On);
}

#[tokio::test]
async fn position_lookup_passes_date() {
    let base = fleet_backend().await;
    let api = DeviceApi::connect(&base, Some(TOKEN.to_string())).unwrap();

    let location = api.get_device_position("d1", Some("2024-05-01")).await.unwrap();

    assert_eq!(location.city, "Lyon");
    assert!(!location.status.is_on());
}

#[tokio::test]
async fn rejected_requests_surface_status_and_body() {
    let base = fleet_backend().await;
    let api = DeviceApi::connect(&base, None).unwrap();

    match api.get_devices_for_authenticated_user().await {
        Err(FleetError::Api { status, body }) => {
            assert_eq!(status, 401);
            assert_eq!(body, "missing token");
        }
        other => panic!("expected an API error, got {other:?}"),
    }
}

#[tokio::test]
async fn unanswered_request_times_out() {
    // Accepts connections and never answers them.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    let client = ApiClient::with_timeout(&format!("http://{addr}"), None, Duration::from_millis(100)).unwrap();
    let api = DeviceApi::new(client);

    // Every attempt, retries included, is cut off by the timeout.
    let result = tokio::time::timeout(Duration::from_secs(30), api.get_devices_for_authenticated_user())
        .await
        .expect("request outlived its timeout");
    assert!(result.is_err());
}

#[tokio::test]
async fn position_lookups_overlap() {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/api/devices/get-device-user/",
            get(|| async { Json(json!([{"uid": "a"}, {"uid": "b"}, {"uid": "c"}, {"uid": "d"}])) }),
        )
        .route(
            "/api/devices/get-position/{uid}/",
            get({
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                move || async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Json(json!({"lat": 1.0, "lng": 2.0, "city": "Lille"}))
                }
            }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let api = DeviceApi::connect(&format!("http://{addr}"), None).unwrap();
    let (devices, locations) = api.load_roster().await.unwrap();

    assert_eq!(devices.len(), 4);
    let order: Vec<&str> = locations.iter().map(|(uid, _)| uid.as_str()).collect();
    assert_eq!(order, ["a", "b", "c", "d"]);
    assert!(peak.load(Ordering::SeqCst) > 1);
}
