use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use fleet_core::{VehicleCommand, World};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;

use crate::{api, config::Config, config::SnapshotBackend, state::Orchestrator};

fn setup_app() -> (axum::Router, Arc<Orchestrator>, mpsc::Receiver<VehicleCommand>) {
    let mut config = Config::default();
    config.snapshot_backend = SnapshotBackend::Disabled;
    config.planner.rrt_seed = Some(11);

    let (state, commands) = Orchestrator::new(config, World::default());
    let state = Arc::new(state);
    let app = api::routes().with_state(state.clone());
    (app, state, commands)
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("parse json")
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn seed_points(app: &axum::Router) {
    for (id, kind, lon) in [("P1", "pickup", 116.400), ("D1", "delivery", 116.410)] {
        let res = app
            .clone()
            .oneshot(post(
                "/v1/points",
                json!({ "id": id, "kind": kind, "position": { "lat": 39.9, "lon": lon } }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
    }
}

#[tokio::test]
async fn health_and_request_id() {
    let (app, _state, _rx) = setup_app();

    let res = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));

    let tagged = Request::builder()
        .uri("/health")
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(tagged).await.unwrap();
    assert_eq!(res.headers()["x-request-id"], "req-42");
}

#[tokio::test]
async fn register_vehicle_and_reject_duplicate() {
    let (app, _state, _rx) = setup_app();
    let body = json!({
        "id": "CAR_1",
        "kind": "car",
        "position": { "lat": 39.9, "lon": 116.4 },
        "battery_pct": 80.0,
        "max_payload_kg": 20.0
    });

    let res = app.clone().oneshot(post("/v1/vehicles", body.clone())).await.unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let vehicle = read_json(res).await;
    assert_eq!(vehicle["status"], "idle");
    assert_eq!(vehicle["battery_pct"], 80.0);

    let res = app.clone().oneshot(post("/v1/vehicles", body)).await.unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert_eq!(read_json(res).await["kind"], "duplicate_id");
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let (app, _state, _rx) = setup_app();
    let res = app.oneshot(get("/v1/tasks/TASK-999999")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn past_deadline_is_unprocessable() {
    let (app, _state, _rx) = setup_app();
    seed_points(&app).await;

    let deadline = Utc::now() - Duration::minutes(5);
    let res = app
        .oneshot(post(
            "/v1/tasks",
            json!({
                "pickup_point": "P1",
                "delivery_point": "D1",
                "weight_kg": 1.0,
                "deadline": deadline,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(read_json(res).await["kind"], "deadline_missed");
}

#[tokio::test]
async fn task_flow_over_http() {
    let (app, state, mut rx) = setup_app();
    seed_points(&app).await;
    app.clone()
        .oneshot(post(
            "/v1/vehicles",
            json!({ "id": "CAR_1", "kind": "car", "position": { "lat": 39.9, "lon": 116.4 } }),
        ))
        .await
        .unwrap();

    let res = app
        .clone()
        .oneshot(post(
            "/v1/tasks",
            json!({ "pickup_point": "P1", "delivery_point": "D1", "weight_kg": 2.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let task_id = read_json(res).await["id"].as_str().unwrap().to_string();

    let res = app.clone().oneshot(post("/v1/schedule/tick", json!({}))).await.unwrap();
    let report = read_json(res).await;
    assert_eq!(report["assigned"][0]["vehicle_id"], "CAR_1");
    let command = rx.try_recv().expect("command queued");
    assert_eq!(command.task_id, task_id);

    for status in ["pickup_reached", "pickup_complete", "delivery_started", "completed"] {
        let res = app
            .clone()
            .oneshot(post(&format!("/v1/tasks/{}/progress", task_id), json!({ "status": status })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK, "progress to {status}");
    }

    let res = app
        .clone()
        .oneshot(post(&format!("/v1/tasks/{}/progress", task_id), json!({ "status": "pickup_reached" })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let vehicle = state.get_vehicle("CAR_1").unwrap();
    assert!(vehicle.current_task.is_none());

    let res = app.oneshot(get("/v1/status")).await.unwrap();
    let status = read_json(res).await;
    assert_eq!(status["tasks_by_status"]["completed"], 1);
}

#[tokio::test]
async fn telemetry_for_unknown_vehicle_is_not_found() {
    let (app, _state, _rx) = setup_app();
    let res = app
        .oneshot(post(
            "/v1/vehicles/GHOST/telemetry",
            json!({ "position": { "lat": 39.9, "lon": 116.4 }, "battery_pct": 50.0, "status": "idle" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn world_replacement_bumps_version() {
    let (app, state, _rx) = setup_app();
    let before = state.planner().version();

    let req = Request::builder()
        .method("PUT")
        .uri("/v1/world")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "obstacles": [
                    { "id": "TOWER", "lat": 39.9, "lon": 116.405, "radius_m": 20.0, "height_m": 80.0 }
                ]
            })
            .to_string(),
        ))
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(read_json(res).await["world_version"], before + 1);
    assert_eq!(state.planner().world().obstacles().len(), 1);
}
