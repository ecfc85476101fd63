//! REST API routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::request_id;
use crate::state::Orchestrator;
use fleet_core::{
    CostFactors, DeliveryPoint, DeliveryPointKind, NewTask, Position, RouteStatus, TaskStatus, Vehicle,
    VehicleKind, VehicleStatus, VehicleUpdate, WorldData,
};

type ApiResult<T> = Result<T, ApiError>;

/// Create the API router.
pub fn create_router() -> Router<Arc<Orchestrator>> {
    Router::new()
        .route("/health", get(health))
        .route("/v1/status", get(get_status))
        .route("/v1/vehicles", post(register_vehicle).get(list_vehicles))
        .route("/v1/vehicles/:vehicle_id", get(get_vehicle))
        .route("/v1/vehicles/:vehicle_id/telemetry", post(receive_telemetry))
        .route("/v1/points", post(register_point).get(list_points))
        .route("/v1/tasks", post(create_task).get(list_tasks))
        .route("/v1/tasks/:task_id", get(get_task))
        .route("/v1/tasks/:task_id/cancel", post(cancel_task))
        .route("/v1/tasks/:task_id/progress", post(report_progress))
        .route("/v1/routes", get(list_routes))
        .route("/v1/routes/:route_id/status", post(update_route_status))
        .route("/v1/schedule/tick", post(run_tick))
        .route("/v1/world", put(replace_world))
        .layer(middleware::from_fn(request_id::tag_request))
}

// === Request types ===

#[derive(Debug, Deserialize)]
pub struct RegisterVehicleRequest {
    pub id: String,
    pub kind: VehicleKind,
    pub position: Position,
    #[serde(default)]
    pub battery_pct: Option<f64>,
    #[serde(default)]
    pub max_payload_kg: Option<f64>,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub cost_factors: Option<CostFactors>,
    #[serde(default)]
    pub status: Option<VehicleStatus>,
}

impl RegisterVehicleRequest {
    fn into_vehicle(self) -> Vehicle {
        let mut vehicle = Vehicle::new(self.id, self.kind, self.position).with_capabilities(self.capabilities);
        if let Some(battery) = self.battery_pct {
            vehicle = vehicle.with_battery(battery);
        }
        if let Some(payload) = self.max_payload_kg {
            vehicle = vehicle.with_max_payload(payload);
        }
        if let Some(factors) = self.cost_factors {
            vehicle.cost_factors = factors;
        }
        if let Some(status) = self.status {
            vehicle.status = status;
        }
        vehicle
    }
}

/// Telemetry body; the timestamp defaults to receipt time.
#[derive(Debug, Deserialize)]
pub struct TelemetryRequest {
    pub position: Position,
    pub battery_pct: f64,
    pub status: VehicleStatus,
    #[serde(default)]
    pub payload_kg: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterPointRequest {
    pub id: String,
    pub kind: DeliveryPointKind,
    pub position: Position,
    #[serde(default)]
    pub capacity: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub status: TaskStatus,
}

#[derive(Debug, Deserialize)]
pub struct RouteStatusRequest {
    pub status: RouteStatus,
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    "OK"
}

async fn get_status(State(state): State<Arc<Orchestrator>>) -> impl IntoResponse {
    Json(state.system_status())
}

async fn register_vehicle(
    State(state): State<Arc<Orchestrator>>,
    Json(req): Json<RegisterVehicleRequest>,
) -> ApiResult<impl IntoResponse> {
    let vehicle = state.register_vehicle(req.into_vehicle())?;
    Ok((StatusCode::CREATED, Json(vehicle)))
}

async fn list_vehicles(State(state): State<Arc<Orchestrator>>) -> impl IntoResponse {
    Json(state.list_vehicles())
}

async fn get_vehicle(
    State(state): State<Arc<Orchestrator>>,
    Path(vehicle_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.get_vehicle(&vehicle_id)?))
}

async fn receive_telemetry(
    State(state): State<Arc<Orchestrator>>,
    Path(vehicle_id): Path<String>,
    Json(req): Json<TelemetryRequest>,
) -> ApiResult<impl IntoResponse> {
    let update = VehicleUpdate {
        position: req.position,
        battery_pct: req.battery_pct,
        status: req.status,
        payload_kg: req.payload_kg,
        timestamp: req.timestamp.unwrap_or_else(Utc::now),
    };
    Ok(Json(state.update_vehicle_status(&vehicle_id, update)?))
}

async fn register_point(
    State(state): State<Arc<Orchestrator>>,
    Json(req): Json<RegisterPointRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut point = DeliveryPoint::new(req.id, req.kind, req.position);
    if let Some(capacity) = req.capacity {
        point.capacity = capacity;
    }
    let point = state.register_point(point)?;
    Ok((StatusCode::CREATED, Json(point)))
}

async fn list_points(State(state): State<Arc<Orchestrator>>) -> impl IntoResponse {
    Json(state.list_points())
}

async fn create_task(
    State(state): State<Arc<Orchestrator>>,
    Json(req): Json<NewTask>,
) -> ApiResult<impl IntoResponse> {
    let task = state.create_task(req)?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn list_tasks(State(state): State<Arc<Orchestrator>>) -> impl IntoResponse {
    Json(state.list_tasks())
}

async fn get_task(
    State(state): State<Arc<Orchestrator>>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.get_task(&task_id)?))
}

async fn cancel_task(
    State(state): State<Arc<Orchestrator>>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.cancel_task(&task_id)?))
}

async fn report_progress(
    State(state): State<Arc<Orchestrator>>,
    Path(task_id): Path<String>,
    Json(req): Json<ProgressRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.report_progress(&task_id, req.status)?))
}

async fn list_routes(State(state): State<Arc<Orchestrator>>) -> impl IntoResponse {
    Json(state.active_routes())
}

async fn update_route_status(
    State(state): State<Arc<Orchestrator>>,
    Path(route_id): Path<String>,
    Json(req): Json<RouteStatusRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.set_route_status(&route_id, req.status)?))
}

/// Run a scheduling pass now instead of waiting for the loop.
async fn run_tick(State(state): State<Arc<Orchestrator>>) -> impl IntoResponse {
    Json(state.tick().await)
}

async fn replace_world(
    State(state): State<Arc<Orchestrator>>,
    Json(data): Json<WorldData>,
) -> ApiResult<impl IntoResponse> {
    let version = state.replace_world(data)?;
    Ok(Json(json!({ "world_version": version })))
}
