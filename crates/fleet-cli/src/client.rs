//! HTTP client for the orchestrator API.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use fleet_core::{DeliveryPoint, NewTask, Position, Task, TaskStatus, Vehicle, VehicleStatus};
use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

/// Blocking client for one orchestrator instance.
pub struct FleetClient {
    client: Client,
    base_url: String,
}

impl FleetClient {
    /// Create a client for `base_url` (e.g. "http://localhost:3000").
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().unwrap_or(Value::Null);
            let message = body["error"].as_str().unwrap_or("no error message");
            bail!("{} failed with {}: {}", what, status, message);
        }
        response.json().with_context(|| format!("decoding {} response", what))
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .with_context(|| format!("GET {}", path))?;
        Self::decode(response, path)
    }

    fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .with_context(|| format!("POST {}", path))?;
        Self::decode(response, path)
    }

    pub fn health(&self) -> Result<bool> {
        let response = self.client.get(self.url("/health")).send().context("GET /health")?;
        Ok(response.status().is_success())
    }

    /// Full system status as returned by the server.
    pub fn status(&self) -> Result<Value> {
        self.get("/v1/status")
    }

    pub fn register_vehicle(&self, vehicle: &Vehicle) -> Result<Vehicle> {
        let body = json!({
            "id": vehicle.id,
            "kind": vehicle.kind,
            "position": vehicle.position,
            "battery_pct": vehicle.battery_pct,
            "max_payload_kg": vehicle.max_payload_kg,
            "capabilities": vehicle.capabilities,
            "cost_factors": vehicle.cost_factors,
        });
        self.post("/v1/vehicles", &body)
    }

    pub fn register_point(&self, point: &DeliveryPoint) -> Result<DeliveryPoint> {
        let body = json!({
            "id": point.id,
            "kind": point.kind,
            "position": point.position,
            "capacity": point.capacity,
        });
        self.post("/v1/points", &body)
    }

    pub fn create_task(&self, task: &NewTask) -> Result<Task> {
        self.post("/v1/tasks", task)
    }

    pub fn get_task(&self, task_id: &str) -> Result<Task> {
        self.get(&format!("/v1/tasks/{}", task_id))
    }

    pub fn cancel_task(&self, task_id: &str) -> Result<Task> {
        self.post(&format!("/v1/tasks/{}/cancel", task_id), &json!({}))
    }

    pub fn report_progress(&self, task_id: &str, status: TaskStatus) -> Result<Task> {
        self.post(&format!("/v1/tasks/{}/progress", task_id), &json!({ "status": status }))
    }

    pub fn send_telemetry(
        &self,
        vehicle_id: &str,
        position: Position,
        battery_pct: f64,
        status: VehicleStatus,
    ) -> Result<Vehicle> {
        let body = json!({
            "position": position,
            "battery_pct": battery_pct,
            "status": status,
            "timestamp": Utc::now(),
        });
        self.post(&format!("/v1/vehicles/{}/telemetry", vehicle_id), &body)
    }

    /// Trigger a scheduling pass; returns the tick report.
    pub fn tick(&self) -> Result<Value> {
        self.post("/v1/schedule/tick", &json!({}))
    }
}
