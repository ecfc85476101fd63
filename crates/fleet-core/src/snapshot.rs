//! Persisted orchestrator state.

use crate::models::{DeliveryPoint, RoutePlan, Task, Vehicle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything needed to rebuild the registries after a restart.
///
/// `routes` holds only the live (scheduled or active) route plans, so
/// drones that were airborne keep their airspace reservation.
/// Archived routes are not kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    #[serde(default)]
    pub vehicles: Vec<Vehicle>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub delivery_points: Vec<DeliveryPoint>,
    #[serde(default)]
    pub routes: Vec<RoutePlan>,
}

impl Snapshot {
    pub fn empty(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            vehicles: Vec::new(),
            tasks: Vec::new(),
            delivery_points: Vec::new(),
            routes: Vec::new(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Sort every collection by id so equal states serialize identically.
    pub fn normalized(mut self) -> Self {
        self.vehicles.sort_by(|a, b| a.id.cmp(&b.id));
        self.tasks.sort_by(|a, b| a.id.cmp(&b.id));
        self.delivery_points.sort_by(|a, b| a.id.cmp(&b.id));
        self.routes.sort_by(|a, b| a.id.cmp(&b.id));
        self
    }
}
