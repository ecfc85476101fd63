//! Mapping of domain errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fleet_core::FleetError;
use serde_json::json;

#[derive(Debug)]
pub struct ApiError(pub FleetError);

impl From<FleetError> for ApiError {
    fn from(err: FleetError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            FleetError::DuplicateId(_) | FleetError::InvalidTransition { .. } => StatusCode::CONFLICT,
            FleetError::NotFound { .. } => StatusCode::NOT_FOUND,
            FleetError::DeadlineMissed(_) | FleetError::Invalid(_) | FleetError::RetryLimitExceeded(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            FleetError::Capacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            FleetError::Infeasible(_)
            | FleetError::NoPath(_)
            | FleetError::NoSafeAltitude(_)
            | FleetError::AirspaceSaturated { .. } => StatusCode::CONFLICT,
        }
    }

    fn kind(&self) -> &'static str {
        match &self.0 {
            FleetError::DuplicateId(_) => "duplicate_id",
            FleetError::NotFound { .. } => "not_found",
            FleetError::Infeasible(_) => "infeasible",
            FleetError::NoPath(_) => "no_path",
            FleetError::NoSafeAltitude(_) => "no_safe_altitude",
            FleetError::AirspaceSaturated { .. } => "airspace_saturated",
            FleetError::DeadlineMissed(_) => "deadline_missed",
            FleetError::RetryLimitExceeded(_) => "retry_limit_exceeded",
            FleetError::InvalidTransition { .. } => "invalid_transition",
            FleetError::Invalid(_) => "invalid",
            FleetError::Capacity(_) => "capacity",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("Request rejected: {}", self.0);
        }
        (
            status,
            Json(json!({
                "error": self.0.to_string(),
                "kind": self.kind(),
            })),
        )
            .into_response()
    }
}
