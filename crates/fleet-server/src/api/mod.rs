//! HTTP API for the orchestrator.

pub mod error;
pub mod request_id;
mod routes;

use crate::state::Orchestrator;
use axum::Router;
use std::sync::Arc;

pub use error::ApiError;

pub fn routes() -> Router<Arc<Orchestrator>> {
    routes::create_router()
}

#[cfg(test)]
mod tests;
