//! Domain errors shared by the planner, flight scheduler and orchestrator.

use crate::models::TaskStatus;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Vehicle,
    Task,
    DeliveryPoint,
    Route,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Vehicle => f.write_str("vehicle"),
            EntityKind::Task => f.write_str("task"),
            EntityKind::DeliveryPoint => f.write_str("delivery point"),
            EntityKind::Route => f.write_str("route"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FleetError {
    #[error("duplicate id: {0}")]
    DuplicateId(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("no vehicle satisfies constraints for task {0}")]
    Infeasible(String),

    #[error("no path found: {0}")]
    NoPath(String),

    #[error("no conflict-free altitude layer for vehicle {0}")]
    NoSafeAltitude(String),

    #[error("airspace cell saturated ({active} active routes)")]
    AirspaceSaturated { active: usize },

    #[error("deadline missed for task {0}")]
    DeadlineMissed(String),

    #[error("retry limit exceeded for task {0}")]
    RetryLimitExceeded(String),

    #[error("task {id} cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: TaskStatus, to: TaskStatus },

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("capacity exceeded: {0}")]
    Capacity(String),
}

impl FleetError {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        FleetError::NotFound { kind, id: id.into() }
    }

    /// Errors that re-queue a task instead of failing it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FleetError::Infeasible(_)
                | FleetError::NoPath(_)
                | FleetError::NoSafeAltitude(_)
                | FleetError::AirspaceSaturated { .. }
        )
    }
}

pub type FleetResult<T> = Result<T, FleetError>;
