//! Orchestrator service for a mixed car/drone delivery fleet.
//!
//! The binary wires these modules together; tests drive them directly.

pub mod api;
pub mod backoff;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod loops;
pub mod persistence;
pub mod planning;
pub mod state;
