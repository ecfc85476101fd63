//! Fleet CLI - operator tooling for the fleet orchestrator.
//!
//! - `client`: blocking HTTP client for the orchestrator API
//! - `demo`: a small mixed fleet around a center point for trying things out

pub mod client;
pub mod demo;

pub use client::FleetClient;
