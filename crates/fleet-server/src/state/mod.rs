//! Shared orchestrator state.
//!
//! Registries are `DashMap`s so telemetry for one vehicle never waits on
//! another. The task queue and the flight scheduler each sit behind a
//! plain mutex that is only taken for short, non-async sections.

mod monitor;
mod scheduling;
mod store;

pub use scheduling::{Assignment, TickReport};
pub use store::{Orchestrator, SystemStatus};
