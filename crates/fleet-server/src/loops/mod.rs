//! Background loops for continuous processing.
//!
//! Every loop takes the shared orchestrator and a shutdown receiver and
//! exits on the first shutdown signal.

pub mod dispatch_loop;
pub mod monitor_loop;
pub mod scheduling_loop;
pub mod snapshot_loop;
pub mod world_sync_loop;
