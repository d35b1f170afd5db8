//! sigma-scheduler — runs a SigmaGrid fleet.
//!
//! Ties the other crates together into the orchestrator's control loop.
//! The scheduler:
//!
//! - Builds the worker registry and per-worker budgets from the config
//! - Opens one replay pipe per training slot and deals selfplay slots out
//!   to them
//! - Places pending slots least-loaded-first, trainers before selfplay
//! - Respawns dead jobs through the same placement path, abandoning slots
//!   that flap
//! - Hands trainer checkpoint signals to the distribution pipeline
//!
//! # Architecture
//!
//! ```text
//! Scheduler
//!   ├── Registry (FleetWorker per config entry: RemoteWorker + launch specs)
//!   ├── Allocator (per-worker budgets, from sigma-placement)
//!   ├── Supervisor (job table + event queue, from sigma-supervisor)
//!   ├── Distributor (checkpoint rounds, from sigma-distribution)
//!   ├── ReplayFabric (one pipe per trainer, round-robin producers)
//!   └── slots (SlotId → state + RespawnTracker)
//! ```

pub mod error;
pub mod registry;
pub mod replay;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult, StreamSide};
pub use registry::{FleetWorker, Registry};
pub use replay::{ReplayFabric, ReplayStream};
pub use scheduler::{Scheduler, SlotState, TickSummary};
