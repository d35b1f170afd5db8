//! sigma-supervisor — job lifecycle for a SigmaGrid fleet.
//!
//! Owns every running job handle, polls liveness once per scheduler tick and
//! turns job output into events. Placement decisions live elsewhere; the
//! supervisor only releases what a dead job held and reports the death so
//! the scheduler can respawn through its normal placement path.
//!
//! # Architecture
//!
//! ```text
//! Supervisor
//!   ├── job table (JobId → Job { slot, worker, cost, process })
//!   ├── per-job tasks
//!   │   ├── stdout reader → JobEvent::{Checkpoint, OutputClosed}
//!   │   └── stderr forwarder → LinePrefixer → orchestrator stderr
//!   └── unbounded event queue, drained without blocking
//!
//! RespawnTracker (one per slot, limits from FlapGuard)
//! ```
//!
//! # Crash loops
//!
//! A slot whose jobs keep dying young is abandoned after `max_respawns`
//! flaps. A job that stayed up for `stable_after` resets the count.

pub mod error;
pub mod job;
pub mod respawn;
pub mod supervisor;

pub use error::{SupervisorError, SupervisorResult};
pub use job::{Death, Job, JobEvent};
pub use respawn::{FlapGuard, RespawnDecision, RespawnTracker};
pub use supervisor::{StderrSink, Supervisor};
