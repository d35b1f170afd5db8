//! sigma-placement — resource budgets and placement for a SigmaGrid fleet.
//!
//! This crate decides *where* jobs go. It never starts processes (that is
//! `sigma-supervisor`, driven by `sigma-scheduler`); it tracks each worker's
//! `(cpu, gpu)` budget and produces placement plans the scheduler executes.
//!
//! # Components
//!
//! - **`allocator`**: per-worker capacity, reservations and exclusion
//! - **`scorer`**: headroom key and deterministic heap ordering
//! - **`placer`**: least-loaded-first bin-packing pass

pub mod allocator;
pub mod error;
pub mod placer;
pub mod scorer;

pub use allocator::{Allocator, WorkerBudget};
pub use error::{PlacementError, PlacementResult};
pub use placer::{PlacementPlan, place};
pub use scorer::{Candidate, headroom_key};
