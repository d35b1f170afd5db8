//! sigma-distribution — moves new model checkpoints through the fleet.
//!
//! Trainers signal that they wrote a checkpoint. Once per scheduler tick the
//! [`Distributor`] downloads the signalled checkpoints into a local staging
//! directory, lets a [`MergeStrategy`] pick the one to publish, atomically
//! replaces the canonical local model with it, then uploads it to every
//! selfplay worker in parallel.
//!
//! # Components
//!
//! - **`checkpoint`**: staged checkpoint references, local atomic publish
//! - **`strategy`**: merge strategy trait and `KeepLatest`
//! - **`pipeline`**: the per-tick distribution round

pub mod checkpoint;
pub mod error;
pub mod pipeline;
pub mod strategy;

pub use checkpoint::{ModelCheckpoint, publish_atomic};
pub use error::{DistributionError, DistributionResult};
pub use pipeline::{CheckpointSignal, DistributionReport, Distributor, UploadTarget};
pub use strategy::{KeepLatest, MergeStrategy, from_kind};
