pub mod config;
pub mod duration;
pub mod types;

pub use config::{FleetConfig, JobRequest, LaunchConfig, MergeKind, WorkerConfig};
pub use duration::parse_duration;
pub use types::*;
