use sigma_core::{Resources, WorkerId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlacementError {
    #[error("worker {worker} cannot reserve {requested}: only {available} available")]
    Insufficient {
        worker: WorkerId,
        requested: Resources,
        available: Resources,
    },

    #[error("worker {worker} cannot release {released}: only {reserved} reserved")]
    OverRelease {
        worker: WorkerId,
        released: Resources,
        reserved: Resources,
    },

    #[error("worker {0} is excluded from placement")]
    Excluded(WorkerId),

    #[error("unknown worker {0}")]
    UnknownWorker(WorkerId),
}

pub type PlacementResult<T> = Result<T, PlacementError>;
