use sigma_core::JobId;
use sigma_placement::PlacementError;
use sigma_remote::RemoteError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error("no such job: {0}")]
    UnknownJob(JobId),
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
