use std::path::PathBuf;

use sigma_remote::RemoteError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error(transparent)]
    Transfer(#[from] RemoteError),

    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no trainer checkpoint could be staged")]
    NothingStaged,
}

impl DistributionError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| DistributionError::Io { op, path, source }
    }
}

pub type DistributionResult<T> = Result<T, DistributionError>;
