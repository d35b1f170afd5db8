//! Remote worker error types.

use std::fmt;

use thiserror::Error;

/// Which transfer step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOp {
    Upload,
    Download,
    Rename,
    Remove,
}

impl fmt::Display for TransferOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransferOp::Upload => "upload",
            TransferOp::Download => "download",
            TransferOp::Rename => "rename",
            TransferOp::Remove => "remove",
        })
    }
}

/// Errors raised by remote workers and their executors.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("authorization failed for {dest}: {reason}")]
    Authorization { dest: String, reason: String },

    #[error("failed to start {program} on {dest}: {source}")]
    Spawn {
        dest: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{op} failed on {dest}: {reason}")]
    Transfer {
        dest: String,
        op: TransferOp,
        reason: String,
    },
}

pub type RemoteResult<T> = Result<T, RemoteError>;
