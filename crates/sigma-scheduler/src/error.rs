//! Scheduler error types.

use std::fmt;

use sigma_core::SlotId;
use sigma_placement::PlacementError;
use sigma_supervisor::SupervisorError;
use thiserror::Error;

/// Which end of a replay stream is still referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSide {
    /// The training slot reading the stream.
    Trainer,
    /// Selfplay slots writing into the stream.
    Producers,
}

impl fmt::Display for StreamSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamSide::Trainer => "reader",
            StreamSide::Producers => "writer",
        })
    }
}

/// Errors that can occur while scheduling the fleet.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no usable workers after authorization")]
    NoUsableWorkers,

    #[error("replay stream of {stream} closed: {abandoned} abandoned while the {still_attached} side is still attached")]
    PipeClosed {
        stream: SlotId,
        abandoned: SlotId,
        still_attached: StreamSide,
    },

    #[error("cannot open replay pipe for {stream}: {source}")]
    Pipe {
        stream: SlotId,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
