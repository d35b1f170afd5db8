//! Job records and the events their output produces.

use std::fmt;
use std::time::Duration;

use sigma_core::{JobId, JobKind, Resources, SlotId, WorkerId};
use sigma_remote::{Exit, Process};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// One incarnation of a slot, running on one worker.
///
/// A job lives in the supervisor's table exactly while its process is
/// running; once it exits the record is removed and reported as a [`Death`].
pub struct Job {
    pub id: JobId,
    pub slot: SlotId,
    pub worker: WorkerId,
    /// Reserved on `worker` for as long as the job is in the table.
    pub cost: Resources,
    pub started_at: Instant,
    pub(crate) process: Box<dyn Process>,
    /// Stdout reader and stderr forwarder.
    pub(crate) tasks: Vec<JoinHandle<()>>,
}

impl Job {
    pub fn kind(&self) -> JobKind {
        self.slot.kind
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.id()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("slot", &self.slot)
            .field("worker", &self.worker)
            .field("cost", &self.cost)
            .finish_non_exhaustive()
    }
}

/// Something a job's output told us. Delivered through the supervisor's
/// event queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// A trainer wrote one line to stdout: it has a new checkpoint.
    Checkpoint {
        job: JobId,
        slot: SlotId,
        worker: WorkerId,
    },
    /// The job's stdout reached EOF.
    OutputClosed { job: JobId, slot: SlotId },
}

/// A job observed to have exited. Its cost has already been released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Death {
    pub job: JobId,
    pub slot: SlotId,
    pub worker: WorkerId,
    pub cost: Resources,
    /// `None` when the exit status could not be read.
    pub exit: Option<Exit>,
    pub uptime: Duration,
}
