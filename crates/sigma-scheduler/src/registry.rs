//! The fleet as the scheduler sees it.

use std::sync::Arc;

use sigma_core::{FleetConfig, JobKind, LaunchConfig, Resources, WorkerId};
use sigma_remote::{Destination, Executor, RemoteWorker, RetryPolicy};

/// One configured machine.
#[derive(Debug, Clone)]
pub struct FleetWorker {
    pub remote: RemoteWorker,
    pub capacity: Resources,
    /// Install credentials before first use.
    pub authorize: bool,
    pub training: Option<LaunchConfig>,
    pub selfplay: Option<LaunchConfig>,
}

impl FleetWorker {
    pub fn launch(&self, kind: JobKind) -> Option<&LaunchConfig> {
        match kind {
            JobKind::Training => self.training.as_ref(),
            JobKind::Selfplay => self.selfplay.as_ref(),
        }
    }
}

/// Workers in config order. A worker's position is its [`WorkerId`].
#[derive(Debug, Clone, Default)]
pub struct Registry {
    workers: Vec<FleetWorker>,
}

impl Registry {
    pub fn new(workers: Vec<FleetWorker>) -> Self {
        Self { workers }
    }

    pub fn from_config(config: &FleetConfig, executor: Arc<dyn Executor>) -> Self {
        let retry = RetryPolicy {
            attempts: config.transfer.attempts,
            initial_backoff: config.transfer_backoff(),
            max_backoff: config.transfer_max_backoff(),
        };
        let workers = config
            .workers
            .iter()
            .map(|w| FleetWorker {
                remote: RemoteWorker::new(
                    Destination::new(w.host.clone(), w.user.clone()),
                    Arc::clone(&executor),
                    retry,
                ),
                capacity: w.capacity(),
                authorize: w.authorize,
                training: w.training.clone(),
                selfplay: w.selfplay.clone(),
            })
            .collect();
        Self { workers }
    }

    pub fn get(&self, id: WorkerId) -> Option<&FleetWorker> {
        self.workers.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (WorkerId, &FleetWorker)> {
        self.workers.iter().enumerate()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn capacities(&self) -> Vec<Resources> {
        self.workers.iter().map(|w| w.capacity).collect()
    }

    /// Workers configured to run `kind`, in fleet order.
    pub fn eligible(&self, kind: JobKind) -> Vec<WorkerId> {
        self.iter()
            .filter(|(_, w)| w.launch(kind).is_some())
            .map(|(id, _)| id)
            .collect()
    }
}
