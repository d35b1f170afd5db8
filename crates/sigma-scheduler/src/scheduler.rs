//! Scheduler: the orchestrator's control loop.
//!
//! The `Scheduler` owns every piece of fleet state and is the only thing
//! that mutates it. Each tick it:
//! - polls the supervisor, releasing and respawning (or abandoning) dead jobs
//! - drains job events, collecting trainer checkpoint signals
//! - places every pending slot, trainers first
//! - runs one distribution round if any trainer signalled

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use sigma_core::{FleetConfig, JobId, JobKind, JobRequest, Resources, SlotId, WorkerId};
use sigma_distribution::{
    CheckpointSignal, DistributionReport, Distributor, UploadTarget, from_kind,
};
use sigma_placement::{Allocator, place};
use sigma_remote::{CommandSpec, Executor};
use sigma_supervisor::{
    Death, FlapGuard, JobEvent, RespawnDecision, RespawnTracker, Supervisor,
};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::registry::Registry;
use crate::replay::ReplayFabric;

/// Where a logical slot is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Waiting for placement.
    Pending,
    /// Bound to a running job.
    Active(JobId),
    /// Flapped too often; never placed again.
    Abandoned,
}

#[derive(Debug)]
struct Slot {
    state: SlotState,
    tracker: RespawnTracker,
}

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickSummary {
    pub deaths: Vec<Death>,
    /// Slots started this tick, new or respawned.
    pub started: Vec<SlotId>,
    pub abandoned: Vec<SlotId>,
    pub distribution: Option<DistributionReport>,
}

pub struct Scheduler {
    registry: Registry,
    allocator: Allocator,
    supervisor: Supervisor,
    distributor: Distributor,
    replay: ReplayFabric,
    slots: BTreeMap<SlotId, Slot>,
    training: JobRequest,
    selfplay: JobRequest,
    /// Last logged unplaced count per kind.
    deficits: HashMap<JobKind, u32>,
}

impl Scheduler {
    /// Build the fleet state for `config`. Nothing is started yet.
    pub fn from_config(config: &FleetConfig, executor: Arc<dyn Executor>) -> SchedulerResult<Self> {
        Self::with_supervisor(config, executor, Supervisor::new())
    }

    /// Like [`Scheduler::from_config`], with a preconfigured supervisor.
    pub fn with_supervisor(
        config: &FleetConfig,
        executor: Arc<dyn Executor>,
        supervisor: Supervisor,
    ) -> SchedulerResult<Self> {
        let registry = Registry::from_config(config, executor);
        let allocator = Allocator::new(registry.capacities());
        let distributor = Distributor::new(
            config.model.clone(),
            config.staging_dir(),
            from_kind(config.merge),
        );
        let guard = FlapGuard {
            max_respawns: config.supervision.max_respawns,
            stable_after: config.stable_after(),
        };

        let mut replay = ReplayFabric::new();
        let mut slots = BTreeMap::new();
        for kind in JobKind::ALL {
            for index in 0..config.request(kind).count {
                let id = SlotId::new(kind, index);
                match kind {
                    JobKind::Training => replay.open(id)?,
                    JobKind::Selfplay => {
                        replay.assign(id);
                    }
                }
                slots.insert(
                    id,
                    Slot {
                        state: SlotState::Pending,
                        tracker: RespawnTracker::new(guard),
                    },
                );
            }
        }
        if replay.is_empty() && config.jobs.selfplay.count > 0 {
            warn!("no training slots requested, selfplay output goes to the null device");
        }

        info!(
            workers = registry.len(),
            training = config.jobs.training.count,
            selfplay = config.jobs.selfplay.count,
            "scheduler ready"
        );
        Ok(Self {
            registry,
            allocator,
            supervisor,
            distributor,
            replay,
            slots,
            training: config.jobs.training.clone(),
            selfplay: config.jobs.selfplay.clone(),
            deficits: HashMap::new(),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn distributor(&self) -> &Distributor {
        &self.distributor
    }

    pub fn replay(&self) -> &ReplayFabric {
        &self.replay
    }

    pub fn slot_state(&self, slot: SlotId) -> Option<SlotState> {
        self.slots.get(&slot).map(|s| s.state)
    }

    /// Jobs of `kind` that could not be placed on the last pass.
    pub fn deficit(&self, kind: JobKind) -> u32 {
        self.deficits.get(&kind).copied().unwrap_or(0)
    }

    fn cost(&self, kind: JobKind) -> Resources {
        match kind {
            JobKind::Training => self.training.cost(),
            JobKind::Selfplay => self.selfplay.cost(),
        }
    }

    /// Install credentials on every worker that asks for it. Workers that
    /// fail are excluded; the rest carry on.
    pub async fn authorize_all(&mut self) -> SchedulerResult<()> {
        for (id, worker) in self.registry.iter() {
            if !worker.authorize {
                continue;
            }
            match worker.remote.authorize().await {
                Ok(()) => {}
                Err(e) => {
                    error!(worker = id, dest = %worker.remote.destination(), error = %e, "authorization failed, worker excluded");
                    self.allocator.exclude(id)?;
                }
            }
        }
        if self.allocator.usable().next().is_none() {
            return Err(SchedulerError::NoUsableWorkers);
        }
        Ok(())
    }

    /// Authorize, then run the initial placement pass.
    pub async fn start(&mut self) -> SchedulerResult<Vec<SlotId>> {
        self.authorize_all().await?;
        let mut started = Vec::new();
        let mut abandoned = Vec::new();
        self.place_pending(&mut started, &mut abandoned)?;
        Ok(started)
    }

    /// One iteration of the control loop.
    pub async fn tick(&mut self) -> SchedulerResult<TickSummary> {
        let mut summary = TickSummary {
            deaths: self.supervisor.poll(&mut self.allocator),
            ..TickSummary::default()
        };
        for death in &summary.deaths {
            self.record_death(death.slot, death.uptime, &mut summary.abandoned)?;
        }

        let signals = self.collect_signals();
        self.place_pending(&mut summary.started, &mut summary.abandoned)?;

        if !signals.is_empty() {
            let targets = self.upload_targets();
            match self.distributor.distribute(signals, &targets).await {
                Ok(report) => {
                    if report.is_partial() {
                        warn!(version = report.version, failed = ?report.failed, "partial distribution");
                    }
                    info!(
                        version = report.version,
                        chosen = %report.chosen,
                        delivered = report.delivered.len(),
                        "checkpoint distributed"
                    );
                    summary.distribution = Some(report);
                }
                Err(e) => warn!(error = %e, "distribution round failed"),
            }
        }
        Ok(summary)
    }

    /// Tick every `interval` until `shutdown` flips, then stop every job.
    ///
    /// A fatal tick error also stops every job before it is returned.
    pub async fn run(
        &mut self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> SchedulerResult<()> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = interval.as_millis() as u64, "scheduler loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "fatal scheduler error");
                        self.shutdown().await;
                        return Err(e);
                    }
                }
                _ = shutdown.changed() => {
                    info!("scheduler shutting down");
                    break;
                }
            }
        }
        self.shutdown().await;
        Ok(())
    }

    /// Terminate every job and release every reservation.
    pub async fn shutdown(&mut self) {
        let deaths = self.supervisor.shutdown(&mut self.allocator).await;
        for death in deaths {
            if let Some(slot) = self.slots.get_mut(&death.slot) {
                slot.state = SlotState::Pending;
            }
        }
    }

    /// Count a death against its slot and decide what happens next.
    fn record_death(
        &mut self,
        slot_id: SlotId,
        uptime: Duration,
        abandoned: &mut Vec<SlotId>,
    ) -> SchedulerResult<()> {
        let Some(slot) = self.slots.get_mut(&slot_id) else {
            return Ok(());
        };
        match slot.tracker.record_death(uptime) {
            RespawnDecision::Respawn { attempt } => {
                slot.state = SlotState::Pending;
                debug!(slot = %slot_id, attempt, "respawn requested");
                Ok(())
            }
            RespawnDecision::Abandon { respawns } => {
                slot.state = SlotState::Abandoned;
                abandoned.push(slot_id);
                error!(slot = %slot_id, respawns, deaths = slot.tracker.deaths(), "slot abandoned");
                self.replay.abandon(slot_id)
            }
        }
    }

    fn collect_signals(&mut self) -> Vec<CheckpointSignal> {
        let mut signals = Vec::new();
        for event in self.supervisor.drain_events() {
            match event {
                JobEvent::Checkpoint { job, slot, worker } if slot.kind == JobKind::Training => {
                    let Some(source) = self.registry.get(worker) else {
                        continue;
                    };
                    let Some(launch) = source.launch(JobKind::Training) else {
                        continue;
                    };
                    debug!(%job, %slot, "checkpoint signalled");
                    signals.push(CheckpointSignal {
                        trainer: slot,
                        source: source.remote.clone(),
                        remote_path: launch.model.clone(),
                    });
                }
                JobEvent::Checkpoint { .. } => {}
                JobEvent::OutputClosed { job, slot } => {
                    debug!(%job, %slot, "job output closed");
                }
            }
        }
        signals
    }

    /// Every usable worker that runs selfplay gets the new model.
    fn upload_targets(&self) -> Vec<UploadTarget> {
        self.registry
            .iter()
            .filter(|(id, _)| !self.allocator.is_excluded(*id))
            .filter_map(|(_, w)| {
                w.launch(JobKind::Selfplay).map(|launch| UploadTarget {
                    remote: w.remote.clone(),
                    remote_path: launch.model.clone(),
                })
            })
            .collect()
    }

    /// Place every pending slot, trainers first.
    fn place_pending(
        &mut self,
        started: &mut Vec<SlotId>,
        abandoned: &mut Vec<SlotId>,
    ) -> SchedulerResult<()> {
        for kind in JobKind::ALL {
            let pending: Vec<SlotId> = self
                .slots
                .iter()
                .filter(|(id, s)| id.kind == kind && s.state == SlotState::Pending)
                .map(|(id, _)| *id)
                .collect();

            let cost = self.cost(kind);
            let eligible = self.registry.eligible(kind);
            let plan = place(&mut self.allocator, &eligible, cost, pending.len() as u32);

            let mut assignments = pending.iter().copied().zip(plan.assignments);
            while let Some((slot, worker)) = assignments.next() {
                if let Err(e) = self.start_slot(slot, worker, cost, started, abandoned) {
                    // Later assignments were reserved but never started.
                    for (slot, worker) in assignments {
                        if let Err(release) = self.allocator.release(worker, cost) {
                            warn!(%slot, worker, error = %release, "cannot release unstarted slot");
                        }
                    }
                    return Err(e);
                }
            }
            self.note_deficit(kind, plan.deficit);
        }
        Ok(())
    }

    fn note_deficit(&mut self, kind: JobKind, deficit: u32) {
        let previous = self.deficits.insert(kind, deficit).unwrap_or(0);
        if deficit == previous {
            return;
        }
        if deficit > 0 {
            warn!(
                %kind,
                unplaced = deficit,
                cost = %self.cost(kind),
                "resource exhaustion: no worker can accept {kind} jobs"
            );
        } else {
            info!(%kind, "all {kind} jobs placed");
        }
    }

    /// Start a job for `slot` on `worker`, whose budget already holds `cost`.
    fn start_slot(
        &mut self,
        slot: SlotId,
        worker: WorkerId,
        cost: Resources,
        started: &mut Vec<SlotId>,
        abandoned: &mut Vec<SlotId>,
    ) -> SchedulerResult<()> {
        let command = match self.command_for(slot, worker) {
            Ok(command) => command,
            Err(e) => {
                self.allocator.release(worker, cost)?;
                warn!(%slot, worker, error = %e, "cannot prepare job");
                return self.record_death(slot, Duration::ZERO, abandoned);
            }
        };

        let Some(fleet_worker) = self.registry.get(worker) else {
            self.allocator.release(worker, cost)?;
            return Ok(());
        };
        match self.supervisor.launch(
            &mut self.allocator,
            worker,
            &fleet_worker.remote,
            slot,
            cost,
            command,
        ) {
            Ok(job) => {
                if let Some(s) = self.slots.get_mut(&slot) {
                    s.state = SlotState::Active(job);
                }
                started.push(slot);
                Ok(())
            }
            Err(e) => {
                warn!(%slot, worker, error = %e, "launch failed");
                self.record_death(slot, Duration::ZERO, abandoned)
            }
        }
    }

    fn command_for(&self, slot: SlotId, worker: WorkerId) -> std::io::Result<CommandSpec> {
        let launch = self
            .registry
            .get(worker)
            .and_then(|w| w.launch(slot.kind))
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no launch entry for this kind")
            })?;
        let command = CommandSpec::new(launch.executable.clone(), vec![launch.model.clone()]);
        Ok(match slot.kind {
            JobKind::Training => command
                .stdin(self.replay.stdin_for(slot)?)
                .stdout(std::process::Stdio::piped()),
            JobKind::Selfplay => command.stdout(self.replay.stdout_for(slot)?),
        })
    }
}
