//! The job table.
//!
//! The supervisor owns every live job handle. It is driven entirely by the
//! scheduler loop: `launch` after a reservation, `poll` once per tick,
//! `drain_events` to collect output signals and `shutdown` at exit. Dead
//! jobs leave the table in the same step that releases their cost, so no
//! job can give its reservation back twice.

use std::collections::BTreeMap;
use std::io::Write;

use sigma_core::{JobId, Resources, SlotId, WorkerId};
use sigma_placement::Allocator;
use sigma_remote::{BoxRead, CommandSpec, Exit, LinePrefixer, RemoteWorker, forward_prefixed};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{SupervisorError, SupervisorResult};
use crate::job::{Death, Job, JobEvent};

/// Where forwarded job stderr ends up.
pub type StderrSink = fn() -> Box<dyn Write + Send>;

fn process_stderr() -> Box<dyn Write + Send> {
    Box::new(std::io::stderr())
}

pub struct Supervisor {
    jobs: BTreeMap<JobId, Job>,
    next_id: u64,
    events_tx: mpsc::UnboundedSender<JobEvent>,
    events_rx: mpsc::UnboundedReceiver<JobEvent>,
    stderr: StderrSink,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            jobs: BTreeMap::new(),
            next_id: 0,
            events_tx,
            events_rx,
            stderr: process_stderr,
        }
    }

    /// Send forwarded job stderr somewhere other than our own stderr.
    pub fn with_stderr(mut self, sink: StderrSink) -> Self {
        self.stderr = sink;
        self
    }

    /// Start a job whose `cost` is already reserved on `worker`.
    ///
    /// On spawn failure the reservation is released before the error is
    /// returned, so the caller never has to.
    pub fn launch(
        &mut self,
        allocator: &mut Allocator,
        worker: WorkerId,
        remote: &RemoteWorker,
        slot: SlotId,
        cost: Resources,
        command: CommandSpec,
    ) -> SupervisorResult<JobId> {
        let program = command.program.clone();
        let mut process = match remote.run_command(command) {
            Ok(process) => process,
            Err(e) => {
                allocator.release(worker, cost)?;
                warn!(%slot, worker, dest = %remote.destination(), error = %e, "spawn failed");
                return Err(e.into());
            }
        };

        self.next_id += 1;
        let id = JobId(self.next_id);

        let mut tasks = Vec::new();
        if let Some(stdout) = process.take_stdout() {
            tasks.push(spawn_stdout_reader(
                stdout,
                id,
                slot,
                worker,
                self.events_tx.clone(),
            ));
        }
        if let Some(stderr) = process.take_stderr() {
            let prefix = format!("[{slot}@{}] ", remote.destination());
            tasks.push(spawn_stderr_forwarder(stderr, prefix, (self.stderr)()));
        }

        info!(
            job = %id,
            %slot,
            worker,
            dest = %remote.destination(),
            %program,
            pid = ?process.id(),
            "job started"
        );
        self.jobs.insert(
            id,
            Job {
                id,
                slot,
                worker,
                cost,
                started_at: Instant::now(),
                process,
                tasks,
            },
        );
        Ok(id)
    }

    /// Check every job without blocking. Jobs that exited are removed, their
    /// cost released, and reported.
    pub fn poll(&mut self, allocator: &mut Allocator) -> Vec<Death> {
        let mut exited = Vec::new();
        for (id, job) in &mut self.jobs {
            match job.process.try_exit() {
                Ok(None) => {}
                Ok(Some(exit)) => exited.push((*id, Some(exit))),
                Err(e) => {
                    warn!(job = %id, slot = %job.slot, error = %e, "liveness check failed, treating job as dead");
                    exited.push((*id, None));
                }
            }
        }

        exited
            .into_iter()
            .filter_map(|(id, exit)| self.retire(allocator, id, exit))
            .collect()
    }

    /// Remove a job from the table, releasing its reservation.
    fn retire(&mut self, allocator: &mut Allocator, id: JobId, exit: Option<Exit>) -> Option<Death> {
        let job = self.jobs.remove(&id)?;
        if let Err(e) = allocator.release(job.worker, job.cost) {
            error!(job = %id, worker = job.worker, error = %e, "release failed");
        }
        let uptime = job.uptime();
        match exit {
            Some(exit) => warn!(job = %id, slot = %job.slot, worker = job.worker, %exit, ?uptime, "job died"),
            None => warn!(job = %id, slot = %job.slot, worker = job.worker, ?uptime, "job lost"),
        }
        Some(Death {
            job: id,
            slot: job.slot,
            worker: job.worker,
            cost: job.cost,
            exit,
            uptime,
        })
    }

    /// Every event queued since the last call, oldest first.
    pub fn drain_events(&mut self) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Kill one job and release its reservation.
    pub async fn terminate(&mut self, allocator: &mut Allocator, id: JobId) -> SupervisorResult<Death> {
        let exit = {
            let job = self.jobs.get_mut(&id).ok_or(SupervisorError::UnknownJob(id))?;
            abort_tasks(job);
            job.process.terminate().await.ok()
        };
        self.retire(allocator, id, exit)
            .ok_or(SupervisorError::UnknownJob(id))
    }

    /// Kill every job, wait for each to exit and release all reservations.
    pub async fn shutdown(&mut self, allocator: &mut Allocator) -> Vec<Death> {
        let ids: Vec<JobId> = self.jobs.keys().copied().collect();
        let mut deaths = Vec::with_capacity(ids.len());
        for id in ids {
            match self.terminate(allocator, id).await {
                Ok(death) => deaths.push(death),
                Err(e) => error!(job = %id, error = %e, "terminate failed"),
            }
        }
        info!(jobs = deaths.len(), "all jobs terminated");
        deaths
    }

    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// The live job currently bound to `slot`, if any.
    pub fn job_for_slot(&self, slot: SlotId) -> Option<&Job> {
        self.jobs.values().find(|j| j.slot == slot)
    }

    /// Total cost of live jobs on `worker`.
    pub fn reserved_on(&self, worker: WorkerId) -> Resources {
        self.jobs
            .values()
            .filter(|j| j.worker == worker)
            .map(|j| j.cost)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

fn abort_tasks(job: &mut Job) {
    for task in job.tasks.drain(..) {
        task.abort();
    }
}

/// Turn each stdout line into a checkpoint signal. Line content is ignored.
fn spawn_stdout_reader(
    stdout: BoxRead,
    job: JobId,
    slot: SlotId,
    worker: WorkerId,
    events: mpsc::UnboundedSender<JobEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    debug!(%job, %slot, "checkpoint signal");
                    if events.send(JobEvent::Checkpoint { job, slot, worker }).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!(%job, %slot, error = %e, "stdout read failed");
                    break;
                }
            }
        }
        let _ = events.send(JobEvent::OutputClosed { job, slot });
    })
}

fn spawn_stderr_forwarder(
    stderr: BoxRead,
    prefix: String,
    sink: Box<dyn Write + Send>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut writer = LinePrefixer::new(sink, prefix);
        if let Err(e) = forward_prefixed(stderr, &mut writer).await {
            debug!(error = %e, "stderr forwarding stopped");
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use sigma_core::JobKind;
    use sigma_remote::{Destination, MemoryExecutor, RetryPolicy};

    use super::*;

    const SELFPLAY: Resources = Resources::new(1, 0);

    fn fleet(hosts: usize) -> (MemoryExecutor, Vec<RemoteWorker>) {
        let executor = MemoryExecutor::new();
        let workers = (0..hosts)
            .map(|i| {
                RemoteWorker::new(
                    Destination::new(format!("10.0.0.{i}"), None),
                    Arc::new(executor.clone()),
                    RetryPolicy::once(),
                )
            })
            .collect();
        (executor, workers)
    }

    fn selfplay(index: u32) -> SlotId {
        SlotId::new(JobKind::Selfplay, index)
    }

    fn launch(
        sup: &mut Supervisor,
        alloc: &mut Allocator,
        workers: &[RemoteWorker],
        worker: WorkerId,
        slot: SlotId,
    ) -> JobId {
        alloc.reserve(worker, SELFPLAY).unwrap();
        sup.launch(
            alloc,
            worker,
            &workers[worker],
            slot,
            SELFPLAY,
            CommandSpec::new("selfplay", vec!["/srv/play.ckpt".into()]),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn dead_job_releases_once() {
        let (executor, workers) = fleet(1);
        let mut alloc = Allocator::new([Resources::new(2, 0)]);
        let mut sup = Supervisor::new();
        let id = launch(&mut sup, &mut alloc, &workers, 0, selfplay(0));
        assert_eq!(alloc.available(0).unwrap(), Resources::new(1, 0));

        executor.launches()[0].control.exit(1);
        let deaths = sup.poll(&mut alloc);
        assert_eq!(deaths.len(), 1);
        assert_eq!(deaths[0].job, id);
        assert_eq!(deaths[0].exit, Some(Exit::code(1)));
        assert_eq!(alloc.available(0).unwrap(), Resources::new(2, 0));

        assert!(sup.poll(&mut alloc).is_empty());
        assert_eq!(alloc.available(0).unwrap(), Resources::new(2, 0));
        assert!(sup.is_empty());
    }

    #[tokio::test]
    async fn table_holds_only_running_jobs() {
        let (executor, workers) = fleet(1);
        let mut alloc = Allocator::new([Resources::new(2, 0)]);
        let mut sup = Supervisor::new();
        let first = launch(&mut sup, &mut alloc, &workers, 0, selfplay(0));
        let second = launch(&mut sup, &mut alloc, &workers, 0, selfplay(1));
        assert_eq!(sup.reserved_on(0), Resources::new(2, 0));

        executor.launches()[0].control.exit(0);
        sup.poll(&mut alloc);
        assert!(sup.job(first).is_none());
        assert_eq!(sup.job(second).map(|j| j.slot), Some(selfplay(1)));
        assert_eq!(sup.reserved_on(0), SELFPLAY);
        assert_eq!(alloc.available(0).unwrap(), Resources::new(1, 0));
    }

    #[tokio::test]
    async fn spawn_failure_releases_reservation() {
        let (executor, workers) = fleet(1);
        executor.refuse_spawns(workers[0].destination());
        let mut alloc = Allocator::new([Resources::new(2, 0)]);
        let mut sup = Supervisor::new();

        alloc.reserve(0, SELFPLAY).unwrap();
        let result = sup.launch(
            &mut alloc,
            0,
            &workers[0],
            selfplay(0),
            SELFPLAY,
            CommandSpec::new("selfplay", vec![]),
        );
        assert!(matches!(result, Err(SupervisorError::Remote(_))));
        assert_eq!(alloc.available(0).unwrap(), Resources::new(2, 0));
        assert!(sup.is_empty());
    }

    #[tokio::test]
    async fn stdout_lines_become_checkpoint_events() {
        let (executor, workers) = fleet(1);
        let mut alloc = Allocator::new([Resources::new(2, 1)]);
        let mut sup = Supervisor::new();
        let slot = SlotId::new(JobKind::Training, 0);

        alloc.reserve(0, Resources::new(1, 1)).unwrap();
        let id = sup
            .launch(
                &mut alloc,
                0,
                &workers[0],
                slot,
                Resources::new(1, 1),
                CommandSpec::new("training", vec![]).stdout(std::process::Stdio::piped()),
            )
            .unwrap();

        let control = executor.launches()[0].control.clone();
        control.emit_line("saved").await.unwrap();
        control.emit_line("saved").await.unwrap();
        control.exit(0);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let events = sup.drain_events();
        assert_eq!(
            events,
            vec![
                JobEvent::Checkpoint { job: id, slot, worker: 0 },
                JobEvent::Checkpoint { job: id, slot, worker: 0 },
                JobEvent::OutputClosed { job: id, slot },
            ]
        );
        assert!(sup.drain_events().is_empty());
    }

    #[tokio::test]
    async fn shutdown_terminates_everything() {
        let (executor, workers) = fleet(2);
        let mut alloc = Allocator::new([Resources::new(2, 0), Resources::new(2, 0)]);
        let mut sup = Supervisor::new();
        launch(&mut sup, &mut alloc, &workers, 0, selfplay(0));
        launch(&mut sup, &mut alloc, &workers, 1, selfplay(1));
        launch(&mut sup, &mut alloc, &workers, 1, selfplay(2));

        let deaths = sup.shutdown(&mut alloc).await;
        assert_eq!(deaths.len(), 3);
        assert!(deaths.iter().all(|d| d.exit == Some(Exit::killed())));
        assert!(executor.launches().iter().all(|l| l.control.was_terminated()));
        assert_eq!(alloc.available(0).unwrap(), Resources::new(2, 0));
        assert_eq!(alloc.available(1).unwrap(), Resources::new(2, 0));
    }

    #[tokio::test]
    async fn terminate_unknown_job_fails() {
        let mut alloc = Allocator::new([Resources::new(1, 0)]);
        let mut sup = Supervisor::new();
        assert!(matches!(
            sup.terminate(&mut alloc, JobId(42)).await,
            Err(SupervisorError::UnknownJob(JobId(42)))
        ));
    }

    #[tokio::test]
    async fn job_for_slot_tracks_current_incarnation() {
        let (executor, workers) = fleet(1);
        let mut alloc = Allocator::new([Resources::new(2, 0)]);
        let mut sup = Supervisor::new();
        let first = launch(&mut sup, &mut alloc, &workers, 0, selfplay(0));
        assert_eq!(sup.job_for_slot(selfplay(0)).map(|j| j.id), Some(first));

        executor.launches()[0].control.exit(1);
        sup.poll(&mut alloc);
        assert!(sup.job_for_slot(selfplay(0)).is_none());

        let second = launch(&mut sup, &mut alloc, &workers, 0, selfplay(0));
        assert_ne!(first, second);
        assert_eq!(sup.job_for_slot(selfplay(0)).map(|j| j.id), Some(second));
    }

    /// Random spawn / die / poll / respawn sequences never drift a budget.
    #[tokio::test]
    async fn random_lifecycles_release_exactly_once() {
        let capacities = [Resources::new(3, 0), Resources::new(2, 0)];
        for seed in 0..10u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let (executor, workers) = fleet(capacities.len());
            let mut alloc = Allocator::new(capacities);
            let mut sup = Supervisor::new();
            let mut next_slot = 0;

            for _ in 0..200 {
                match rng.random_range(0..4) {
                    0 => {
                        let worker = rng.random_range(0..capacities.len());
                        if alloc.can_host(worker, SELFPLAY) {
                            launch(&mut sup, &mut alloc, &workers, worker, selfplay(next_slot));
                            next_slot += 1;
                        }
                    }
                    1 => {
                        let launches = executor.launches();
                        if !launches.is_empty() {
                            // May hit an already-dead process; exit is sticky.
                            launches[rng.random_range(0..launches.len())].control.exit(1);
                        }
                    }
                    _ => {
                        sup.poll(&mut alloc);
                    }
                }

                for (worker, capacity) in capacities.iter().enumerate() {
                    let live = sup.reserved_on(worker);
                    assert_eq!(
                        alloc.available(worker).unwrap().checked_add(live),
                        Some(*capacity),
                        "seed {seed}: worker {worker} drifted"
                    );
                }
            }
        }
    }
}
