//! One distribution round: stage, merge, publish, fan out.
//!
//! ```text
//! signals ──► collapse per trainer ──► download to staging/<slot>.ckpt
//!                                            │ (failed downloads dropped)
//!                                            ▼
//!                                   MergeStrategy::merge
//!                                            │
//!                                            ▼
//!                          publish_atomic → canonical model path
//!                                            │
//!                      JoinSet ──► upload_atomic to every selfplay worker
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sigma_core::SlotId;
use sigma_remote::RemoteWorker;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::checkpoint::{ModelCheckpoint, publish_atomic};
use crate::error::{DistributionError, DistributionResult};
use crate::strategy::MergeStrategy;

/// A trainer reported a new checkpoint at `remote_path` on `source`.
#[derive(Debug, Clone)]
pub struct CheckpointSignal {
    pub trainer: SlotId,
    pub source: RemoteWorker,
    pub remote_path: String,
}

/// A selfplay worker and the path its model lives at.
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub remote: RemoteWorker,
    pub remote_path: String,
}

/// What a round did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionReport {
    /// Publish counter of the merged checkpoint.
    pub version: u64,
    /// Trainers whose checkpoints were staged, in report order.
    pub sources: Vec<SlotId>,
    /// Trainer whose checkpoint was published.
    pub chosen: SlotId,
    /// Destinations that received the checkpoint.
    pub delivered: Vec<String>,
    /// Destinations whose upload failed after retries.
    pub failed: Vec<String>,
}

impl DistributionReport {
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

pub struct Distributor {
    canonical: PathBuf,
    staging: PathBuf,
    strategy: Box<dyn MergeStrategy>,
    trainer_versions: HashMap<SlotId, u64>,
    published: u64,
}

impl Distributor {
    pub fn new(
        canonical: impl Into<PathBuf>,
        staging: impl Into<PathBuf>,
        strategy: Box<dyn MergeStrategy>,
    ) -> Self {
        Self {
            canonical: canonical.into(),
            staging: staging.into(),
            strategy,
            trainer_versions: HashMap::new(),
            published: 0,
        }
    }

    pub fn canonical(&self) -> &Path {
        &self.canonical
    }

    /// Publish counter of the last merged checkpoint, 0 before the first.
    pub fn published_version(&self) -> u64 {
        self.published
    }

    pub fn trainer_version(&self, trainer: SlotId) -> u64 {
        self.trainer_versions.get(&trainer).copied().unwrap_or(0)
    }

    fn staging_path(&self, trainer: SlotId) -> PathBuf {
        self.staging.join(format!("{trainer}.ckpt"))
    }

    /// Run one round over the signals collected during a tick.
    ///
    /// Fails only when nothing could be staged or the local publish failed.
    /// Upload failures are reported in the returned report.
    pub async fn distribute(
        &mut self,
        signals: Vec<CheckpointSignal>,
        targets: &[UploadTarget],
    ) -> DistributionResult<DistributionReport> {
        let mut round: Vec<CheckpointSignal> = Vec::new();
        for signal in signals {
            *self.trainer_versions.entry(signal.trainer).or_insert(0) += 1;
            if !round.iter().any(|s| s.trainer == signal.trainer) {
                round.push(signal);
            }
        }

        tokio::fs::create_dir_all(&self.staging)
            .await
            .map_err(DistributionError::io("create", &self.staging))?;

        let mut staged = Vec::with_capacity(round.len());
        for signal in &round {
            let local = self.staging_path(signal.trainer);
            match signal.source.download(&signal.remote_path, &local).await {
                Ok(()) => staged.push(ModelCheckpoint {
                    path: local,
                    version: self.trainer_version(signal.trainer),
                    trainer: signal.trainer,
                }),
                Err(e) => warn!(
                    trainer = %signal.trainer,
                    dest = %signal.source.destination(),
                    error = %e,
                    "checkpoint download failed, trainer skipped this round"
                ),
            }
        }

        let chosen = self
            .strategy
            .merge(&staged)
            .ok_or(DistributionError::NothingStaged)?
            .clone();
        publish_atomic(&chosen.path, &self.canonical).await?;
        self.published += 1;
        info!(
            version = self.published,
            trainer = %chosen.trainer,
            trainer_version = chosen.version,
            strategy = self.strategy.name(),
            "merged checkpoint published"
        );

        let (delivered, failed) = self.fan_out(targets).await;
        Ok(DistributionReport {
            version: self.published,
            sources: staged.iter().map(|c| c.trainer).collect(),
            chosen: chosen.trainer,
            delivered,
            failed,
        })
    }

    /// Upload the canonical checkpoint to every target concurrently.
    async fn fan_out(&self, targets: &[UploadTarget]) -> (Vec<String>, Vec<String>) {
        let mut tasks = JoinSet::new();
        for target in targets {
            let target = target.clone();
            let canonical = self.canonical.clone();
            tasks.spawn(async move {
                let dest = target.remote.destination().to_string();
                let result = target
                    .remote
                    .upload_atomic(&canonical, &target.remote_path)
                    .await;
                (dest, result)
            });
        }

        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((dest, Ok(()))) => delivered.push(dest),
                Ok((dest, Err(e))) => {
                    warn!(%dest, error = %e, "checkpoint upload failed");
                    failed.push(dest);
                }
                Err(e) => warn!(error = %e, "upload task panicked"),
            }
        }
        delivered.sort();
        failed.sort();
        (delivered, failed)
    }
}
