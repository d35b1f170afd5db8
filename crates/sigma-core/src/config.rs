//! Fleet configuration document (`sigma.toml`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::types::{JobKind, Resources};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_TICK: Duration = Duration::from_secs(1);
const DEFAULT_STABLE_AFTER: Duration = Duration::from_secs(600);
const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Local working directory; checkpoints are staged under it.
    pub workdir: PathBuf,
    /// Canonical local path of the merged checkpoint.
    pub model: PathBuf,
    #[serde(default = "default_tick")]
    pub tick: String,
    #[serde(default)]
    pub merge: MergeKind,
    pub jobs: JobsConfig,
    #[serde(default)]
    pub supervision: SupervisionConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    pub workers: Vec<WorkerConfig>,
}

/// Checkpoint merge strategy selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeKind {
    #[default]
    KeepLatest,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default)]
    pub training: JobRequest,
    #[serde(default)]
    pub selfplay: JobRequest,
}

/// How many jobs of one kind to run, and what each one reserves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub cpus: u32,
    #[serde(default)]
    pub gpus: u32,
}

impl JobRequest {
    pub fn cost(&self) -> Resources {
        Resources::new(self.cpus, self.gpus)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisionConfig {
    /// Respawns allowed per slot before it is abandoned.
    #[serde(default = "default_max_respawns")]
    pub max_respawns: u32,
    /// Uptime after which a crash no longer counts as flapping.
    #[serde(default = "default_stable_after")]
    pub stable_after: String,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            max_respawns: default_max_respawns(),
            stable_after: default_stable_after(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_backoff")]
    pub backoff: String,
    #[serde(default = "default_max_backoff")]
    pub max_backoff: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff: default_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

/// One machine in the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub user: Option<String>,
    /// Install passwordless credentials before first use.
    #[serde(default)]
    pub authorize: bool,
    pub cpus: u32,
    #[serde(default)]
    pub gpus: u32,
    pub training: Option<LaunchConfig>,
    pub selfplay: Option<LaunchConfig>,
}

impl WorkerConfig {
    pub fn capacity(&self) -> Resources {
        Resources::new(self.cpus, self.gpus)
    }

    pub fn launch(&self, kind: JobKind) -> Option<&LaunchConfig> {
        match kind {
            JobKind::Training => self.training.as_ref(),
            JobKind::Selfplay => self.selfplay.as_ref(),
        }
    }
}

/// Executable and model path for one job kind on one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub executable: String,
    /// Remote checkpoint path, passed to the executable as its argument.
    pub model: String,
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("in config {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: FleetConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers.is_empty() {
            bail!("no workers configured");
        }
        for kind in JobKind::ALL {
            if self.request(kind).count > 0 && !self.workers.iter().any(|w| w.launch(kind).is_some())
            {
                bail!("{kind} jobs requested but no worker has a [{kind}] launch entry");
            }
        }
        if self.transfer.attempts == 0 {
            bail!("transfer.attempts must be at least 1");
        }
        for (field, value) in [
            ("tick", &self.tick),
            ("supervision.stable_after", &self.supervision.stable_after),
            ("transfer.backoff", &self.transfer.backoff),
            ("transfer.max_backoff", &self.transfer.max_backoff),
        ] {
            if parse_duration(value).is_none() {
                bail!("{field}: invalid duration {value:?}");
            }
        }
        if parse_duration(&self.tick).is_some_and(|tick| tick.is_zero()) {
            bail!("tick must be greater than zero");
        }
        Ok(())
    }

    pub fn request(&self, kind: JobKind) -> &JobRequest {
        match kind {
            JobKind::Training => &self.jobs.training,
            JobKind::Selfplay => &self.jobs.selfplay,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        parse_duration(&self.tick).unwrap_or(DEFAULT_TICK)
    }

    pub fn stable_after(&self) -> Duration {
        parse_duration(&self.supervision.stable_after).unwrap_or(DEFAULT_STABLE_AFTER)
    }

    pub fn transfer_backoff(&self) -> Duration {
        parse_duration(&self.transfer.backoff).unwrap_or(DEFAULT_BACKOFF)
    }

    pub fn transfer_max_backoff(&self) -> Duration {
        parse_duration(&self.transfer.max_backoff).unwrap_or(DEFAULT_MAX_BACKOFF)
    }

    /// Directory downloaded trainer checkpoints are staged in.
    pub fn staging_dir(&self) -> PathBuf {
        self.workdir.join("staging")
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_tick() -> String {
    "1s".to_string()
}

fn default_max_respawns() -> u32 {
    5
}

fn default_stable_after() -> String {
    "10m".to_string()
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff() -> String {
    "500ms".to_string()
}

fn default_max_backoff() -> String {
    "10s".to_string()
}
