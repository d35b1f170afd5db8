//! A single fleet machine as seen by the orchestrator.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::destination::Destination;
use crate::error::RemoteResult;
use crate::executor::Executor;
use crate::process::{CommandSpec, Process};
use crate::retry::RetryPolicy;

/// A remote host plus the executor used to reach it.
#[derive(Clone)]
pub struct RemoteWorker {
    dest: Destination,
    executor: Arc<dyn Executor>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for RemoteWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteWorker")
            .field("dest", &self.dest)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl RemoteWorker {
    pub fn new(dest: Destination, executor: Arc<dyn Executor>, retry: RetryPolicy) -> Self {
        Self {
            dest,
            executor,
            retry,
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.dest
    }

    /// Install passwordless credentials. Attempted once, never retried.
    pub async fn authorize(&self) -> RemoteResult<()> {
        self.executor.authorize(&self.dest).await?;
        info!(dest = %self.dest, "worker authorized");
        Ok(())
    }

    /// Start `command` on this worker and return immediately.
    pub fn run_command(&self, command: CommandSpec) -> RemoteResult<Box<dyn Process>> {
        self.executor.spawn(&self.dest, command)
    }

    pub async fn upload(&self, local: &Path, remote: &str) -> RemoteResult<()> {
        let executor = &*self.executor;
        let dest = &self.dest;
        self.retry
            .run("upload", move || executor.upload(dest, local, remote))
            .await
    }

    pub async fn download(&self, remote: &str, local: &Path) -> RemoteResult<()> {
        let executor = &*self.executor;
        let dest = &self.dest;
        self.retry
            .run("download", move || executor.download(dest, remote, local))
            .await
    }

    /// Upload to a sibling temp path, then rename it over `remote`.
    ///
    /// A reader of `remote` sees the old file or the new one, never a prefix.
    pub async fn upload_atomic(&self, local: &Path, remote: &str) -> RemoteResult<()> {
        let tmp = temp_sibling(remote);
        self.upload(local, &tmp).await?;

        let executor = &*self.executor;
        let dest = &self.dest;
        let from = tmp.as_str();
        let renamed = self
            .retry
            .run("rename", move || executor.rename(dest, from, remote))
            .await;
        if let Err(e) = renamed {
            if let Err(cleanup) = executor.remove(dest, from).await {
                warn!(dest = %self.dest, path = from, error = %cleanup, "temp file left behind");
            }
            return Err(e);
        }
        debug!(dest = %self.dest, path = remote, "published");
        Ok(())
    }
}

/// Hidden temp file next to `path`: `/a/b.ckpt` becomes `/a/.b.ckpt.sigma-tmp`.
pub fn temp_sibling(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, name)) => format!("{dir}/.{name}.sigma-tmp"),
        None => format!(".{path}.sigma-tmp"),
    }
}
