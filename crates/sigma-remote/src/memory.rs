//! In-memory fleet that stands in for ssh in tests.
//!
//! Each destination gets a virtual filesystem keyed by remote path. Spawned
//! processes never run anything; tests drive them through the
//! [`ProcessControl`] recorded in each [`Launch`]: emit stdout lines, exit
//! with a code, or check whether the orchestrator terminated them.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncWriteExt, DuplexStream};

use crate::destination::Destination;
use crate::error::{RemoteError, RemoteResult, TransferOp};
use crate::executor::Executor;
use crate::process::{BoxFuture, BoxRead, CommandSpec, Exit, Process};

const STDOUT_BUFFER: usize = 64 * 1024;

#[derive(Default)]
struct Fleet {
    files: HashMap<(String, String), Vec<u8>>,
    launches: Vec<Launch>,
    next_pid: u32,
    denied: HashSet<String>,
    refusing: HashSet<String>,
    /// Destinations where every rename fails.
    stuck: HashSet<String>,
    /// Destination → number of upcoming transfers that fail.
    failing: HashMap<String, u32>,
}

impl Fleet {
    fn take_failure(&mut self, dest: &str) -> bool {
        match self.failing.get_mut(dest) {
            Some(0) | None => false,
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                true
            }
        }
    }
}

/// A fleet simulated entirely in memory. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryExecutor {
    fleet: Arc<Mutex<Fleet>>,
}

/// A process started through a [`MemoryExecutor`].
#[derive(Clone)]
pub struct Launch {
    pub dest: String,
    pub program: String,
    pub args: Vec<String>,
    pub control: ProcessControl,
}

#[derive(Default)]
struct ProcState {
    exit: Option<Exit>,
    terminated: bool,
}

/// Test-side handle to a simulated process.
#[derive(Clone)]
pub struct ProcessControl {
    state: Arc<Mutex<ProcState>>,
    stdout: Arc<tokio::sync::Mutex<Option<DuplexStream>>>,
}

impl ProcessControl {
    /// Make the process exit with `code`, closing its stdout.
    pub fn exit(&self, code: i32) {
        lock(&self.state).exit.get_or_insert(Exit::code(code));
        if let Ok(mut stdout) = self.stdout.try_lock() {
            stdout.take();
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).exit.is_none()
    }

    /// Whether the orchestrator killed this process.
    pub fn was_terminated(&self) -> bool {
        lock(&self.state).terminated
    }

    /// Write one newline-terminated line to the process's stdout.
    pub async fn emit_line(&self, line: &str) -> io::Result<()> {
        let mut stdout = self.stdout.lock().await;
        let writer = stdout
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdout closed"))?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }
}

struct MemoryProcess {
    pid: u32,
    state: Arc<Mutex<ProcState>>,
    stdout: Option<DuplexStream>,
    stdout_writer: Arc<tokio::sync::Mutex<Option<DuplexStream>>>,
}

impl Process for MemoryProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_exit(&mut self) -> io::Result<Option<Exit>> {
        Ok(lock(&self.state).exit)
    }

    fn take_stdout(&mut self) -> Option<BoxRead> {
        self.stdout.take().map(|s| Box::new(s) as BoxRead)
    }

    fn take_stderr(&mut self) -> Option<BoxRead> {
        None
    }

    fn terminate(&mut self) -> BoxFuture<'_, io::Result<Exit>> {
        Box::pin(async move {
            let exit = {
                let mut state = lock(&self.state);
                if state.exit.is_none() {
                    state.terminated = true;
                }
                *state.exit.get_or_insert(Exit::killed())
            };
            self.stdout_writer.lock().await.take();
            Ok(exit)
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn fleet(&self) -> MutexGuard<'_, Fleet> {
        lock(&self.fleet)
    }

    /// Every process launched so far, in launch order.
    pub fn launches(&self) -> Vec<Launch> {
        self.fleet().launches.clone()
    }

    /// Launches whose program is `program`.
    pub fn launches_of(&self, program: &str) -> Vec<Launch> {
        self.fleet()
            .launches
            .iter()
            .filter(|l| l.program == program)
            .cloned()
            .collect()
    }

    /// Contents of `path` on `dest`, if present.
    pub fn file(&self, dest: &Destination, path: &str) -> Option<Vec<u8>> {
        self.fleet()
            .files
            .get(&(dest.to_string(), path.to_string()))
            .cloned()
    }

    pub fn put_file(&self, dest: &Destination, path: &str, contents: impl Into<Vec<u8>>) {
        self.fleet()
            .files
            .insert((dest.to_string(), path.to_string()), contents.into());
    }

    /// Paths present on `dest`, sorted.
    pub fn paths(&self, dest: &Destination) -> Vec<String> {
        let key = dest.to_string();
        let mut paths: Vec<String> = self
            .fleet()
            .files
            .keys()
            .filter(|(d, _)| *d == key)
            .map(|(_, p)| p.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Make `authorize` fail for `dest`.
    pub fn deny_authorization(&self, dest: &Destination) {
        self.fleet().denied.insert(dest.to_string());
    }

    /// Make `spawn` fail for `dest`.
    pub fn refuse_spawns(&self, dest: &Destination) {
        self.fleet().refusing.insert(dest.to_string());
    }

    /// Fail the next `times` transfers (upload, download or rename) to `dest`.
    pub fn fail_transfers(&self, dest: &Destination, times: u32) {
        self.fleet().failing.insert(dest.to_string(), times);
    }

    /// Make every rename on `dest` fail.
    pub fn fail_renames(&self, dest: &Destination) {
        self.fleet().stuck.insert(dest.to_string());
    }

    fn transfer_error(dest: &Destination, op: TransferOp, reason: &str) -> RemoteError {
        RemoteError::Transfer {
            dest: dest.to_string(),
            op,
            reason: reason.to_string(),
        }
    }
}

impl Executor for MemoryExecutor {
    fn spawn(&self, dest: &Destination, command: CommandSpec) -> RemoteResult<Box<dyn Process>> {
        let mut fleet = self.fleet();
        if fleet.refusing.contains(&dest.to_string()) {
            return Err(RemoteError::Spawn {
                dest: dest.to_string(),
                program: command.program,
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "spawn refused"),
            });
        }

        fleet.next_pid += 1;
        let pid = fleet.next_pid;
        let (reader, writer) = tokio::io::duplex(STDOUT_BUFFER);
        let state = Arc::new(Mutex::new(ProcState::default()));
        let stdout_writer = Arc::new(tokio::sync::Mutex::new(Some(writer)));

        fleet.launches.push(Launch {
            dest: dest.to_string(),
            program: command.program,
            args: command.args,
            control: ProcessControl {
                state: Arc::clone(&state),
                stdout: Arc::clone(&stdout_writer),
            },
        });

        Ok(Box::new(MemoryProcess {
            pid,
            state,
            stdout: Some(reader),
            stdout_writer,
        }))
    }

    fn upload<'a>(
        &'a self,
        dest: &'a Destination,
        local: &'a Path,
        remote: &'a str,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            let injected = self.fleet().take_failure(&dest.to_string());
            if injected {
                return Err(Self::transfer_error(dest, TransferOp::Upload, "injected failure"));
            }
            let contents = tokio::fs::read(local)
                .await
                .map_err(|e| Self::transfer_error(dest, TransferOp::Upload, &e.to_string()))?;
            self.put_file(dest, remote, contents);
            Ok(())
        })
    }

    fn download<'a>(
        &'a self,
        dest: &'a Destination,
        remote: &'a str,
        local: &'a Path,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            let injected = self.fleet().take_failure(&dest.to_string());
            if injected {
                return Err(Self::transfer_error(dest, TransferOp::Download, "injected failure"));
            }
            let contents = self
                .file(dest, remote)
                .ok_or_else(|| Self::transfer_error(dest, TransferOp::Download, "no such file"))?;
            tokio::fs::write(local, contents)
                .await
                .map_err(|e| Self::transfer_error(dest, TransferOp::Download, &e.to_string()))
        })
    }

    fn rename<'a>(
        &'a self,
        dest: &'a Destination,
        from: &'a str,
        to: &'a str,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            let mut fleet = self.fleet();
            let key = dest.to_string();
            if fleet.stuck.contains(&key) || fleet.take_failure(&key) {
                return Err(Self::transfer_error(dest, TransferOp::Rename, "injected failure"));
            }
            let contents = fleet
                .files
                .remove(&(key.clone(), from.to_string()))
                .ok_or_else(|| Self::transfer_error(dest, TransferOp::Rename, "no such file"))?;
            fleet.files.insert((key, to.to_string()), contents);
            Ok(())
        })
    }

    fn remove<'a>(
        &'a self,
        dest: &'a Destination,
        path: &'a str,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            self.fleet()
                .files
                .remove(&(dest.to_string(), path.to_string()));
            Ok(())
        })
    }

    fn authorize<'a>(&'a self, dest: &'a Destination) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            let denied = self.fleet().denied.contains(&dest.to_string());
            if denied {
                return Err(RemoteError::Authorization {
                    dest: dest.to_string(),
                    reason: "permission denied (publickey)".to_string(),
                });
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn dest(host: &str) -> Destination {
        Destination::new(host, Some("sigma".to_string()))
    }

    #[tokio::test]
    async fn upload_then_download_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("model.ckpt");
        let back = dir.path().join("back.ckpt");
        let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        tokio::fs::write(&local, &payload).await.unwrap();

        let executor = MemoryExecutor::new();
        let d = dest("a");
        executor.upload(&d, &local, "/srv/model.ckpt").await.unwrap();
        executor.download(&d, "/srv/model.ckpt", &back).await.unwrap();

        assert_eq!(tokio::fs::read(&back).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn files_are_per_destination() {
        let executor = MemoryExecutor::new();
        executor.put_file(&dest("a"), "/m", b"x".to_vec());
        assert!(executor.file(&dest("a"), "/m").is_some());
        assert!(executor.file(&dest("b"), "/m").is_none());
    }

    #[tokio::test]
    async fn rename_moves_content() {
        let executor = MemoryExecutor::new();
        let d = dest("a");
        executor.put_file(&d, "/tmp.ckpt", b"new".to_vec());
        executor.put_file(&d, "/model.ckpt", b"old".to_vec());
        executor.rename(&d, "/tmp.ckpt", "/model.ckpt").await.unwrap();

        assert_eq!(executor.file(&d, "/model.ckpt").unwrap(), b"new");
        assert_eq!(executor.paths(&d), vec!["/model.ckpt".to_string()]);
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("m");
        tokio::fs::write(&local, b"m").await.unwrap();

        let executor = MemoryExecutor::new();
        let d = dest("a");
        executor.fail_transfers(&d, 1);
        assert!(executor.upload(&d, &local, "/m").await.is_err());
        assert!(executor.upload(&d, &local, "/m").await.is_ok());
    }

    #[tokio::test]
    async fn control_drives_process() {
        let executor = MemoryExecutor::new();
        let mut process = executor
            .spawn(&dest("a"), CommandSpec::new("training", vec!["/m".into()]))
            .unwrap();
        let launch = executor.launches_of("training").pop().unwrap();
        assert_eq!(launch.args, vec!["/m".to_string()]);

        let stdout = process.take_stdout().unwrap();
        launch.control.emit_line("checkpoint").await.unwrap();
        let mut lines = BufReader::new(stdout).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("checkpoint"));

        assert_eq!(process.try_exit().unwrap(), None);
        launch.control.exit(2);
        assert_eq!(process.try_exit().unwrap(), Some(Exit::code(2)));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn terminate_marks_process_killed() {
        let executor = MemoryExecutor::new();
        let mut process = executor
            .spawn(&dest("a"), CommandSpec::new("selfplay", vec![]))
            .unwrap();
        let control = executor.launches()[0].control.clone();

        let exit = process.terminate().await.unwrap();
        assert_eq!(exit, Exit::killed());
        assert!(control.was_terminated());
        assert!(!control.is_running());
    }

    #[tokio::test]
    async fn denied_authorization_fails() {
        let executor = MemoryExecutor::new();
        executor.deny_authorization(&dest("a"));
        assert!(matches!(
            executor.authorize(&dest("a")).await,
            Err(RemoteError::Authorization { .. })
        ));
        assert!(executor.authorize(&dest("b")).await.is_ok());
    }
}
