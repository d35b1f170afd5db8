//! Executor backed by the `ssh`, `scp` and `ssh-copy-id` binaries.

use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::debug;

use crate::destination::Destination;
use crate::error::{RemoteError, RemoteResult, TransferOp};
use crate::executor::Executor;
use crate::process::{BoxFuture, BoxRead, CommandSpec, Exit, Process};

/// Runs everything through the system's OpenSSH client.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    ssh: String,
    scp: String,
    copy_id: String,
    /// Extra `-o Key=Value` style options passed to both ssh and scp.
    options: Vec<String>,
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self {
            ssh: "ssh".to_string(),
            scp: "scp".to_string(),
            copy_id: "ssh-copy-id".to_string(),
            options: Vec::new(),
        }
    }
}

impl SshExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    fn ssh(&self, dest: &Destination) -> Command {
        let mut cmd = Command::new(&self.ssh);
        cmd.args(&self.options).arg(dest.to_string());
        cmd
    }

    fn scp(&self) -> Command {
        let mut cmd = Command::new(&self.scp);
        cmd.args(&self.options);
        cmd
    }
}

/// Run a command to completion, turning a nonzero exit into its stderr.
async fn run_captured(mut cmd: Command) -> Result<(), String> {
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| e.to_string())?;
    if output.status.success() {
        Ok(())
    } else {
        Err(format!(
            "{}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

/// Quote a word for the remote shell that ssh hands the command line to.
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

impl Executor for SshExecutor {
    fn spawn(&self, dest: &Destination, command: CommandSpec) -> RemoteResult<Box<dyn Process>> {
        let mut cmd = self.ssh(dest);
        cmd.arg(shell_quote(&command.program))
            .args(command.args.iter().map(|a| shell_quote(a)))
            .stdin(command.stdin)
            .stdout(command.stdout)
            .stderr(command.stderr)
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| RemoteError::Spawn {
            dest: dest.to_string(),
            program: command.program.clone(),
            source,
        })?;
        debug!(%dest, program = %command.program, pid = ?child.id(), "remote process started");
        Ok(Box::new(SshProcess { child }))
    }

    fn upload<'a>(
        &'a self,
        dest: &'a Destination,
        local: &'a Path,
        remote: &'a str,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            let mut cmd = self.scp();
            cmd.arg(local).arg(format!("{dest}:{remote}"));
            run_captured(cmd).await.map_err(|reason| RemoteError::Transfer {
                dest: dest.to_string(),
                op: TransferOp::Upload,
                reason,
            })
        })
    }

    fn download<'a>(
        &'a self,
        dest: &'a Destination,
        remote: &'a str,
        local: &'a Path,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            let mut cmd = self.scp();
            cmd.arg(format!("{dest}:{remote}")).arg(local);
            run_captured(cmd).await.map_err(|reason| RemoteError::Transfer {
                dest: dest.to_string(),
                op: TransferOp::Download,
                reason,
            })
        })
    }

    fn rename<'a>(
        &'a self,
        dest: &'a Destination,
        from: &'a str,
        to: &'a str,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            let mut cmd = self.ssh(dest);
            cmd.args(["mv", "-f"])
                .arg(shell_quote(from))
                .arg(shell_quote(to));
            run_captured(cmd).await.map_err(|reason| RemoteError::Transfer {
                dest: dest.to_string(),
                op: TransferOp::Rename,
                reason,
            })
        })
    }

    fn remove<'a>(
        &'a self,
        dest: &'a Destination,
        path: &'a str,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            let mut cmd = self.ssh(dest);
            cmd.args(["rm", "-f"]).arg(shell_quote(path));
            run_captured(cmd).await.map_err(|reason| RemoteError::Transfer {
                dest: dest.to_string(),
                op: TransferOp::Remove,
                reason,
            })
        })
    }

    fn authorize<'a>(&'a self, dest: &'a Destination) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            let mut cmd = Command::new(&self.copy_id);
            cmd.arg(dest.to_string());
            run_captured(cmd)
                .await
                .map_err(|reason| RemoteError::Authorization {
                    dest: dest.to_string(),
                    reason,
                })
        })
    }
}

/// The local `ssh` client process standing in for the remote one.
struct SshProcess {
    child: Child,
}

impl Process for SshProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_exit(&mut self) -> std::io::Result<Option<Exit>> {
        Ok(self.child.try_wait()?.map(Exit::from))
    }

    fn take_stdout(&mut self) -> Option<BoxRead> {
        self.child.stdout.take().map(|s| Box::new(s) as BoxRead)
    }

    fn take_stderr(&mut self) -> Option<BoxRead> {
        self.child.stderr.take().map(|s| Box::new(s) as BoxRead)
    }

    fn terminate(&mut self) -> BoxFuture<'_, std::io::Result<Exit>> {
        Box::pin(async move {
            if let Some(exit) = self.try_exit()? {
                return Ok(exit);
            }
            self.child.start_kill()?;
            Ok(self.child.wait().await?.into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_words_are_not_quoted() {
        assert_eq!(shell_quote("/opt/sigma/selfplay"), "/opt/sigma/selfplay");
        assert_eq!(shell_quote("model.ckpt"), "model.ckpt");
    }

    #[test]
    fn special_words_are_single_quoted() {
        assert_eq!(shell_quote("my model.ckpt"), "'my model.ckpt'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("$HOME"), "'$HOME'");
    }

    #[tokio::test]
    async fn spawn_failure_names_the_program() {
        let executor = SshExecutor {
            ssh: "/nonexistent/ssh-binary".to_string(),
            ..SshExecutor::default()
        };
        let dest = Destination::new("127.0.0.1", None);
        let result = executor.spawn(&dest, CommandSpec::new("selfplay", vec![]));
        match result {
            Err(RemoteError::Spawn { program, .. }) => assert_eq!(program, "selfplay"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("spawn of a missing binary succeeded"),
        }
    }

    #[tokio::test]
    async fn transfer_failure_is_reported_as_transfer_error() {
        let executor = SshExecutor {
            scp: "/nonexistent/scp-binary".to_string(),
            ..SshExecutor::default()
        };
        let dest = Destination::new("127.0.0.1", None);
        let err = executor
            .upload(&dest, Path::new("/tmp/x"), "/tmp/y")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RemoteError::Transfer {
                op: TransferOp::Upload,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn remove_failure_is_reported_as_remove() {
        let executor = SshExecutor {
            ssh: "/nonexistent/ssh-binary".to_string(),
            ..SshExecutor::default()
        };
        let dest = Destination::new("127.0.0.1", None);
        let err = executor.remove(&dest, "/tmp/y").await.unwrap_err();
        assert!(matches!(
            err,
            RemoteError::Transfer {
                op: TransferOp::Remove,
                ..
            }
        ));
    }
}
