//! Process handles and launch descriptions.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};

use tokio::io::AsyncRead;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A readable output stream taken from a process.
pub type BoxRead = Box<dyn AsyncRead + Send + Unpin>;

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exit {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
}

impl Exit {
    pub fn code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn killed() -> Self {
        Self { code: None }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for Exit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

impl fmt::Display for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("killed by signal"),
        }
    }
}

/// What to run and where its standard streams go.
#[derive(Debug)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Stdio,
    pub stdout: Stdio,
    pub stderr: Stdio,
}

impl CommandSpec {
    /// A command with no stdin, discarded stdout and piped stderr.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            stdin: Stdio::null(),
            stdout: Stdio::null(),
            stderr: Stdio::piped(),
        }
    }

    pub fn stdin(mut self, stdin: impl Into<Stdio>) -> Self {
        self.stdin = stdin.into();
        self
    }

    pub fn stdout(mut self, stdout: impl Into<Stdio>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn stderr(mut self, stderr: impl Into<Stdio>) -> Self {
        self.stderr = stderr.into();
        self
    }
}

/// A handle to a started process.
pub trait Process: Send {
    /// OS process id of the local end, if any.
    fn id(&self) -> Option<u32>;

    /// Non-blocking liveness check: `Some` once the process has exited.
    fn try_exit(&mut self) -> std::io::Result<Option<Exit>>;

    fn take_stdout(&mut self) -> Option<BoxRead>;

    fn take_stderr(&mut self) -> Option<BoxRead>;

    /// Kill the process and wait for it to exit.
    fn terminate(&mut self) -> BoxFuture<'_, std::io::Result<Exit>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_display() {
        assert_eq!(Exit::code(3).to_string(), "exit code 3");
        assert_eq!(Exit::killed().to_string(), "killed by signal");
        assert!(Exit::code(0).success());
        assert!(!Exit::killed().success());
    }
}
