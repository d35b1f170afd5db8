//! sigma-remote — handles to the machines in a SigmaGrid fleet.
//!
//! A [`RemoteWorker`] pairs a [`Destination`] (`user@host`) with an
//! [`Executor`], the only network-facing seam the orchestrator has. The
//! production executor shells out to `ssh`, `scp` and `ssh-copy-id`; the
//! in-memory executor (feature `memory`) simulates a fleet for tests.
//!
//! # Architecture
//!
//! ```text
//! RemoteWorker
//!   ├── Destination (user@host)
//!   ├── RetryPolicy (bounded attempts, exponential backoff)
//!   └── Arc<dyn Executor>
//!       ├── SshExecutor    : ssh / scp / ssh-copy-id subprocesses
//!       └── MemoryExecutor : virtual filesystem + scripted processes
//! ```
//!
//! Processes are started fire-and-forget and returned as `Box<dyn Process>`
//! handles that support non-blocking liveness checks. Transfers are awaited
//! and retried; authorization is attempted exactly once.

pub mod destination;
pub mod error;
pub mod executor;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
pub mod prefix;
pub mod process;
pub mod retry;
pub mod ssh;
pub mod worker;

pub use destination::Destination;
pub use error::{RemoteError, RemoteResult, TransferOp};
pub use executor::Executor;
#[cfg(any(test, feature = "memory"))]
pub use memory::{Launch, MemoryExecutor, ProcessControl};
pub use prefix::{LinePrefixer, forward_prefixed};
pub use process::{BoxFuture, BoxRead, CommandSpec, Exit, Process};
pub use retry::RetryPolicy;
pub use ssh::SshExecutor;
pub use worker::{RemoteWorker, temp_sibling};
