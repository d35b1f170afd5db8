//! The executor seam between the orchestrator and the network.

use std::path::Path;

use crate::destination::Destination;
use crate::error::RemoteResult;
use crate::process::{BoxFuture, CommandSpec, Process};

/// Starts processes on, and moves files to and from, remote hosts.
///
/// `spawn` must not block: it starts the process and returns its handle.
/// Transfers complete (or fail) before their future resolves. Remote paths
/// are plain strings since they are interpreted by the remote side.
pub trait Executor: Send + Sync {
    fn spawn(&self, dest: &Destination, command: CommandSpec) -> RemoteResult<Box<dyn Process>>;

    fn upload<'a>(
        &'a self,
        dest: &'a Destination,
        local: &'a Path,
        remote: &'a str,
    ) -> BoxFuture<'a, RemoteResult<()>>;

    fn download<'a>(
        &'a self,
        dest: &'a Destination,
        remote: &'a str,
        local: &'a Path,
    ) -> BoxFuture<'a, RemoteResult<()>>;

    /// Rename `from` over `to` on the remote host.
    fn rename<'a>(
        &'a self,
        dest: &'a Destination,
        from: &'a str,
        to: &'a str,
    ) -> BoxFuture<'a, RemoteResult<()>>;

    /// Delete `path` on the remote host. A missing file is not an error.
    fn remove<'a>(
        &'a self,
        dest: &'a Destination,
        path: &'a str,
    ) -> BoxFuture<'a, RemoteResult<()>>;

    /// Install passwordless credentials for `dest`.
    fn authorize<'a>(&'a self, dest: &'a Destination) -> BoxFuture<'a, RemoteResult<()>>;
}
