//! SSH connection layer
//!
//! ```text
//! ConnectionPool ──acquire(id)──► Arc<dyn RemoteShell>
//!       │                               ▲
//!       └── Connector::open(target) ────┘   (SshConnector → SshConnection)
//! ```
//!
//! Every command and transfer on one connection is serialized. Remote
//! failures are returned as [`CommandResult`] data; only transport problems
//! surface as [`SshError`].

pub mod connection;
pub mod error;
mod exec_lock;
pub mod handler;
pub mod pool;
pub mod state;
pub mod types;

#[cfg(test)]
pub mod mock;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use connection::{SshConnection, SshConnector};
pub use error::SshError;
pub use pool::{ConnectionPool, PoolStats, ReaperHandle};
pub use state::{ConnectionState, StateTransitionError, Transition};
pub use types::{
    CommandResult, ConnectTarget, ConnectionId, Credential, TRANSPORT_FAILURE_EXIT_CODE,
};

/// Line callback used by streaming commands.
pub type LineSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// An authenticated remote shell.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Establish the transport. No-op while it is alive.
    async fn connect(&self) -> Result<(), SshError>;

    /// Run `command` to completion or until `timeout`.
    async fn execute_command(&self, command: &str, timeout: Duration) -> CommandResult;

    /// Run `command`, forwarding every stdout/stderr line to `on_line` in
    /// arrival order.
    ///
    /// Returns when the process exits, or as soon as a stdout line starting
    /// with `sentinel` is seen; the exit code is then parsed from the text
    /// after the prefix. Sentinel lines are not forwarded.
    async fn execute_command_streaming(
        &self,
        command: &str,
        timeout: Duration,
        sentinel: Option<&str>,
        on_line: LineSink<'_>,
    ) -> CommandResult;

    /// Copy a local file to `remote_path`. Returns the bytes written.
    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<u64, SshError>;

    /// Copy `remote_path` to a local file. Returns the bytes read.
    async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<u64, SshError>;

    /// Cheap transport check; never touches the network.
    fn is_alive(&self) -> bool;

    /// Time since the last activity. Zero while a command is running.
    fn idle_for(&self) -> Duration;

    /// Disconnect. Cancels any in-flight streaming read.
    async fn close(&self);
}

/// Opens authenticated shells for the pool.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, target: &ConnectTarget) -> Result<Arc<dyn RemoteShell>, SshError>;
}
