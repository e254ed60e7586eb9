//! hostwarden: installs and supervises the hostwarden monitoring agent on
//! remote Linux hosts over SSH.
//!
//! - [`ssh`]: pooled, authenticated connections with a command/transfer API
//! - [`provision`]: the install pipeline and its progress events
//! - [`artifact`]: the rendered agent source and systemd unit
//! - [`config`]: settings file and per-host connection parameters

pub mod artifact;
pub mod config;
pub mod provision;
pub mod ssh;

pub use config::{HostwardenConfig, InstallerSettings, ServerConfig};
pub use provision::{AgentInstaller, InstallError, InstallResult, ProgressEvent};
pub use ssh::{CommandResult, ConnectionPool, SshError};

use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "hostwarden=info";

/// Install a `tracing` subscriber honoring `RUST_LOG`.
///
/// Embedders that already installed a subscriber keep theirs.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
