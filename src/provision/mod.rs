//! Agent provisioning
//!
//! ```text
//! AgentInstaller::install(server)
//!   ├─ ConnectionPool::acquire ── "install-<host>"
//!   ├─ privilege::resolve ─────── Root | Sudo | SudoWithPassword
//!   ├─ packages / detached ────── dependency install, streamed to progress
//!   ├─ artifact::render_* ─────── heredoc writes + sha256 check
//!   └─ systemctl enable/restart/is-active
//! ```

pub mod detached;
pub mod error;
pub mod installer;
pub mod packages;
pub mod privilege;
pub mod progress;
pub mod script;

pub use error::InstallError;
pub use installer::{AgentInstaller, InstallResult, ServerInfo};
pub use packages::PackageManager;
pub use privilege::Privilege;
pub use progress::{InstallStep, ProgressEvent, ProgressReporter};
