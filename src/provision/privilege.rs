//! Privilege model resolution.
//!
//! ```text
//! whoami == root ──────────────────────────────► Root
//! command -v sudo ─┬─ found ─┬─ sudo -n true ok ─► Sudo
//!                  │         └─ password works ──► SudoWithPassword
//!                  └─ missing ─► install sudo via package manager, re-check
//! ```

use std::fmt;
use std::time::Duration;

use tracing::{info, warn};
use zeroize::Zeroizing;

use super::packages::{self, PackageManager};
use super::script::shell_quote;
use super::InstallError;
use crate::ssh::RemoteShell;

/// How privileged commands are run on the target.
#[derive(Clone, PartialEq, Eq)]
pub enum Privilege {
    /// Logged in as root; commands run unchanged
    Root,
    /// Passwordless sudo
    Sudo,
    /// sudo fed the login password on stdin
    SudoWithPassword(Zeroizing<String>),
}

impl Privilege {
    /// Wrap `command` so it runs as root.
    pub fn wrap(&self, command: &str) -> String {
        match self {
            Privilege::Root => command.to_string(),
            Privilege::Sudo => format!("sudo -n sh -c {}", shell_quote(command)),
            Privilege::SudoWithPassword(password) => format!(
                "printf '%s\\n' {} | sudo -S -p '' sh -c {}",
                shell_quote(password),
                shell_quote(command)
            ),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Privilege::Root => "root",
            Privilege::Sudo => "passwordless sudo",
            Privilege::SudoWithPassword(_) => "sudo with password",
        }
    }
}

impl fmt::Debug for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Privilege::Root => f.write_str("Root"),
            Privilege::Sudo => f.write_str("Sudo"),
            Privilege::SudoWithPassword(_) => f.write_str("SudoWithPassword(<redacted>)"),
        }
    }
}

/// Outcome of privilege resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub privilege: Privilege,
    pub user: String,
    /// Set when the package manager had to be detected along the way
    pub package_manager: Option<PackageManager>,
}

/// Decide how to run privileged commands for this login.
///
/// `password` is the login password, if any; it is only used to feed
/// `sudo -S` and is never logged.
pub async fn resolve(
    shell: &dyn RemoteShell,
    password: Option<&str>,
    timeout: Duration,
) -> Result<Resolution, InstallError> {
    let whoami = shell.execute_command("whoami", timeout).await;
    if !whoami.success {
        return Err(InstallError::PrivilegeFailure(format!(
            "could not determine remote user: {}",
            whoami.error_text()
        )));
    }
    let user = whoami.output().to_string();
    if user == "root" {
        return Ok(Resolution {
            privilege: Privilege::Root,
            user,
            package_manager: None,
        });
    }

    let mut package_manager = None;
    if !has_sudo(shell, timeout).await {
        let pm = packages::detect(shell, timeout).await;
        package_manager = pm;
        let Some(pm) = pm else {
            return Err(InstallError::PrivilegeFailure(format!(
                "user '{}' is not root, sudo is not installed and no supported package manager \
                 (apt-get, yum, dnf, pacman) was found to install it; log in as root or install sudo",
                user
            )));
        };

        info!("[installer] sudo missing, trying to install it with {}", pm);
        let install = packages::join_commands(&pm.sudo_install_commands());
        let result = shell.execute_command(&install, timeout).await;
        if !result.success {
            warn!("[installer] sudo install failed: {}", result.error_text());
        }
        if !has_sudo(shell, timeout).await {
            return Err(InstallError::PrivilegeFailure(format!(
                "user '{}' is not root and sudo could not be installed with {}; \
                 log in as root or install sudo manually",
                user, pm
            )));
        }
    }

    let check = shell.execute_command("sudo -n true", timeout).await;
    if check.success {
        return Ok(Resolution {
            privilege: Privilege::Sudo,
            user,
            package_manager,
        });
    }

    if let Some(password) = password.filter(|p| !p.is_empty()) {
        let candidate = Privilege::SudoWithPassword(Zeroizing::new(password.to_string()));
        let check = shell.execute_command(&candidate.wrap("true"), timeout).await;
        if check.success {
            return Ok(Resolution {
                privilege: candidate,
                user,
                package_manager,
            });
        }
        return Err(InstallError::PrivilegeFailure(format!(
            "sudo rejected the password for '{}'; make sure the user is in the sudoers file",
            user
        )));
    }

    Err(InstallError::PrivilegeFailure(format!(
        "user '{}' needs passwordless sudo, or a password must be supplied for sudo",
        user
    )))
}

async fn has_sudo(shell: &dyn RemoteShell, timeout: Duration) -> bool {
    shell
        .execute_command("command -v sudo", timeout)
        .await
        .success
}
