//! Agent installer: the eight-step provisioning pipeline.
//!
//! Workflow:
//! 1. Connect through the pool and verify the host answers
//! 2. Resolve the privilege model (root / sudo / sudo with password)
//! 3. Detect the OS and require `python3` and `systemctl`
//! 4. Create the install directory
//! 5. Install Python dependencies (soft: failures become warnings)
//! 6. Render and write the agent and its unit file
//! 7. Enable and restart the service
//! 8. Poll `systemctl is-active` after a settle delay
//!
//! Every remote write is idempotent, so rerunning an install converges on
//! the same state. The pooled connection is released on every exit path.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::detached::run_detached;
use super::packages::{self, PackageManager, PIP_FALLBACK_COMMAND};
use super::privilege::{self, Privilege};
use super::progress::{InstallStep, ProgressEvent, ProgressReporter};
use super::script::{heredoc_write, sha256_command, shell_quote, with_trailing_newline};
use super::InstallError;
use crate::artifact::{render_agent_script, render_service_unit, sha256_hex, AgentParams, UnitParams};
use crate::config::{InstallerSettings, ServerConfig};
use crate::ssh::{CommandResult, ConnectTarget, ConnectionId, ConnectionPool, RemoteShell};

/// Journal lines captured when the service does not come up.
const DIAGNOSTIC_LOG_LINES: usize = 20;

/// Host summary returned on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub host: String,
    pub name: String,
    pub os: String,
    pub status: String,
}

/// Outcome of one install run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// `InstallError` variant name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
    /// `systemctl status` output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostic_logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl InstallResult {
    fn failed(error: &InstallError, warnings: Vec<String>) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            error_kind: Some(error.kind().to_string()),
            diagnostic_logs: error.logs().to_vec(),
            warnings,
            ..Default::default()
        }
    }
}

/// What a successful pipeline learned about the host.
struct Installed {
    os: String,
    service_status: Option<String>,
}

/// Provisions the agent on remote hosts through a shared pool.
pub struct AgentInstaller {
    pool: Arc<ConnectionPool>,
    settings: InstallerSettings,
}

impl AgentInstaller {
    pub fn new(pool: Arc<ConnectionPool>, settings: InstallerSettings) -> Self {
        Self { pool, settings }
    }

    pub fn settings(&self) -> &InstallerSettings {
        &self.settings
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Install (or reinstall) the agent on `server`.
    ///
    /// Never returns an error: every failure is folded into the result, and
    /// `on_progress` sees the same failure as an error event.
    pub async fn install<F>(&self, server: &ServerConfig, mut on_progress: F) -> InstallResult
    where
        F: FnMut(&ProgressEvent) + Send,
    {
        let mut progress = ProgressReporter::new(server.host.clone(), &mut on_progress);

        let target = match server
            .to_target()
            .and_then(|target| self.settings.validate().map(|_| target))
        {
            Ok(target) => target,
            Err(reason) => {
                let error = InstallError::InvalidConfig(reason);
                progress.error(error.to_string());
                return InstallResult::failed(&error, Vec::new());
            }
        };

        let id = server.connection_id();
        info!(
            "[installer] Installing agent on {} ({})",
            target.display_string(),
            server.display_name()
        );

        let mut warnings = Vec::new();
        let outcome = self
            .run(server, &id, &target, &mut progress, &mut warnings)
            .await;
        self.pool.close(&id).await;

        match outcome {
            Ok(installed) => {
                info!("[installer] Agent running on {}", target.host);
                InstallResult {
                    success: true,
                    message: Some("Agent installed and running".to_string()),
                    server_info: Some(ServerInfo {
                        host: target.host.clone(),
                        name: server.display_name().to_string(),
                        os: installed.os,
                        status: "active".to_string(),
                    }),
                    service_status: installed.service_status,
                    warnings,
                    ..Default::default()
                }
            }
            Err(error) => {
                progress.error(error.to_string());
                InstallResult::failed(&error, warnings)
            }
        }
    }

    async fn run(
        &self,
        server: &ServerConfig,
        id: &ConnectionId,
        target: &ConnectTarget,
        progress: &mut ProgressReporter<'_>,
        warnings: &mut Vec<String>,
    ) -> Result<Installed, InstallError> {
        // Step 1: connect
        progress.begin(
            InstallStep::Connect,
            format!("Connecting to {}", target.display_string()),
        );
        progress.emit(5, "Opening SSH session");
        let shell = self.pool.acquire(id, target).await?;
        let echo = shell
            .execute_command("echo hostwarden", self.settings.command_timeout())
            .await;
        if !echo.success {
            return Err(InstallError::ConnectFailure(format!(
                "host did not answer a test command: {}",
                echo.error_text()
            )));
        }
        progress.emit(15, "SSH connection established");

        // Step 2: privilege
        progress.begin(InstallStep::Privilege, "Checking privileges");
        let resolution = privilege::resolve(
            shell.as_ref(),
            target.credential.password(),
            self.settings.command_timeout(),
        )
        .await?;
        progress.emit(
            19,
            format!(
                "Running as {} ({})",
                resolution.user,
                resolution.privilege.label()
            ),
        );

        let mut pipeline = Pipeline {
            settings: &self.settings,
            shell,
            privilege: resolution.privilege,
            package_manager: resolution.package_manager,
            progress,
            warnings,
        };

        let os = pipeline.check_system().await?;
        pipeline.create_directory().await?;
        pipeline.install_dependencies(server.use_detached_exec).await;
        pipeline.deploy_artifacts().await?;
        pipeline.start_service().await?;
        let service_status = pipeline.verify().await?;

        Ok(Installed { os, service_status })
    }
}

/// Steps 3-8 against one acquired shell.
struct Pipeline<'a, 'p> {
    settings: &'a InstallerSettings,
    shell: Arc<dyn RemoteShell>,
    privilege: Privilege,
    package_manager: Option<PackageManager>,
    progress: &'a mut ProgressReporter<'p>,
    warnings: &'a mut Vec<String>,
}

impl Pipeline<'_, '_> {
    async fn exec(&self, command: &str) -> CommandResult {
        self.shell
            .execute_command(command, self.settings.command_timeout())
            .await
    }

    async fn exec_root(&self, command: &str) -> CommandResult {
        self.exec(&self.privilege.wrap(command)).await
    }

    fn warn(&mut self, error: InstallError) {
        self.progress.warning(error.to_string());
        self.warnings.push(error.to_string());
    }

    // Step 3
    async fn check_system(&mut self) -> Result<String, InstallError> {
        self.progress
            .begin(InstallStep::Prerequisites, "Checking operating system");

        let kernel = self.exec("uname -s").await;
        if !kernel.success {
            return Err(InstallError::UnsupportedTarget(format!(
                "could not identify the operating system: {}",
                kernel.error_text()
            )));
        }
        if kernel.output() != "Linux" {
            return Err(InstallError::UnsupportedTarget(format!(
                "{} is not supported; a Linux host is required",
                kernel.output()
            )));
        }

        let os_release = self.exec("cat /etc/os-release").await;
        let os = match parse_pretty_name(&os_release.stdout).filter(|_| os_release.success) {
            Some(name) => name,
            None => {
                let uname = self.exec("uname -sr").await;
                if uname.success && !uname.output().is_empty() {
                    uname.output().to_string()
                } else {
                    "Linux".to_string()
                }
            }
        };
        self.progress.emit(25, format!("System: {}", os));

        if !self.exec("command -v python3").await.success {
            return Err(InstallError::UnsupportedTarget(
                "python3 is not installed".to_string(),
            ));
        }
        if !self.exec("command -v systemctl").await.success {
            return Err(InstallError::UnsupportedTarget(
                "systemd (systemctl) is required".to_string(),
            ));
        }
        self.progress.emit(29, "python3 and systemd available");
        Ok(os)
    }

    // Step 4
    async fn create_directory(&mut self) -> Result<(), InstallError> {
        let dir = self.settings.install_dir.trim_end_matches('/').to_string();
        self.progress
            .begin(InstallStep::Directory, format!("Creating {}", dir));

        let quoted = shell_quote(&dir);
        let result = self
            .exec_root(&format!("mkdir -p {0} && chmod 755 {0}", quoted))
            .await;
        if !result.success {
            return Err(InstallError::artifact(dir, result.error_text()));
        }
        self.progress.emit(39, format!("{} ready", dir));
        Ok(())
    }

    // Step 5
    async fn install_dependencies(&mut self, detached: bool) {
        self.progress
            .begin(InstallStep::Dependencies, "Installing Python dependencies");

        if self.package_manager.is_none() {
            self.package_manager =
                packages::detect(self.shell.as_ref(), self.settings.command_timeout()).await;
        }

        let primary = match self.package_manager {
            Some(pm) => {
                self.progress
                    .emit(41, format!("Installing packages with {}", pm));
                let body = packages::join_commands(&pm.dependency_commands());
                let result = self.run_streaming(&body, detached).await;
                if result.success {
                    Ok(())
                } else {
                    Err(format!("{} failed: {}", pm, result.error_text()))
                }
            }
            None => Err("no supported package manager found".to_string()),
        };

        if let Err(reason) = primary {
            info!("[installer] {}, trying pip", reason);
            self.progress.emit(60, "Falling back to pip");
            let pip = self.run_streaming(PIP_FALLBACK_COMMAND, false).await;
            if !pip.success {
                self.warn(InstallError::DependencyInstall(format!(
                    "{}; pip fallback failed: {}",
                    reason,
                    pip.error_text()
                )));
                return;
            }
        }
        self.progress.emit(65, "Dependencies installed");
    }

    async fn run_streaming(&mut self, body: &str, detached: bool) -> CommandResult {
        let progress = &mut *self.progress;
        let mut on_line = |line: &str| progress.output_line(line);
        if detached {
            run_detached(
                self.shell.as_ref(),
                &self.privilege,
                body,
                self.settings.detached_timeout(),
                self.settings.command_timeout(),
                &mut on_line,
            )
            .await
        } else {
            self.shell
                .execute_command_streaming(
                    &self.privilege.wrap(body),
                    self.settings.dependency_timeout(),
                    None,
                    &mut on_line,
                )
                .await
        }
    }

    // Step 6
    async fn deploy_artifacts(&mut self) -> Result<(), InstallError> {
        self.progress
            .begin(InstallStep::Artifacts, "Rendering agent");

        let agent = render_agent_script(&AgentParams::from(self.settings));
        let agent_path = self.settings.agent_path();
        self.write_artifact(&agent_path, &agent, 0o755).await?;
        self.progress
            .emit(72, format!("Agent written to {}", agent_path));

        let unit = render_service_unit(&UnitParams::from(self.settings));
        let unit_path = self.settings.unit_path();
        self.write_artifact(&unit_path, &unit, 0o644).await?;
        self.progress
            .emit(78, format!("Service unit written to {}", unit_path));

        let reload = self.exec_root("systemctl daemon-reload").await;
        if !reload.success {
            return Err(InstallError::artifact(
                unit_path,
                format!("systemctl daemon-reload failed: {}", reload.error_text()),
            ));
        }
        self.progress.emit(80, "systemd reloaded");
        Ok(())
    }

    async fn write_artifact(&self, path: &str, content: &str, mode: u32) -> Result<(), InstallError> {
        let content = with_trailing_newline(content);
        let command =
            heredoc_write(path, &content, mode).map_err(|e| InstallError::artifact(path, e))?;

        let result = self.exec_root(&command).await;
        if !result.success {
            return Err(InstallError::artifact(path, result.error_text()));
        }

        let checksum = self.exec_root(&sha256_command(path)).await;
        let remote = checksum.output();
        if !checksum.success || remote.is_empty() {
            debug!("[installer] sha256sum unavailable, skipping check of {}", path);
            return Ok(());
        }
        let expected = sha256_hex(content.as_bytes());
        if remote != expected {
            return Err(InstallError::artifact(
                path,
                format!("checksum mismatch (expected {}, found {})", expected, remote),
            ));
        }
        Ok(())
    }

    // Step 7
    async fn start_service(&mut self) -> Result<(), InstallError> {
        let service = shell_quote(&self.settings.service_name);
        self.progress
            .begin(InstallStep::Service, "Enabling service");

        let enable = self.exec_root(&format!("systemctl enable {}", service)).await;
        if !enable.success {
            // The agent can still run now; it just won't start at boot.
            self.progress.warning(format!(
                "could not enable {} at boot: {}",
                self.settings.service_name,
                enable.error_text()
            ));
            self.warnings.push(format!(
                "service not enabled at boot: {}",
                enable.error_text()
            ));
        }
        self.progress.emit(85, "Restarting service");

        let restart = self.exec_root(&format!("systemctl restart {}", service)).await;
        if !restart.success {
            return Err(InstallError::ServiceStartFailure(restart.error_text()));
        }
        self.progress.emit(90, "Service started");
        Ok(())
    }

    // Step 8
    async fn verify(&mut self) -> Result<Option<String>, InstallError> {
        let name = self.settings.service_name.clone();
        let service = shell_quote(&name);
        self.progress
            .begin(InstallStep::Verify, "Waiting for the service to settle");
        tokio::time::sleep(self.settings.settle_delay()).await;

        let attempts = self.settings.verify_attempts.max(1);
        let mut state = String::from("unknown");
        for attempt in 1..=attempts {
            let check = self
                .exec_root(&format!("systemctl is-active {}", service))
                .await;
            state = check.output().to_string();
            if check.success && state == "active" {
                self.progress.emit(98, format!("{} is active", name));
                let status = self
                    .exec_root(&format!("systemctl status {} --no-pager -l", service))
                    .await;
                let status = (!status.stdout.trim().is_empty()).then(|| status.stdout);
                self.progress.complete("Agent installed and running");
                return Ok(status);
            }
            debug!(
                "[installer] {} not active yet ({}), attempt {}/{}",
                name, state, attempt, attempts
            );
            if attempt < attempts {
                self.progress.emit(
                    92 + (attempt * 4 / attempts) as u8,
                    format!(
                        "Service state: {}",
                        if state.is_empty() { "unknown" } else { state.as_str() }
                    ),
                );
                tokio::time::sleep(self.settings.verify_interval()).await;
            }
        }

        let journal = self
            .exec_root(&format!(
                "journalctl -u {} --no-pager -n {}",
                service, DIAGNOSTIC_LOG_LINES
            ))
            .await;
        let logs = journal
            .stdout
            .lines()
            .map(str::to_string)
            .filter(|line| !line.trim().is_empty())
            .collect();
        Err(InstallError::VerificationFailure {
            service: name,
            state: if state.is_empty() { "unknown".to_string() } else { state },
            logs,
        })
    }
}

/// `PRETTY_NAME` from `/etc/os-release` content.
fn parse_pretty_name(os_release: &str) -> Option<String> {
    os_release.lines().find_map(|line| {
        let value = line.trim().strip_prefix("PRETTY_NAME=")?;
        let value = value.trim().trim_matches('"').trim_matches('\'').trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolSettings;
    use crate::ssh::mock::{MockConnector, MockShell};

    const OS_RELEASE: &str = "NAME=\"Ubuntu\"\nPRETTY_NAME=\"Ubuntu 22.04.3 LTS\"\nID=ubuntu\n";

    fn debian_root(shell: &MockShell) {
        shell
            .on("whoami", 0, "root\n")
            .on("uname -s", 0, "Linux\n")
            .on("cat /etc/os-release", 0, OS_RELEASE)
            .on("for pm in", 0, "apt-get\n")
            .on("is-active", 0, "active\n")
            .on("systemctl status", 0, "● hostwarden-agent.service - running\n");
    }

    fn settings() -> InstallerSettings {
        InstallerSettings {
            panel_host: "panel.lan".to_string(),
            settle_delay_ms: 0,
            verify_interval_ms: 0,
            ..Default::default()
        }
    }

    fn installer(connector: Arc<MockConnector>) -> AgentInstaller {
        let pool = Arc::new(ConnectionPool::new(connector, &PoolSettings::default()));
        AgentInstaller::new(pool, settings())
    }

    fn server() -> ServerConfig {
        ServerConfig::with_password("10.0.0.7", "root", "secret")
    }

    async fn install(installer: &AgentInstaller, server: &ServerConfig) -> (InstallResult, Vec<ProgressEvent>) {
        let mut events = Vec::new();
        let result = installer
            .install(server, |e: &ProgressEvent| events.push(e.clone()))
            .await;
        (result, events)
    }

    fn max_percent(events: &[ProgressEvent]) -> u8 {
        events.iter().map(|e| e.percent).max().unwrap_or(0)
    }

    #[test]
    fn test_parse_pretty_name() {
        assert_eq!(parse_pretty_name(OS_RELEASE).as_deref(), Some("Ubuntu 22.04.3 LTS"));
        assert_eq!(parse_pretty_name("PRETTY_NAME=''\n"), None);
        assert_eq!(parse_pretty_name("ID=alpine\n"), None);
    }

    #[tokio::test]
    async fn test_apt_root_install_succeeds() {
        let connector = MockConnector::new(debian_root);
        let installer = installer(connector.clone());

        let (result, events) = install(&installer, &server()).await;

        assert!(result.success, "{:?}", result);
        let info = result.server_info.unwrap();
        assert_eq!(info.os, "Ubuntu 22.04.3 LTS");
        assert_eq!(info.status, "active");
        assert!(result.service_status.unwrap().contains("running"));
        assert!(result.warnings.is_empty());

        assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert_eq!(events.last().unwrap().percent, 100);
        assert!(events.iter().all(|e| !e.is_error));

        let shell = connector.last().unwrap();
        assert!(shell.ran("mkdir -p '/opt/hostwarden-agent'"));
        assert!(shell.ran("apt-get install -y -qq python3-pip python3-requests python3-psutil"));
        assert!(shell.ran("mv -f \"$tmp\" '/opt/hostwarden-agent/agent.py'"));
        assert!(shell.ran("mv -f \"$tmp\" '/etc/systemd/system/hostwarden-agent.service'"));
        assert!(shell.ran("systemctl daemon-reload"));
        assert!(shell.ran("systemctl restart 'hostwarden-agent'"));
        assert!(!shell.ran("sudo"));

        // Connection released
        assert_eq!(shell.closes(), 1);
        assert_eq!(installer.pool().stats().total, 0);
    }

    #[tokio::test]
    async fn test_sudo_user_commands_are_wrapped() {
        let connector = MockConnector::new(|shell| {
            debian_root(shell);
            shell.on("whoami", 0, "deploy\n");
        });
        let installer = installer(connector.clone());

        let (result, _) = install(&installer, &server()).await;

        assert!(result.success, "{:?}", result);
        let shell = connector.last().unwrap();
        assert!(shell.ran("sudo -n sh -c 'mkdir -p "));
        assert!(shell.ran("sudo -n sh -c 'systemctl restart "));
    }

    #[tokio::test]
    async fn test_no_sudo_and_no_package_manager_fails_early() {
        let connector = MockConnector::new(|shell| {
            debian_root(shell);
            shell.on("whoami", 0, "deploy\n");
            shell.on("command -v sudo", 1, "");
            shell.on("for pm in", 0, "");
        });
        let installer = installer(connector.clone());

        let (result, events) = install(&installer, &server()).await;

        assert!(!result.success);
        assert_eq!(result.error_kind.as_deref(), Some("PrivilegeFailure"));
        assert!(max_percent(&events) <= 19);
        assert!(events.last().unwrap().is_error);
        let shell = connector.last().unwrap();
        assert!(!shell.ran("mkdir"));
        assert_eq!(shell.closes(), 1);
    }

    #[tokio::test]
    async fn test_dependency_failure_is_a_warning() {
        let connector = MockConnector::new(|shell| {
            debian_root(shell);
            shell.on_stderr("apt-get install", 100, "E: Unable to locate package");
            shell.on_stderr("python3 -m pip", 1, "No module named pip");
        });
        let installer = installer(connector.clone());

        let (result, events) = install(&installer, &server()).await;

        assert!(result.success, "{:?}", result);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("pip fallback failed"));
        assert!(events
            .iter()
            .any(|e| e.step == InstallStep::Dependencies && e.message.starts_with("Warning:")));
        assert_eq!(events.last().unwrap().percent, 100);
    }

    #[tokio::test]
    async fn test_pip_fallback_recovers() {
        let connector = MockConnector::new(|shell| {
            debian_root(shell);
            shell.on("apt-get install", 100, "");
        });
        let installer = installer(connector.clone());

        let (result, _) = install(&installer, &server()).await;

        assert!(result.success);
        assert!(result.warnings.is_empty());
        assert!(connector.last().unwrap().ran("python3 -m pip install requests psutil"));
    }

    #[tokio::test]
    async fn test_auth_failure_stops_at_connect() {
        let installer = installer(MockConnector::failing("Permission denied"));

        let (result, events) = install(&installer, &server()).await;

        assert!(!result.success);
        assert_eq!(result.error_kind.as_deref(), Some("ConnectFailure"));
        assert!(result.error.unwrap().contains("Permission denied"));
        assert!(max_percent(&events) <= 15);
    }

    #[tokio::test]
    async fn test_invalid_config_never_connects() {
        let connector = MockConnector::new(debian_root);
        let installer = installer(connector.clone());
        let mut server = server();
        server.password = None;

        let (result, _) = install(&installer, &server).await;

        assert_eq!(result.error_kind.as_deref(), Some("InvalidConfig"));
        assert_eq!(connector.opens(), 0);
    }

    #[tokio::test]
    async fn test_missing_python_is_unsupported() {
        let connector = MockConnector::new(|shell| {
            debian_root(shell);
            shell.on("command -v python3", 1, "");
        });
        let installer = installer(connector);

        let (result, events) = install(&installer, &server()).await;

        assert_eq!(result.error_kind.as_deref(), Some("UnsupportedTarget"));
        assert!(max_percent(&events) <= 29);
    }

    #[tokio::test]
    async fn test_reinstall_is_idempotent() {
        let connector = MockConnector::new(debian_root);
        let installer = installer(connector.clone());

        let (first, _) = install(&installer, &server()).await;
        let first_commands = connector.last().unwrap().commands();
        let (second, _) = install(&installer, &server()).await;
        let second_commands = connector.last().unwrap().commands();

        assert!(first.success && second.success);
        assert_eq!(connector.opens(), 2);
        assert_eq!(first_commands, second_commands);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_fails_write() {
        let connector = MockConnector::new(|shell| {
            debian_root(shell);
            shell.on("sha256sum", 0, "deadbeef\n");
        });
        let installer = installer(connector);

        let (result, _) = install(&installer, &server()).await;

        assert_eq!(result.error_kind.as_deref(), Some("ArtifactWriteFailure"));
        assert!(result.error.unwrap().contains("checksum mismatch"));
    }

    #[tokio::test]
    async fn test_matching_checksum_passes() {
        let agent = render_agent_script(&AgentParams::from(&settings()));
        let unit = render_service_unit(&UnitParams::from(&settings()));
        let agent_sum = sha256_hex(agent.as_bytes());
        let unit_sum = sha256_hex(unit.as_bytes());
        let connector = MockConnector::new(move |shell| {
            debian_root(shell);
            shell.on("sha256sum '/opt/hostwarden-agent/agent.py'", 0, &agent_sum);
            shell.on("sha256sum '/etc/systemd/system/hostwarden-agent.service'", 0, &unit_sum);
        });
        let installer = installer(connector);

        let (result, _) = install(&installer, &server()).await;
        assert!(result.success, "{:?}", result);
    }

    #[tokio::test]
    async fn test_restart_failure() {
        let connector = MockConnector::new(|shell| {
            debian_root(shell);
            shell.on_stderr("systemctl restart", 1, "Unit hostwarden-agent.service failed");
        });
        let installer = installer(connector);

        let (result, events) = install(&installer, &server()).await;

        assert_eq!(result.error_kind.as_deref(), Some("ServiceStartFailure"));
        assert!(max_percent(&events) <= 90);
    }

    #[tokio::test]
    async fn test_enable_failure_is_a_warning() {
        let connector = MockConnector::new(|shell| {
            debian_root(shell);
            shell.on_stderr("systemctl enable", 1, "Failed to enable unit");
        });
        let installer = installer(connector);

        let (result, _) = install(&installer, &server()).await;

        assert!(result.success);
        assert_eq!(result.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_inactive_service_returns_diagnostics() {
        let connector = MockConnector::new(|shell| {
            debian_root(shell);
            shell.on("is-active", 3, "failed\n");
            shell.on(
                "journalctl -u",
                0,
                "python3[42]: ModuleNotFoundError: No module named 'psutil'\nsystemd[1]: Failed\n",
            );
        });
        let installer = installer(connector.clone());

        let (result, events) = install(&installer, &server()).await;

        assert!(!result.success);
        assert_eq!(result.error_kind.as_deref(), Some("VerificationFailure"));
        assert_eq!(result.diagnostic_logs.len(), 2);
        assert!(result.diagnostic_logs[0].contains("psutil"));
        assert!(max_percent(&events) < 100);
        assert_eq!(connector.last().unwrap().count("is-active"), 3);
    }

    #[tokio::test]
    async fn test_detached_dependency_install_streams_lines() {
        let connector = MockConnector::new(|shell| {
            debian_root(shell);
            shell.on_lines(
                "tail -n +1 ",
                &["Get:1 http://archive.ubuntu.com", "Setting up python3-psutil", "__HOSTWARDEN_DONE__:0"],
                Some(0),
            );
        });
        let installer = installer(connector.clone());
        let mut server = server();
        server.use_detached_exec = true;

        let (result, events) = install(&installer, &server).await;

        assert!(result.success, "{:?}", result);
        let streamed: Vec<&str> = events
            .iter()
            .filter_map(|e| e.raw_output_line.as_deref())
            .collect();
        assert_eq!(streamed, vec!["Get:1 http://archive.ubuntu.com", "Setting up python3-psutil"]);
        assert!(events
            .iter()
            .filter(|e| e.raw_output_line.is_some())
            .all(|e| (40..=65).contains(&e.percent)));
        assert!(connector.last().unwrap().ran("setsid nohup"));
    }

    #[test]
    fn test_result_wire_shape() {
        let result = InstallResult::failed(
            &InstallError::VerificationFailure {
                service: "hostwarden-agent".into(),
                state: "failed".into(),
                logs: vec!["boom".into()],
            },
            vec!["slow mirror".into()],
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["errorKind"], "VerificationFailure");
        assert_eq!(json["diagnosticLogs"][0], "boom");
        assert_eq!(json["warnings"][0], "slow mirror");
        assert!(json.get("serverInfo").is_none());
    }
}
