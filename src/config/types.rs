//! Configuration Types
//!
//! Per-install target description plus the tunables of the pool, the SSH
//! session layer and the installer. Every tunable has a default, so a
//! partially written config file is still valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ssh::{ConnectTarget, ConnectionId, Credential};

/// Current configuration version
pub const CONFIG_VERSION: u32 = 1;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_INSTALL_DIR: &str = "/opt/hostwarden-agent";
pub const DEFAULT_SERVICE_NAME: &str = "hostwarden-agent";

/// A host to provision, as supplied by the caller.
#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Private key text (OpenSSH or PEM)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_material: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_passphrase: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Run the dependency install as a detached remote job instead of one
    /// blocking command.
    #[serde(default)]
    pub use_detached_exec: bool,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("has_password", &self.password.is_some())
            .field("has_key_material", &self.key_material.is_some())
            .field("display_name", &self.display_name)
            .field("use_detached_exec", &self.use_detached_exec)
            .finish()
    }
}

impl ServerConfig {
    pub fn with_password(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            password: Some(password.into()),
            ..Default::default()
        }
    }

    pub fn with_key(
        host: impl Into<String>,
        username: impl Into<String>,
        key_material: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            key_material: Some(key_material.into()),
            ..Default::default()
        }
    }

    /// Check the invariants that must hold before any network activity.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("host must not be empty".to_string());
        }
        if self.host.chars().any(char::is_whitespace) {
            return Err(format!("host '{}' contains whitespace", self.host));
        }
        if self.port == 0 {
            return Err("port must be between 1 and 65535".to_string());
        }
        if self.username.trim().is_empty() {
            return Err("username must not be empty".to_string());
        }
        if self.credential().is_none() {
            return Err("either a password or private key material is required".to_string());
        }
        Ok(())
    }

    pub fn credential(&self) -> Option<Credential> {
        Credential::from_parts(
            self.password.as_deref(),
            self.key_material.as_deref(),
            self.key_passphrase.as_deref(),
        )
    }

    /// Connection parameters for the SSH layer. Fails the same way `validate` does.
    pub fn to_target(&self) -> Result<ConnectTarget, String> {
        self.validate()?;
        let credential = self
            .credential()
            .ok_or_else(|| "either a password or private key material is required".to_string())?;
        Ok(ConnectTarget {
            host: self.host.trim().to_string(),
            port: self.port,
            username: self.username.trim().to_string(),
            credential,
        })
    }

    pub fn connection_id(&self) -> ConnectionId {
        ConnectionId::for_install(self.host.trim())
    }

    /// Name shown in results; falls back to the host.
    pub fn display_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.host)
    }
}

/// SSH session tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// TCP connect + handshake + auth budget
    pub connect_timeout_secs: u64,
    /// Keep-alive interval in seconds (0 = disabled)
    pub keepalive_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 20,
            keepalive_interval_secs: 30,
        }
    }
}

impl SessionSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_secs > 0).then(|| Duration::from_secs(self.keepalive_interval_secs))
    }
}

/// Connection pool tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30 * 60,
            sweep_interval_secs: 60,
        }
    }
}

impl PoolSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Installer tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerSettings {
    /// Host the deployed agent reports to
    pub panel_host: String,
    pub panel_port: u16,
    pub install_dir: String,
    pub service_name: String,
    pub heartbeat_interval_secs: u64,
    /// Budget for ordinary remote commands
    pub command_timeout_secs: u64,
    /// Budget for the blocking dependency install
    pub dependency_timeout_secs: u64,
    /// Budget for the detached dependency job
    pub detached_timeout_secs: u64,
    /// Wait between `systemctl restart` and the first `is-active` check
    pub settle_delay_ms: u64,
    pub verify_attempts: u32,
    pub verify_interval_ms: u64,
}

impl Default for InstallerSettings {
    fn default() -> Self {
        Self {
            panel_host: "127.0.0.1".to_string(),
            panel_port: 8000,
            install_dir: DEFAULT_INSTALL_DIR.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            heartbeat_interval_secs: hostwarden_agent::DEFAULT_HEARTBEAT_INTERVAL_SECS,
            command_timeout_secs: 60,
            dependency_timeout_secs: 600,
            detached_timeout_secs: 1800,
            settle_delay_ms: 3000,
            verify_attempts: 3,
            verify_interval_ms: 2000,
        }
    }
}

impl InstallerSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn dependency_timeout(&self) -> Duration {
        Duration::from_secs(self.dependency_timeout_secs)
    }

    pub fn detached_timeout(&self) -> Duration {
        Duration::from_secs(self.detached_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn verify_interval(&self) -> Duration {
        Duration::from_millis(self.verify_interval_ms)
    }

    /// `<install_dir>/agent.py`
    pub fn agent_path(&self) -> String {
        format!("{}/agent.py", self.install_dir.trim_end_matches('/'))
    }

    /// `/etc/systemd/system/<service>.service`
    pub fn unit_path(&self) -> String {
        format!("/etc/systemd/system/{}.service", self.service_name)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.panel_host.trim().is_empty() {
            return Err("panel_host must not be empty".to_string());
        }
        if self.panel_port == 0 {
            return Err("panel_port must be between 1 and 65535".to_string());
        }
        if !self.install_dir.starts_with('/') {
            return Err(format!(
                "install_dir '{}' must be an absolute path",
                self.install_dir
            ));
        }
        let valid_service = !self.service_name.is_empty()
            && self
                .service_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
        if !valid_service {
            return Err(format!("invalid service name '{}'", self.service_name));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err("heartbeat_interval_secs must be positive".to_string());
        }
        if self.verify_attempts == 0 {
            return Err("verify_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Root configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostwardenConfig {
    /// Configuration version
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub installer: InstallerSettings,

    #[serde(default)]
    pub pool: PoolSettings,

    #[serde(default)]
    pub session: SessionSettings,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

impl Default for HostwardenConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            installer: InstallerSettings::default(),
            pool: PoolSettings::default(),
            session: SessionSettings::default(),
        }
    }
}

impl HostwardenConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.installer.validate()?;
        if self.pool.idle_timeout_secs == 0 {
            return Err("pool.idle_timeout_secs must be positive".to_string());
        }
        if self.pool.sweep_interval_secs == 0 {
            return Err("pool.sweep_interval_secs must be positive".to_string());
        }
        if self.session.connect_timeout_secs == 0 {
            return Err("session.connect_timeout_secs must be positive".to_string());
        }
        Ok(())
    }
}
