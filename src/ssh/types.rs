//! Connection identity, credentials and command results.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Exit code reserved for transport- and timeout-level failures.
pub const TRANSPORT_FAILURE_EXIT_CODE: i32 = -1;

/// Key identifying one pooled session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id used for the connection owned by one install run.
    pub fn for_install(host: &str) -> Self {
        Self(format!("install-{}", host))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Authentication material. Exactly one kind is used per session.
#[derive(Clone)]
pub enum Credential {
    Password(Zeroizing<String>),
    PrivateKey {
        /// OpenSSH or PEM encoded private key
        material: Zeroizing<String>,
        passphrase: Option<Zeroizing<String>>,
        /// Used only when `material` cannot be parsed
        fallback_password: Option<Zeroizing<String>>,
    },
}

impl Credential {
    /// Build a credential from optional password and key material.
    ///
    /// Key material wins when both are present; the password is then kept only
    /// as a fallback for unparsable keys.
    pub fn from_parts(
        password: Option<&str>,
        key_material: Option<&str>,
        passphrase: Option<&str>,
    ) -> Option<Self> {
        let password = password
            .filter(|p| !p.is_empty())
            .map(|p| Zeroizing::new(p.to_string()));
        match key_material.filter(|k| !k.trim().is_empty()) {
            Some(key) => Some(Credential::PrivateKey {
                material: Zeroizing::new(key.to_string()),
                passphrase: passphrase
                    .filter(|p| !p.is_empty())
                    .map(|p| Zeroizing::new(p.to_string())),
                fallback_password: password,
            }),
            None => password.map(Credential::Password),
        }
    }

    /// Password usable for `sudo -S`, if this credential carries one.
    pub fn password(&self) -> Option<&str> {
        match self {
            Credential::Password(p) => Some(p.as_str()),
            Credential::PrivateKey {
                fallback_password, ..
            } => fallback_password.as_ref().map(|p| p.as_str()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Password(_) => "password",
            Credential::PrivateKey { .. } => "private-key",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Credential::Password(<redacted>)"),
            Credential::PrivateKey {
                passphrase,
                fallback_password,
                ..
            } => f
                .debug_struct("Credential::PrivateKey")
                .field("material", &"<redacted>")
                .field("has_passphrase", &passphrase.is_some())
                .field("has_fallback_password", &fallback_password.is_some())
                .finish(),
        }
    }
}

/// Everything needed to open one session.
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
}

impl ConnectTarget {
    /// `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `user@host:port`
    pub fn display_string(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Outcome of one remote command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// Remote exit status, or `-1` for transport/timeout failures
    pub exit_code: i32,
    pub timestamp: DateTime<Utc>,
}

impl CommandResult {
    /// Result of a process that ran and exited with `exit_code`.
    pub fn exited(exit_code: u32, stdout: String, stderr: String) -> Self {
        // Exit statuses are 0-255 on POSIX hosts; clamp anything larger.
        let exit_code = i32::try_from(exit_code).unwrap_or(i32::MAX);
        Self {
            success: exit_code == 0,
            stdout,
            stderr,
            exit_code,
            timestamp: Utc::now(),
        }
    }

    /// Failure that happened below the remote process: transport, channel or timeout.
    pub fn transport_failure(reason: impl Into<String>) -> Self {
        Self::partial_failure(String::new(), String::new(), reason)
    }

    /// Transport failure after some output was already collected.
    pub fn partial_failure(stdout: String, mut stderr: String, reason: impl Into<String>) -> Self {
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&reason.into());
        Self {
            success: false,
            stdout,
            stderr,
            exit_code: TRANSPORT_FAILURE_EXIT_CODE,
            timestamp: Utc::now(),
        }
    }

    pub fn is_transport_failure(&self) -> bool {
        self.exit_code == TRANSPORT_FAILURE_EXIT_CODE
    }

    /// Trimmed stdout.
    pub fn output(&self) -> &str {
        self.stdout.trim()
    }

    /// Best human-readable failure text: stderr, else stdout, else the exit code.
    pub fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        format!("exit code {}", self.exit_code)
    }
}
