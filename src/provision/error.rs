//! Install pipeline errors

use thiserror::Error;

use crate::ssh::SshError;

/// Why an install stopped (or, for `DependencyInstall`, what it warned about).
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Invalid server configuration: {0}")]
    InvalidConfig(String),

    #[error("Connection failed: {0}")]
    ConnectFailure(String),

    #[error("Unsupported target: {0}")]
    UnsupportedTarget(String),

    #[error("Privilege escalation failed: {0}")]
    PrivilegeFailure(String),

    /// Soft failure: reported as a warning, never ends the pipeline.
    #[error("Dependency installation failed: {0}")]
    DependencyInstall(String),

    #[error("Failed to write {path}: {reason}")]
    ArtifactWriteFailure { path: String, reason: String },

    #[error("Service failed to start: {0}")]
    ServiceStartFailure(String),

    #[error("Service {service} is not active (last state: {state})")]
    VerificationFailure {
        service: String,
        state: String,
        logs: Vec<String>,
    },
}

impl InstallError {
    /// Variant name, carried as `error_kind` in results.
    pub fn kind(&self) -> &'static str {
        match self {
            InstallError::InvalidConfig(_) => "InvalidConfig",
            InstallError::ConnectFailure(_) => "ConnectFailure",
            InstallError::UnsupportedTarget(_) => "UnsupportedTarget",
            InstallError::PrivilegeFailure(_) => "PrivilegeFailure",
            InstallError::DependencyInstall(_) => "DependencyInstall",
            InstallError::ArtifactWriteFailure { .. } => "ArtifactWriteFailure",
            InstallError::ServiceStartFailure(_) => "ServiceStartFailure",
            InstallError::VerificationFailure { .. } => "VerificationFailure",
        }
    }

    pub fn artifact(path: impl Into<String>, reason: impl Into<String>) -> Self {
        InstallError::ArtifactWriteFailure {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Diagnostic lines attached to the error, if any.
    pub fn logs(&self) -> &[String] {
        match self {
            InstallError::VerificationFailure { logs, .. } => logs,
            _ => &[],
        }
    }
}

impl From<SshError> for InstallError {
    fn from(e: SshError) -> Self {
        InstallError::ConnectFailure(e.to_string())
    }
}

impl serde::Serialize for InstallError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
