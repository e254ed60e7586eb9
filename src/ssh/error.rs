//! SSH error types

use thiserror::Error;

/// Transport-level SSH errors.
///
/// Remote command failures are never errors; they are reported as
/// [`CommandResult`](super::CommandResult) data.
#[derive(Debug, Error)]
pub enum SshError {
    #[error("Invalid connection parameters: {0}")]
    InvalidConfig(String),

    #[error("Connection to {addr} failed: {reason}")]
    ConnectFailed { addr: String, reason: String },

    #[error("Connection to {addr} timed out after {secs}s")]
    ConnectTimeout { addr: String, secs: u64 },

    #[error("Authentication failed for {user}@{addr}: {reason}")]
    AuthFailed {
        user: String,
        addr: String,
        reason: String,
    },

    #[error("Private key rejected: {0}")]
    KeyError(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("SFTP error: {0}")]
    SftpError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SshError {
    /// Whether this error happened while establishing the session
    /// (transport, authentication or timeout).
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            SshError::ConnectFailed { .. }
                | SshError::ConnectTimeout { .. }
                | SshError::AuthFailed { .. }
                | SshError::KeyError(_)
        )
    }
}

impl From<russh_sftp::client::error::Error> for SshError {
    fn from(e: russh_sftp::client::error::Error) -> Self {
        SshError::SftpError(e.to_string())
    }
}

impl serde::Serialize for SshError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
