//! Configuration Management Module
//!
//! Loads and saves the hostwarden settings file (JSON) and defines the
//! per-install `ServerConfig` supplied by callers.
//!
//! Default location: `<config_dir>/hostwarden/config.json`

pub mod types;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

pub use types::{
    HostwardenConfig, InstallerSettings, PoolSettings, ServerConfig, SessionSettings,
    CONFIG_VERSION, DEFAULT_INSTALL_DIR, DEFAULT_SERVICE_NAME, DEFAULT_SSH_PORT,
};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unsupported config version {found} (expected <= {expected})")]
    VersionMismatch { found: u32, expected: u32 },
}

impl serde::Serialize for ConfigError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// `<config_dir>/hostwarden`
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join("hostwarden"))
        .ok_or(ConfigError::NoConfigDir)
}

/// `<config_dir>/hostwarden/config.json`
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json"))
}

impl HostwardenConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("[config] {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let config: HostwardenConfig = serde_json::from_str(&raw)?;

        if config.version > CONFIG_VERSION {
            return Err(ConfigError::VersionMismatch {
                found: config.version,
                expected: CONFIG_VERSION,
            });
        }
        config.validate().map_err(ConfigError::Invalid)?;

        info!("[config] Loaded {:?}", path);
        Ok(config)
    }

    /// Load from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&default_config_path()?)
    }

    /// Write atomically (temp file + rename) to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate().map_err(ConfigError::Invalid)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
            {
                warn!("[config] Failed to restrict permissions on {:?}: {}", tmp, e);
            }
        }

        std::fs::rename(&tmp, path)?;
        info!("[config] Saved {:?}", path);
        Ok(())
    }

    /// Save to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&default_config_path()?)
    }
}
