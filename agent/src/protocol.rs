//! Wire types for hostwarden agent → panel communication.
//!
//! Wire format: one JSON object per HTTP POST, snake_case keys.
//! - Registration is sent once when the agent starts
//! - Heartbeats are sent every `DEFAULT_HEARTBEAT_INTERVAL_SECS`
//! - A failed send never stops the agent loop; it is retried on the next tick

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════
// Contract constants
// ═══════════════════════════════════════════════════════════════════════════

/// Version string reported by agents rendered from this contract.
pub const AGENT_VERSION: &str = "2.1.0";

/// Panel endpoint receiving `RegistrationMessage`.
pub const REGISTER_PATH: &str = "/api/agent/register";

/// Panel endpoint receiving `HeartbeatMessage`.
pub const HEARTBEAT_PATH: &str = "/api/agent/heartbeat";

/// Default heartbeat cadence.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// A host whose last heartbeat is at least this old is offline.
pub const STALENESS_WINDOW_SECS: i64 = 120;

/// HTTP timeout the agent applies to each send.
pub const SEND_TIMEOUT_SECS: u64 = 10;

// ═══════════════════════════════════════════════════════════════════════════
// Registration
// ═══════════════════════════════════════════════════════════════════════════

/// Operating system description reported at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsInfo {
    pub system: String,
    pub release: String,
    #[serde(default)]
    pub version: String,
    pub machine: String,
}

/// Sent once at agent start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationMessage {
    /// Stable fingerprint, see [`server_fingerprint`].
    pub server_id: String,
    pub hostname: String,
    pub ip_address: String,
    pub os_info: OsInfo,
    pub agent_version: String,
    pub timestamp: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Heartbeat
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuStats {
    /// Average across cores, 0-100.
    pub usage_percent: f64,
    pub per_core: Vec<f64>,
    pub cores: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Bytes.
    pub total: u64,
    /// Bytes.
    pub used: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskStats {
    /// Mount point → used percent.
    pub per_mount_percent: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    /// Interface name → cumulative counters.
    pub interfaces: BTreeMap<String, InterfaceCounters>,
}

/// Sent on every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub server_id: String,
    pub timestamp: DateTime<Utc>,
    pub cpu: CpuStats,
    pub memory: MemoryStats,
    pub disk: DiskStats,
    pub network: NetworkStats,
    /// 1, 5 and 15 minute load.
    pub load_average: [f64; 3],
    pub uptime_seconds: u64,
}

// ═══════════════════════════════════════════════════════════════════════════
// Identity & status
// ═══════════════════════════════════════════════════════════════════════════

/// Derive the stable server id from hostname and a hardware identifier
/// (machine-id, falling back to the primary MAC address).
pub fn server_fingerprint(hostname: &str, hardware_id: &str) -> String {
    let hardware_id = hardware_id.trim();
    if hardware_id.is_empty() {
        hostname.to_string()
    } else {
        format!("{}-{}", hostname, hardware_id)
    }
}

/// Host liveness as derived by the panel from heartbeat age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Online,
    Offline,
}

impl HostStatus {
    /// Online iff `now - last_heartbeat < STALENESS_WINDOW_SECS`.
    pub fn derive(last_heartbeat: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        match last_heartbeat {
            Some(last) if now - last < Duration::seconds(STALENESS_WINDOW_SECS) => Self::Online,
            _ => Self::Offline,
        }
    }
}
