//! Agent artifacts: the Python agent and its systemd unit.
//!
//! Both renderers are pure functions of the installer settings, so
//! reinstalling with the same settings writes identical bytes.

mod agent_script;
mod service_unit;

pub use agent_script::{render_agent_script, AgentParams};
pub use service_unit::{render_service_unit, UnitParams};

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256, as printed by `sha256sum`.
pub fn sha256_hex(content: &[u8]) -> String {
    Sha256::digest(content)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
