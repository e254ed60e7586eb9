//! Package manager detection and dependency commands.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ssh::RemoteShell;

/// Supported package managers, in detection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageManager {
    AptGet,
    Yum,
    Dnf,
    Pacman,
}

impl PackageManager {
    pub const DETECTION_ORDER: [PackageManager; 4] = [
        PackageManager::AptGet,
        PackageManager::Yum,
        PackageManager::Dnf,
        PackageManager::Pacman,
    ];

    pub fn binary(self) -> &'static str {
        match self {
            PackageManager::AptGet => "apt-get",
            PackageManager::Yum => "yum",
            PackageManager::Dnf => "dnf",
            PackageManager::Pacman => "pacman",
        }
    }

    pub fn from_binary(name: &str) -> Option<Self> {
        let name = name.trim().rsplit('/').next().unwrap_or_default();
        Self::DETECTION_ORDER
            .into_iter()
            .find(|pm| pm.binary() == name)
    }

    /// Python packages providing the agent's runtime dependencies.
    pub fn dependency_packages(self) -> &'static [&'static str] {
        match self {
            PackageManager::AptGet | PackageManager::Yum | PackageManager::Dnf => {
                &["python3-pip", "python3-requests", "python3-psutil"]
            }
            PackageManager::Pacman => &["python-pip", "python-requests", "python-psutil"],
        }
    }

    /// Ordered commands installing `packages` non-interactively.
    pub fn install_commands(self, packages: &[&str]) -> Vec<String> {
        let list = packages.join(" ");
        match self {
            PackageManager::AptGet => vec![
                "DEBIAN_FRONTEND=noninteractive apt-get update -qq".to_string(),
                format!("DEBIAN_FRONTEND=noninteractive apt-get install -y -qq {}", list),
            ],
            PackageManager::Yum | PackageManager::Dnf => {
                vec![format!("{} install -y {}", self.binary(), list)]
            }
            PackageManager::Pacman => vec![
                "pacman -Sy --noconfirm".to_string(),
                format!("pacman -S --noconfirm --needed {}", list),
            ],
        }
    }

    pub fn dependency_commands(self) -> Vec<String> {
        self.install_commands(self.dependency_packages())
    }

    pub fn sudo_install_commands(self) -> Vec<String> {
        self.install_commands(&["sudo"])
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

/// Installs the agent's Python modules through pip when the distro packages
/// could not be installed.
pub const PIP_FALLBACK_COMMAND: &str = "python3 -m pip install requests psutil \
     || python3 -m pip install --break-system-packages requests psutil";

/// Prints the first available manager binary, in detection order.
pub fn detection_command() -> String {
    let names: Vec<&str> = PackageManager::DETECTION_ORDER
        .iter()
        .map(|pm| pm.binary())
        .collect();
    format!(
        "for pm in {}; do if command -v \"$pm\" >/dev/null 2>&1; then echo \"$pm\"; break; fi; done",
        names.join(" ")
    )
}

/// Probe the host once for a supported package manager.
pub async fn detect(shell: &dyn RemoteShell, timeout: Duration) -> Option<PackageManager> {
    let result = shell.execute_command(&detection_command(), timeout).await;
    let detected = result
        .output()
        .lines()
        .find_map(PackageManager::from_binary);
    debug!(
        "[installer] Package manager detection: {}",
        detected.map_or("none", PackageManager::binary)
    );
    detected
}

/// Joined form of `commands`, stopping at the first failure.
pub fn join_commands(commands: &[String]) -> String {
    commands.join(" && ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::mock::MockShell;

    #[test]
    fn test_dependency_table() {
        assert_eq!(
            PackageManager::AptGet.dependency_commands(),
            vec![
                "DEBIAN_FRONTEND=noninteractive apt-get update -qq",
                "DEBIAN_FRONTEND=noninteractive apt-get install -y -qq python3-pip python3-requests python3-psutil",
            ]
        );
        assert_eq!(
            PackageManager::Dnf.dependency_commands(),
            vec!["dnf install -y python3-pip python3-requests python3-psutil"]
        );
        assert_eq!(
            PackageManager::Pacman.dependency_commands()[1],
            "pacman -S --noconfirm --needed python-pip python-requests python-psutil"
        );
    }

    #[test]
    fn test_from_binary() {
        assert_eq!(PackageManager::from_binary("/usr/bin/yum"), Some(PackageManager::Yum));
        assert_eq!(PackageManager::from_binary("apt-get\n"), Some(PackageManager::AptGet));
        assert_eq!(PackageManager::from_binary("zypper"), None);
    }

    #[test]
    fn test_detection_order() {
        assert!(detection_command().contains("for pm in apt-get yum dnf pacman;"));
    }

    #[tokio::test]
    async fn test_detect() {
        let shell = MockShell::new();
        shell.on("for pm in", 0, "dnf\n");
        assert_eq!(
            detect(shell.as_ref(), Duration::from_secs(5)).await,
            Some(PackageManager::Dnf)
        );

        let bare = MockShell::new();
        assert_eq!(detect(bare.as_ref(), Duration::from_secs(5)).await, None);
    }
}
