//! systemd unit for the agent.

use crate::config::InstallerSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitParams {
    pub install_dir: String,
    pub service_name: String,
}

impl From<&InstallerSettings> for UnitParams {
    fn from(settings: &InstallerSettings) -> Self {
        Self {
            install_dir: settings.install_dir.trim_end_matches('/').to_string(),
            service_name: settings.service_name.clone(),
        }
    }
}

pub fn render_service_unit(params: &UnitParams) -> String {
    format!(
        "[Unit]\n\
         Description=hostwarden monitoring agent ({name})\n\
         After=network-online.target\n\
         Wants=network-online.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         User=root\n\
         WorkingDirectory={dir}\n\
         ExecStart=/usr/bin/env python3 {dir}/agent.py\n\
         Restart=always\n\
         RestartSec=10\n\
         StandardOutput=journal\n\
         StandardError=journal\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        name = params.service_name,
        dir = params.install_dir,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_points_at_agent() {
        let unit = render_service_unit(&UnitParams::from(&InstallerSettings::default()));
        assert!(unit.contains("ExecStart=/usr/bin/env python3 /opt/hostwarden-agent/agent.py\n"));
        assert!(unit.contains("WorkingDirectory=/opt/hostwarden-agent\n"));
        assert!(unit.contains("Restart=always\n"));
        assert!(unit.contains("\n\n[Service]\n"));
        assert!(unit.ends_with("WantedBy=multi-user.target\n"));
    }
}
