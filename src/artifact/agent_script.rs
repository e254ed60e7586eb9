//! Python monitoring agent deployed to `<install_dir>/agent.py`.
//!
//! The rendered source speaks the `hostwarden-agent` contract: snake_case
//! JSON, one registration at start, then a heartbeat every interval. A
//! failed send is logged and retried on the next tick.

use hostwarden_agent::{
    AGENT_VERSION, HEARTBEAT_PATH, REGISTER_PATH, SEND_TIMEOUT_SECS,
};

use crate::config::InstallerSettings;

/// Inputs of [`render_agent_script`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentParams {
    pub panel_host: String,
    pub panel_port: u16,
    pub heartbeat_interval_secs: u64,
}

impl From<&InstallerSettings> for AgentParams {
    fn from(settings: &InstallerSettings) -> Self {
        Self {
            panel_host: settings.panel_host.clone(),
            panel_port: settings.panel_port,
            heartbeat_interval_secs: settings.heartbeat_interval_secs,
        }
    }
}

const TEMPLATE: &str = r#"#!/usr/bin/env python3
"""hostwarden monitoring agent @@AGENT_VERSION@@ (generated, do not edit)."""

import logging
import os
import platform
import socket
import time
import uuid
from datetime import datetime, timezone

import psutil
import requests

PANEL_HOST = @@PANEL_HOST@@
PANEL_PORT = @@PANEL_PORT@@
REGISTER_URL = "http://%s:%d@@REGISTER_PATH@@" % (PANEL_HOST, PANEL_PORT)
HEARTBEAT_URL = "http://%s:%d@@HEARTBEAT_PATH@@" % (PANEL_HOST, PANEL_PORT)
HEARTBEAT_INTERVAL = @@HEARTBEAT_INTERVAL@@
SEND_TIMEOUT = @@SEND_TIMEOUT@@
AGENT_VERSION = "@@AGENT_VERSION@@"

logging.basicConfig(level=logging.INFO, format="%(asctime)s %(levelname)s %(message)s")
log = logging.getLogger("hostwarden-agent")


def now():
    return datetime.now(timezone.utc).isoformat()


def hardware_id():
    for path in ("/etc/machine-id", "/var/lib/dbus/machine-id"):
        try:
            with open(path) as f:
                value = f.read().strip()
            if value:
                return value
        except OSError:
            pass
    node = uuid.getnode()
    return ":".join("%02x" % ((node >> shift) & 0xFF) for shift in range(40, -1, -8))


def server_id():
    hostname = socket.gethostname()
    hw = hardware_id().strip()
    return "%s-%s" % (hostname, hw) if hw else hostname


def local_ip():
    s = socket.socket(socket.AF_INET, socket.SOCK_DGRAM)
    try:
        s.connect((PANEL_HOST, PANEL_PORT))
        return s.getsockname()[0]
    except OSError:
        return "127.0.0.1"
    finally:
        s.close()


def registration(sid):
    uname = platform.uname()
    return {
        "server_id": sid,
        "hostname": socket.gethostname(),
        "ip_address": local_ip(),
        "os_info": {
            "system": uname.system,
            "release": uname.release,
            "version": uname.version,
            "machine": uname.machine,
        },
        "agent_version": AGENT_VERSION,
        "timestamp": now(),
    }


def heartbeat(sid):
    per_core = psutil.cpu_percent(interval=1, percpu=True)
    memory = psutil.virtual_memory()

    mounts = {}
    for part in psutil.disk_partitions(all=False):
        try:
            mounts[part.mountpoint] = round(psutil.disk_usage(part.mountpoint).percent, 1)
        except (PermissionError, OSError):
            continue

    interfaces = {}
    for name, c in psutil.net_io_counters(pernic=True).items():
        interfaces[name] = {
            "bytes_sent": c.bytes_sent,
            "bytes_recv": c.bytes_recv,
            "packets_sent": c.packets_sent,
            "packets_recv": c.packets_recv,
        }

    try:
        load = list(os.getloadavg())
    except OSError:
        load = [0.0, 0.0, 0.0]

    return {
        "server_id": sid,
        "timestamp": now(),
        "cpu": {
            "usage_percent": round(sum(per_core) / max(len(per_core), 1), 1),
            "per_core": [round(p, 1) for p in per_core],
            "cores": len(per_core),
        },
        "memory": {
            "total": memory.total,
            "used": memory.used,
            "percent": round(memory.percent, 1),
        },
        "disk": {"per_mount_percent": mounts},
        "network": {"interfaces": interfaces},
        "load_average": load,
        "uptime_seconds": int(time.time() - psutil.boot_time()),
    }


def send(url, payload):
    try:
        response = requests.post(url, json=payload, timeout=SEND_TIMEOUT)
        if response.status_code == 200:
            return True
        log.warning("%s returned HTTP %d", url, response.status_code)
    except requests.RequestException as e:
        log.warning("%s unreachable: %s", url, e)
    return False


def main():
    sid = server_id()
    log.info("agent %s starting as %s, panel %s:%d", AGENT_VERSION, sid, PANEL_HOST, PANEL_PORT)
    registered = False
    while True:
        started = time.monotonic()
        try:
            if not registered:
                registered = send(REGISTER_URL, registration(sid))
                if registered:
                    log.info("registered with panel")
            send(HEARTBEAT_URL, heartbeat(sid))
        except Exception:
            log.exception("tick failed")
        time.sleep(max(0.0, HEARTBEAT_INTERVAL - (time.monotonic() - started)))


if __name__ == "__main__":
    main()
"#;

/// Render the agent source. Pure; the same params give the same bytes.
pub fn render_agent_script(params: &AgentParams) -> String {
    // A JSON string literal is also a valid Python string literal.
    let host_literal = serde_json::to_string(&params.panel_host)
        .unwrap_or_else(|_| "\"127.0.0.1\"".to_string());

    TEMPLATE
        .replace("@@PANEL_HOST@@", &host_literal)
        .replace("@@PANEL_PORT@@", &params.panel_port.to_string())
        .replace("@@REGISTER_PATH@@", REGISTER_PATH)
        .replace("@@HEARTBEAT_PATH@@", HEARTBEAT_PATH)
        .replace(
            "@@HEARTBEAT_INTERVAL@@",
            &params.heartbeat_interval_secs.max(1).to_string(),
        )
        .replace("@@SEND_TIMEOUT@@", &SEND_TIMEOUT_SECS.to_string())
        .replace("@@AGENT_VERSION@@", AGENT_VERSION)
}
