//! Detached remote jobs: script + log tail + completion marker.
//!
//! ```text
//! write /tmp/hostwarden-<id>.sh ──► setsid nohup sh script > log 2>&1 &
//!                                        │
//!            tail -n +1 -F log ◄─────────┘   ... "__HOSTWARDEN_DONE__:<rc>"
//!            (transport drop: reconnect once, resume at line N+1)
//! ```
//!
//! The job keeps running if the SSH transport drops, so a long package
//! install survives a flaky link.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::privilege::Privilege;
use super::script::{heredoc_write, shell_quote};
use crate::ssh::{CommandResult, LineSink, RemoteShell};

/// Line the job prints when its body finishes; the exit code follows.
pub const DONE_MARKER: &str = "__HOSTWARDEN_DONE__:";

/// Paths of one detached job on the remote host.
#[derive(Debug, Clone)]
pub struct DetachedJob {
    pub script_path: String,
    pub log_path: String,
}

impl Default for DetachedJob {
    fn default() -> Self {
        Self::new()
    }
}

impl DetachedJob {
    pub fn new() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            script_path: format!("/tmp/hostwarden-{}.sh", id),
            log_path: format!("/tmp/hostwarden-{}.log", id),
        }
    }

    /// Script content: runs `body` in a subshell and always prints the marker.
    ///
    /// The marker is preceded by a newline so it starts its own line even when
    /// the body's last output was not newline-terminated.
    pub fn script(body: &str) -> String {
        format!(
            "#!/bin/sh\n(\n{body}\n)\nrc=$?\nprintf '\\n%s%s\\n' '{marker}' \"$rc\"\nexit $rc\n",
            body = body.trim_end(),
            marker = DONE_MARKER
        )
    }

    pub fn write_command(&self, body: &str) -> Result<String, String> {
        heredoc_write(&self.script_path, &Self::script(body), 0o700)
    }

    pub fn launch_command(&self) -> String {
        let script = shell_quote(&self.script_path);
        let log = shell_quote(&self.log_path);
        format!(
            ": > {log}; if command -v setsid >/dev/null 2>&1; then \
             setsid nohup sh {script} > {log} 2>&1 < /dev/null & \
             else nohup sh {script} > {log} 2>&1 < /dev/null & fi",
            log = log,
            script = script
        )
    }

    /// Tail the log from 1-based line `from_line`, following rotation.
    pub fn tail_command(&self, from_line: usize) -> String {
        format!("tail -n +{} -F {} 2>/dev/null", from_line, shell_quote(&self.log_path))
    }

    pub fn cleanup_command(&self) -> String {
        format!(
            "rm -f {} {}",
            shell_quote(&self.script_path),
            shell_quote(&self.log_path)
        )
    }
}

/// Run `body` as a detached root job and stream its log into `on_line`.
///
/// Returns when the completion marker is seen, on timeout, or when the log
/// tail fails a second time.
pub async fn run_detached(
    shell: &dyn RemoteShell,
    privilege: &Privilege,
    body: &str,
    timeout: Duration,
    command_timeout: Duration,
    on_line: LineSink<'_>,
) -> CommandResult {
    let job = DetachedJob::new();
    let result = run_job(shell, privilege, &job, body, timeout, command_timeout, on_line).await;

    let cleanup = shell
        .execute_command(&privilege.wrap(&job.cleanup_command()), command_timeout)
        .await;
    if !cleanup.success {
        debug!("[detached] Cleanup of {} failed: {}", job.script_path, cleanup.error_text());
    }
    result
}

async fn run_job(
    shell: &dyn RemoteShell,
    privilege: &Privilege,
    job: &DetachedJob,
    body: &str,
    timeout: Duration,
    command_timeout: Duration,
    on_line: LineSink<'_>,
) -> CommandResult {
    let write = match job.write_command(body) {
        Ok(cmd) => cmd,
        Err(e) => return CommandResult::transport_failure(e),
    };
    let written = shell.execute_command(&write, command_timeout).await;
    if !written.success {
        return written;
    }

    let launched = shell
        .execute_command(&privilege.wrap(&job.launch_command()), command_timeout)
        .await;
    if !launched.success {
        return launched;
    }
    info!("[detached] Started job {}", job.script_path);

    let deadline = Instant::now() + timeout;
    let mut seen = 0usize;
    let mut stdout = String::new();
    let mut reconnected = false;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        let tail_cmd = job.tail_command(seen + 1);
        // Every complete log line counts toward the resume offset; blank
        // lines (including the one before the marker) are not forwarded.
        let mut forward = |line: &str| {
            seen += 1;
            if !line.is_empty() {
                on_line(line);
            }
        };
        let tail = shell
            .execute_command_streaming(
                &tail_cmd,
                remaining,
                Some(DONE_MARKER),
                &mut forward,
            )
            .await;
        stdout.push_str(&tail.stdout);

        if !tail.is_transport_failure() {
            return CommandResult { stdout, ..tail };
        }
        if reconnected || Instant::now() >= deadline {
            return CommandResult::partial_failure(stdout, tail.stderr, "log tail failed");
        }

        reconnected = true;
        warn!(
            "[detached] Log tail dropped after {} line(s) ({}), reconnecting",
            seen,
            tail.error_text()
        );
        if let Err(e) = shell.connect().await {
            return CommandResult::partial_failure(stdout, String::new(), e.to_string());
        }
    }

    CommandResult::partial_failure(
        stdout,
        String::new(),
        format!("detached job did not finish within {}s", timeout.as_secs()),
    )
}
