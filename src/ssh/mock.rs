//! Scripted in-memory shell for tests.
//!
//! Commands are matched against substring rules; the most recently added
//! matching rule wins, so scenarios can layer overrides on top of defaults.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::exec_lock::ExecLock;
use super::{CommandResult, ConnectTarget, Connector, LineSink, RemoteShell, SshError};

#[derive(Debug, Clone)]
enum Reply {
    Output {
        exit_code: u32,
        stdout: String,
        stderr: String,
    },
    /// Streamed lines; `exit: None` drops the transport after the last line.
    Lines {
        lines: Vec<String>,
        exit: Option<u32>,
    },
}

#[derive(Debug)]
struct Rule {
    pattern: String,
    reply: Reply,
    remaining: Option<usize>,
}

pub struct MockShell {
    rules: Mutex<Vec<Rule>>,
    commands: Mutex<Vec<String>>,
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
    alive: AtomicBool,
    connects: AtomicUsize,
    closes: AtomicUsize,
    exec: ExecLock,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for MockShell {
    fn default() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            alive: AtomicBool::new(true),
            connects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            exec: ExecLock::default(),
            latency: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }
}

impl MockShell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, pattern: &str, reply: Reply, remaining: Option<usize>) {
        self.rules.lock().push(Rule {
            pattern: pattern.to_string(),
            reply,
            remaining,
        });
    }

    /// Commands containing `pattern` exit with `exit_code` and print `stdout`.
    pub fn on(&self, pattern: &str, exit_code: u32, stdout: &str) -> &Self {
        self.push(
            pattern,
            Reply::Output {
                exit_code,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
            None,
        );
        self
    }

    pub fn on_stderr(&self, pattern: &str, exit_code: u32, stderr: &str) -> &Self {
        self.push(
            pattern,
            Reply::Output {
                exit_code,
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
            None,
        );
        self
    }

    /// Like [`on`](Self::on) but only for the next `times` matches.
    pub fn on_times(&self, pattern: &str, times: usize, exit_code: u32, stdout: &str) -> &Self {
        self.push(
            pattern,
            Reply::Output {
                exit_code,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
            Some(times),
        );
        self
    }

    /// Stream `lines`, then exit with `exit`, or drop the transport if `None`.
    pub fn on_lines(&self, pattern: &str, lines: &[&str], exit: Option<u32>) -> &Self {
        self.push(
            pattern,
            Reply::Lines {
                lines: lines.iter().map(|l| l.to_string()).collect(),
                exit,
            },
            None,
        );
        self
    }

    pub fn on_lines_once(&self, pattern: &str, lines: &[&str], exit: Option<u32>) -> &Self {
        self.push(
            pattern,
            Reply::Lines {
                lines: lines.iter().map(|l| l.to_string()).collect(),
                exit,
            },
            Some(1),
        );
        self
    }

    /// Every command takes `latency` of (tokio) time to run.
    pub fn with_latency(&self, latency: Duration) -> &Self {
        *self.latency.lock() = latency;
        self
    }

    /// Most commands ever observed running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.commands.lock().iter().any(|c| c.contains(needle))
    }

    pub fn count(&self, needle: &str) -> usize {
        self.commands.lock().iter().filter(|c| c.contains(needle)).count()
    }

    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads.lock().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Simulate a silently dropped transport.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn reply_for(&self, command: &str) -> Reply {
        let mut rules = self.rules.lock();
        for rule in rules.iter_mut().rev() {
            if !command.contains(&rule.pattern) {
                continue;
            }
            match rule.remaining.as_mut() {
                Some(0) => continue,
                Some(n) => *n -= 1,
                None => {}
            }
            return rule.reply.clone();
        }
        Reply::Output {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    async fn dispatch(
        &self,
        command: &str,
        sentinel: Option<&str>,
        on_line: Option<LineSink<'_>>,
    ) -> CommandResult {
        let _guard = self.exec.acquire().await;
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let result = self.run(command, sentinel, on_line);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn run(
        &self,
        command: &str,
        sentinel: Option<&str>,
        mut on_line: Option<LineSink<'_>>,
    ) -> CommandResult {
        if !self.alive.load(Ordering::SeqCst) {
            return CommandResult::transport_failure("not connected");
        }
        self.commands.lock().push(command.to_string());

        let (lines, exit, stderr) = match self.reply_for(command) {
            Reply::Output {
                exit_code,
                stdout,
                stderr,
            } => (
                stdout.lines().map(str::to_string).collect::<Vec<_>>(),
                Some(exit_code),
                stderr,
            ),
            Reply::Lines { lines, exit } => (lines, exit, String::new()),
        };

        let mut stdout = String::new();
        for line in lines {
            if let Some(code) = sentinel.and_then(|s| line.strip_prefix(s)) {
                return match code.trim().parse::<u32>() {
                    Ok(code) => CommandResult::exited(code, stdout, stderr),
                    Err(_) => CommandResult::partial_failure(stdout, stderr, "bad marker"),
                };
            }
            if let Some(f) = on_line.as_mut() {
                f(&line);
            }
            stdout.push_str(&line);
            stdout.push('\n');
        }
        if let Some(f) = on_line.as_mut() {
            for line in stderr.lines() {
                f(line);
            }
        }

        match exit {
            Some(code) => CommandResult::exited(code, stdout, stderr),
            None => {
                self.alive.store(false, Ordering::SeqCst);
                CommandResult::partial_failure(stdout, stderr, "connection reset")
            }
        }
    }
}

#[async_trait]
impl RemoteShell for MockShell {
    async fn connect(&self) -> Result<(), SshError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn execute_command(&self, command: &str, _timeout: Duration) -> CommandResult {
        self.dispatch(command, None, None).await
    }

    async fn execute_command_streaming(
        &self,
        command: &str,
        _timeout: Duration,
        sentinel: Option<&str>,
        on_line: LineSink<'_>,
    ) -> CommandResult {
        self.dispatch(command, sentinel, Some(on_line)).await
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<u64, SshError> {
        let data = tokio::fs::read(local_path).await?;
        let _guard = self.exec.acquire().await;
        let len = data.len() as u64;
        self.uploads.lock().push((remote_path.to_string(), data));
        Ok(len)
    }

    async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<u64, SshError> {
        let data = self
            .uploads
            .lock()
            .iter()
            .rev()
            .find(|(path, _)| path == remote_path)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| SshError::SftpError(format!("no such file: {}", remote_path)))?;
        tokio::fs::write(local_path, &data).await?;
        Ok(data.len() as u64)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn idle_for(&self) -> Duration {
        self.exec.idle_for()
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Connector that hands out fresh scripted shells built by `script`.
pub struct MockConnector {
    script: Box<dyn Fn(&MockShell) + Send + Sync>,
    failure: Option<String>,
    opened: Mutex<Vec<Arc<MockShell>>>,
}

impl MockConnector {
    pub fn new(script: impl Fn(&MockShell) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            failure: None,
            opened: Mutex::new(Vec::new()),
        })
    }

    /// Every open fails authentication with `reason`.
    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(|_| {}),
            failure: Some(reason.to_string()),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn opens(&self) -> usize {
        self.opened.lock().len()
    }

    /// Most recently opened shell.
    pub fn last(&self) -> Option<Arc<MockShell>> {
        self.opened.lock().last().cloned()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, target: &ConnectTarget) -> Result<Arc<dyn RemoteShell>, SshError> {
        if let Some(reason) = &self.failure {
            return Err(SshError::AuthFailed {
                user: target.username.clone(),
                addr: target.addr(),
                reason: reason.clone(),
            });
        }
        let shell = MockShell::new();
        (self.script)(&shell);
        shell.connect().await?;
        self.opened.lock().push(shell.clone());
        Ok(shell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_commands_run_one_at_a_time() {
        let shell = MockShell::new();
        shell.with_latency(Duration::from_secs(2));
        let timeout = Duration::from_secs(30);

        let started = tokio::time::Instant::now();
        let (a, b) = tokio::join!(
            shell.execute_command("uptime", timeout),
            shell.execute_command("df -h", timeout),
        );

        assert!(a.success && b.success);
        assert_eq!(shell.peak_in_flight(), 1);
        assert_eq!(started.elapsed(), Duration::from_secs(4));
        assert_eq!(shell.commands(), vec!["uptime", "df -h"]);
    }
}
