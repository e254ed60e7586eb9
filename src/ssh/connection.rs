//! One authenticated SSH session to one host.
//!
//! ```text
//! execute_command ─┐
//! streaming ───────┼─► ExecLock ──► exec channel ─► pump(ChannelMsg) ─► CommandResult
//! upload/download ─┘                SFTP subchannel (lazy, reused)
//! ```
//!
//! A stale transport found at command time gets exactly one reconnect
//! attempt; if that fails the command reports a transport failure.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use russh::client::{self, Handle, Msg};
use russh::keys::{decode_secret_key, PrivateKey, PrivateKeyWithHashAlg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::handler::ClientHandler;
use super::exec_lock::ExecLock;
use super::state::{ConnectionState, Transition};
use super::{
    CommandResult, ConnectTarget, Connector, Credential, LineSink, RemoteShell, SshError,
};
use crate::config::SessionSettings;

/// Missed keepalives before russh drops the transport
const KEEPALIVE_MAX: usize = 3;

/// Production [`RemoteShell`] backed by russh.
pub struct SshConnection {
    target: ConnectTarget,
    settings: SessionSettings,
    handle: Mutex<Option<Arc<Handle<ClientHandler>>>>,
    sftp: tokio::sync::Mutex<Option<SftpSession>>,
    /// Serializes commands and transfers
    exec: ExecLock,
    connect_lock: tokio::sync::Mutex<()>,
    state: Mutex<ConnectionState>,
    /// Bumped on `close()`; in-flight reads watch it
    close_signal: watch::Sender<u64>,
}

impl SshConnection {
    pub fn new(target: ConnectTarget, settings: SessionSettings) -> Self {
        let (close_signal, _) = watch::channel(0);
        Self {
            target,
            settings,
            handle: Mutex::new(None),
            sftp: tokio::sync::Mutex::new(None),
            exec: ExecLock::default(),
            connect_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(ConnectionState::default()),
            close_signal,
        }
    }

    pub fn target(&self) -> &ConnectTarget {
        &self.target
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn transition(&self, transition: Transition) {
        if let Err(e) = self.state.lock().apply(transition) {
            debug!("[ssh] {}: {}", self.target.addr(), e);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Transport
    // ═══════════════════════════════════════════════════════════════════════

    async fn establish(&self) -> Result<(), SshError> {
        let _guard = self.connect_lock.lock().await;
        if self.is_alive() {
            return Ok(());
        }

        if self.state() == ConnectionState::Connected {
            self.transition(Transition::Lost);
        }
        self.transition(Transition::Connect);

        info!("[ssh] Connecting to {}", self.target.display_string());
        let budget = self.settings.connect_timeout();
        let result = match tokio::time::timeout(budget, self.handshake()).await {
            Ok(result) => result,
            Err(_) => Err(SshError::ConnectTimeout {
                addr: self.target.addr(),
                secs: budget.as_secs(),
            }),
        };

        match result {
            Ok(handle) => {
                *self.handle.lock() = Some(Arc::new(handle));
                self.transition(Transition::Established);
                self.exec.touch();
                info!(
                    "[ssh] Connected to {} ({} auth)",
                    self.target.display_string(),
                    self.target.credential.kind()
                );
                Ok(())
            }
            Err(e) => {
                self.transition(Transition::Failed);
                warn!("[ssh] {}", e);
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<Handle<ClientHandler>, SshError> {
        let config = client::Config {
            keepalive_interval: self.settings.keepalive_interval(),
            keepalive_max: KEEPALIVE_MAX,
            ..Default::default()
        };

        let addr = self.target.addr();
        let mut handle = client::connect(
            Arc::new(config),
            (self.target.host.clone(), self.target.port),
            ClientHandler::new(addr.clone()),
        )
        .await
        .map_err(|e| SshError::ConnectFailed {
            addr,
            reason: e.to_string(),
        })?;

        self.authenticate(&mut handle).await?;
        Ok(handle)
    }

    async fn authenticate(&self, handle: &mut Handle<ClientHandler>) -> Result<(), SshError> {
        match &self.target.credential {
            Credential::Password(password) => self.auth_password(handle, password).await,
            Credential::PrivateKey {
                material,
                passphrase,
                fallback_password,
            } => {
                let passphrase = passphrase.as_ref().map(|p| p.as_str());
                match decode_secret_key(material.as_str(), passphrase) {
                    Ok(key) => self.auth_key(handle, key).await,
                    Err(e) => match fallback_password {
                        Some(password) => {
                            warn!(
                                "[ssh] Private key for {} could not be parsed ({}), falling back to password",
                                self.target.display_string(),
                                e
                            );
                            self.auth_password(handle, password).await
                        }
                        None => Err(SshError::KeyError(e.to_string())),
                    },
                }
            }
        }
    }

    async fn auth_password(
        &self,
        handle: &mut Handle<ClientHandler>,
        password: &str,
    ) -> Result<(), SshError> {
        let result = handle
            .authenticate_password(self.target.username.as_str(), password)
            .await
            .map_err(|e| self.auth_failed(e.to_string()))?;
        if !result.success() {
            return Err(self.auth_failed("server rejected password".to_string()));
        }
        Ok(())
    }

    async fn auth_key(
        &self,
        handle: &mut Handle<ClientHandler>,
        key: PrivateKey,
    ) -> Result<(), SshError> {
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .map_err(|e| self.auth_failed(e.to_string()))?
            .flatten();
        let result = handle
            .authenticate_publickey(
                self.target.username.as_str(),
                PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
            )
            .await
            .map_err(|e| self.auth_failed(e.to_string()))?;
        if !result.success() {
            return Err(self.auth_failed("server rejected public key".to_string()));
        }
        Ok(())
    }

    fn auth_failed(&self, reason: String) -> SshError {
        SshError::AuthFailed {
            user: self.target.username.clone(),
            addr: self.target.addr(),
            reason,
        }
    }

    /// Current handle if its transport is still open.
    fn live_handle(&self) -> Option<Arc<Handle<ClientHandler>>> {
        let mut slot = self.handle.lock();
        match slot.as_ref() {
            Some(handle) if !handle.is_closed() => Some(handle.clone()),
            Some(_) => {
                slot.take();
                self.transition(Transition::Lost);
                None
            }
            None => None,
        }
    }

    fn drop_transport(&self, reason: &str) {
        self.handle.lock().take();
        if let Ok(mut sftp) = self.sftp.try_lock() {
            sftp.take();
        }
        debug!("[ssh] Dropping transport to {}: {}", self.target.addr(), reason);
        self.transition(Transition::Lost);
    }

    /// Live handle, reconnecting once if the transport went stale.
    async fn transport(&self) -> Result<Arc<Handle<ClientHandler>>, SshError> {
        if let Some(handle) = self.live_handle() {
            return Ok(handle);
        }
        info!("[ssh] Transport to {} is stale, reconnecting", self.target.addr());
        self.establish().await?;
        self.live_handle().ok_or(SshError::NotConnected)
    }

    async fn exec_on(
        handle: &Handle<ClientHandler>,
        command: &str,
    ) -> Result<Channel<Msg>, SshError> {
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::ChannelError(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::ChannelError(e.to_string()))?;
        Ok(channel)
    }

    async fn open_exec_channel(&self, command: &str) -> Result<Channel<Msg>, SshError> {
        let had_live = self.live_handle().is_some();
        let handle = self.transport().await?;
        match Self::exec_on(&handle, command).await {
            Ok(channel) => Ok(channel),
            // A transport that looked alive may still be half-dead; one retry.
            Err(e) if had_live => {
                warn!(
                    "[ssh] Channel open on {} failed ({}), reconnecting once",
                    self.target.addr(),
                    e
                );
                self.drop_transport(&e.to_string());
                self.establish().await?;
                let handle = self.live_handle().ok_or(SshError::NotConnected)?;
                Self::exec_on(&handle, command).await
            }
            Err(e) => Err(e),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Command execution
    // ═══════════════════════════════════════════════════════════════════════

    async fn run(
        &self,
        command: &str,
        timeout: Duration,
        sentinel: Option<&str>,
        mut sink: Option<LineSink<'_>>,
    ) -> CommandResult {
        let _guard = self.exec.acquire().await;

        let mut channel = match self.open_exec_channel(command).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!("[ssh] Cannot run command on {}: {}", self.target.addr(), e);
                return CommandResult::transport_failure(e.to_string());
            }
        };

        let mut out = OutputCollector::new(sentinel);
        let mut closed = self.close_signal.subscribe();
        let end = tokio::time::timeout(
            timeout,
            self.pump(&mut channel, &mut out, &mut sink, &mut closed),
        )
        .await;
        out.finish(matches!(end, Ok(PumpEnd::Exited(_))), &mut sink);

        match end {
            Ok(PumpEnd::Exited(code)) => CommandResult::exited(code, out.stdout, out.stderr),
            Ok(PumpEnd::Sentinel(code)) => {
                let _ = channel.close().await;
                match code {
                    Some(code) => CommandResult::exited(code, out.stdout, out.stderr),
                    None => CommandResult::partial_failure(
                        out.stdout,
                        out.stderr,
                        "completion marker carried no exit code",
                    ),
                }
            }
            Ok(PumpEnd::NoExitStatus) => {
                if self.live_handle().is_none() {
                    warn!("[ssh] Transport to {} dropped mid-command", self.target.addr());
                }
                CommandResult::partial_failure(
                    out.stdout,
                    out.stderr,
                    "channel closed without exit status",
                )
            }
            Ok(PumpEnd::Cancelled) => {
                CommandResult::partial_failure(out.stdout, out.stderr, "connection closed")
            }
            Err(_) => {
                let _ = channel.close().await;
                warn!(
                    "[ssh] Command on {} timed out after {}s",
                    self.target.addr(),
                    timeout.as_secs()
                );
                CommandResult::partial_failure(
                    out.stdout,
                    out.stderr,
                    format!("command timed out after {}s", timeout.as_secs()),
                )
            }
        }
    }

    async fn pump(
        &self,
        channel: &mut Channel<Msg>,
        out: &mut OutputCollector,
        sink: &mut Option<LineSink<'_>>,
        closed: &mut watch::Receiver<u64>,
    ) -> PumpEnd {
        let mut exit_status = None;
        loop {
            tokio::select! {
                msg = channel.wait() => match msg {
                    Some(ChannelMsg::Data { data }) => {
                        self.exec.touch();
                        if let Some(code) = out.push_stdout(&data, sink) {
                            return PumpEnd::Sentinel(code);
                        }
                    }
                    Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                        self.exec.touch();
                        out.push_stderr(&data, sink);
                    }
                    Some(ChannelMsg::ExitStatus { exit_status: code }) => {
                        exit_status = Some(code);
                    }
                    Some(ChannelMsg::Close) | None => {
                        return match exit_status {
                            Some(code) => PumpEnd::Exited(code),
                            None => PumpEnd::NoExitStatus,
                        };
                    }
                    _ => {}
                },
                _ = closed.changed() => return PumpEnd::Cancelled,
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SFTP
    // ═══════════════════════════════════════════════════════════════════════

    async fn sftp_session(
        &self,
    ) -> Result<tokio::sync::MutexGuard<'_, Option<SftpSession>>, SshError> {
        let mut slot = self.sftp.lock().await;
        if slot.is_none() {
            let handle = self.transport().await?;
            let channel = handle
                .channel_open_session()
                .await
                .map_err(|e| SshError::ChannelError(e.to_string()))?;
            channel
                .request_subsystem(true, "sftp")
                .await
                .map_err(|e| SshError::SftpError(e.to_string()))?;
            let session = SftpSession::new(channel.into_stream()).await?;
            debug!("[sftp] Subsystem opened on {}", self.target.addr());
            *slot = Some(session);
        }
        Ok(slot)
    }
}

/// How the channel read loop ended.
enum PumpEnd {
    Exited(u32),
    Sentinel(Option<u32>),
    NoExitStatus,
    Cancelled,
}

/// Splits channel output into lines and accumulates stdout/stderr.
struct OutputCollector {
    stdout: String,
    stderr: String,
    stdout_pending: Vec<u8>,
    stderr_pending: Vec<u8>,
    sentinel: Option<String>,
}

impl OutputCollector {
    fn new(sentinel: Option<&str>) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            stdout_pending: Vec::new(),
            stderr_pending: Vec::new(),
            sentinel: sentinel.filter(|s| !s.is_empty()).map(str::to_string),
        }
    }

    /// Returns `Some(code)` once a sentinel line is seen.
    fn push_stdout(&mut self, data: &[u8], sink: &mut Option<LineSink<'_>>) -> Option<Option<u32>> {
        self.stdout_pending.extend_from_slice(data);
        while let Some(line) = take_line(&mut self.stdout_pending) {
            if let Some(code) = self.sentinel_code(&line) {
                return Some(code);
            }
            emit(sink, &line);
            self.stdout.push_str(&line);
            self.stdout.push('\n');
        }
        None
    }

    fn push_stderr(&mut self, data: &[u8], sink: &mut Option<LineSink<'_>>) {
        self.stderr_pending.extend_from_slice(data);
        while let Some(line) = take_line(&mut self.stderr_pending) {
            emit(sink, &line);
            self.stderr.push_str(&line);
            self.stderr.push('\n');
        }
    }

    /// End of output. A trailing partial line is only emitted after a clean
    /// exit; after a drop or timeout it is discarded so a resumed read gets
    /// the whole line.
    fn finish(&mut self, clean_exit: bool, sink: &mut Option<LineSink<'_>>) {
        if clean_exit {
            self.flush(sink);
        } else {
            self.stdout_pending.clear();
            self.stderr_pending.clear();
        }
    }

    fn flush(&mut self, sink: &mut Option<LineSink<'_>>) {
        if !self.stdout_pending.is_empty() {
            let line = decode_line(std::mem::take(&mut self.stdout_pending));
            if self.sentinel_code(&line).is_none() {
                emit(sink, &line);
                self.stdout.push_str(&line);
            }
        }
        if !self.stderr_pending.is_empty() {
            let line = decode_line(std::mem::take(&mut self.stderr_pending));
            emit(sink, &line);
            self.stderr.push_str(&line);
        }
    }

    fn sentinel_code(&self, line: &str) -> Option<Option<u32>> {
        let sentinel = self.sentinel.as_deref()?;
        let rest = line.trim_start().strip_prefix(sentinel)?;
        Some(rest.trim().parse().ok())
    }
}

fn take_line(pending: &mut Vec<u8>) -> Option<String> {
    let pos = pending.iter().position(|&b| b == b'\n')?;
    let mut line: Vec<u8> = pending.drain(..=pos).collect();
    line.pop();
    Some(decode_line(line))
}

fn decode_line(mut bytes: Vec<u8>) -> String {
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn emit(sink: &mut Option<LineSink<'_>>, line: &str) {
    if let Some(f) = sink.as_mut() {
        f(line);
    }
}

#[async_trait]
impl RemoteShell for SshConnection {
    async fn connect(&self) -> Result<(), SshError> {
        if self.is_alive() {
            return Ok(());
        }
        self.establish().await
    }

    async fn execute_command(&self, command: &str, timeout: Duration) -> CommandResult {
        self.run(command, timeout, None, None).await
    }

    async fn execute_command_streaming(
        &self,
        command: &str,
        timeout: Duration,
        sentinel: Option<&str>,
        on_line: LineSink<'_>,
    ) -> CommandResult {
        self.run(command, timeout, sentinel, Some(on_line)).await
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<u64, SshError> {
        let data = tokio::fs::read(local_path).await?;
        let _guard = self.exec.acquire().await;

        let mut slot = self.sftp_session().await?;
        let result = match slot.as_ref() {
            Some(sftp) => async {
                let mut file = sftp.create(remote_path).await?;
                file.write_all(&data).await?;
                file.shutdown().await?;
                Ok::<u64, SshError>(data.len() as u64)
            }
            .await,
            None => Err(SshError::NotConnected),
        };
        if result.is_err() {
            slot.take();
        }
        self.exec.touch();

        if let Ok(bytes) = &result {
            debug!("[sftp] Uploaded {} bytes to {}", bytes, remote_path);
        }
        result
    }

    async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<u64, SshError> {
        let _guard = self.exec.acquire().await;

        let mut slot = self.sftp_session().await?;
        let data = match slot.as_ref() {
            Some(sftp) => sftp.read(remote_path).await.map_err(SshError::from),
            None => Err(SshError::NotConnected),
        };
        let data = match data {
            Ok(data) => data,
            Err(e) => {
                slot.take();
                return Err(e);
            }
        };
        drop(slot);

        tokio::fs::write(local_path, &data).await?;
        self.exec.touch();
        debug!("[sftp] Downloaded {} bytes from {}", data.len(), remote_path);
        Ok(data.len() as u64)
    }

    fn is_alive(&self) -> bool {
        let transport_open = self
            .handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_closed());
        transport_open && self.state() == ConnectionState::Connected
    }

    fn idle_for(&self) -> Duration {
        self.exec.idle_for()
    }

    async fn close(&self) {
        self.close_signal.send_modify(|generation| *generation = generation.wrapping_add(1));

        let handle = self.handle.lock().take();
        let sftp = match self.sftp.try_lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(sftp) = sftp {
            let _ = sftp.close().await;
        }
        if let Some(handle) = handle {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
            {
                debug!("[ssh] Disconnect from {} failed: {}", self.target.addr(), e);
            }
            info!("[ssh] Closed connection to {}", self.target.display_string());
        }
        self.transition(Transition::Close);
    }
}

/// Opens [`SshConnection`]s with shared session settings.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    settings: SessionSettings,
}

impl SshConnector {
    pub fn new(settings: SessionSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn open(&self, target: &ConnectTarget) -> Result<Arc<dyn RemoteShell>, SshError> {
        let connection = SshConnection::new(target.clone(), self.settings.clone());
        connection.connect().await?;
        Ok(Arc::new(connection))
    }
}
