//! Connection pool keyed by [`ConnectionId`].
//!
//! ```text
//! slots: Mutex<HashMap<ConnectionId, Slot>>      (never held across .await)
//!                                   │
//!                                   ▼
//!                 Slot = Arc<tokio Mutex<Option<Arc<dyn RemoteShell>>>>
//!                        (held while opening, so one transport per id)
//! ```
//!
//! Entries are created lazily by `acquire` and destroyed by `close`, by the
//! idle sweep, or when they fail a liveness check.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{ConnectTarget, ConnectionId, Connector, RemoteShell, SshConnector, SshError};
use crate::config::{PoolSettings, SessionSettings};

type Slot = Arc<tokio::sync::Mutex<Option<Arc<dyn RemoteShell>>>>;

/// Snapshot returned by [`ConnectionPool::stats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub total: usize,
    pub alive: usize,
    /// Slots currently being opened or swept
    pub busy: usize,
    pub ids: Vec<ConnectionId>,
}

pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    slots: Mutex<HashMap<ConnectionId, Slot>>,
    idle_timeout: Duration,
    sweep_interval: Duration,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, settings: &PoolSettings) -> Self {
        Self {
            connector,
            slots: Mutex::new(HashMap::new()),
            idle_timeout: settings.idle_timeout(),
            sweep_interval: settings.sweep_interval(),
        }
    }

    /// Pool backed by real SSH sessions.
    pub fn ssh(session: SessionSettings, settings: &PoolSettings) -> Self {
        Self::new(Arc::new(SshConnector::new(session)), settings)
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    fn slot(&self, id: &ConnectionId) -> Slot {
        self.slots.lock().entry(id.clone()).or_default().clone()
    }

    /// Existing live connection for `id`, or a freshly opened one.
    ///
    /// A connect failure is returned as-is; the pool never retries it.
    pub async fn acquire(
        &self,
        id: &ConnectionId,
        target: &ConnectTarget,
    ) -> Result<Arc<dyn RemoteShell>, SshError> {
        let slot = self.slot(id);
        let mut entry = slot.lock().await;

        if let Some(shell) = entry.as_ref() {
            if shell.is_alive() {
                debug!("[pool] Reusing connection {}", id);
                return Ok(shell.clone());
            }
            info!("[pool] Connection {} failed liveness check, replacing", id);
            if let Some(stale) = entry.take() {
                stale.close().await;
            }
        }

        info!("[pool] Opening connection {} to {}", id, target.display_string());
        let shell = self.connector.open(target).await?;
        *entry = Some(shell.clone());
        Ok(shell)
    }

    /// Tear down `id`. Closing an unknown id is a no-op.
    pub async fn close(&self, id: &ConnectionId) {
        let slot = self.slots.lock().remove(id);
        let Some(slot) = slot else {
            return;
        };
        let shell = slot.lock().await.take();
        if let Some(shell) = shell {
            shell.close().await;
            info!("[pool] Closed connection {}", id);
        }
    }

    pub async fn close_all(&self) {
        let slots: Vec<(ConnectionId, Slot)> = self.slots.lock().drain().collect();
        let count = slots.len();
        for (id, slot) in slots {
            let shell = slot.lock().await.take();
            if let Some(shell) = shell {
                shell.close().await;
                debug!("[pool] Closed connection {}", id);
            }
        }
        if count > 0 {
            info!("[pool] Closed all {} connection(s)", count);
        }
    }

    /// Close dead entries and entries idle longer than the idle timeout.
    /// Returns the number of connections closed.
    pub async fn sweep(&self) -> usize {
        let snapshot: Vec<(ConnectionId, Slot)> = self
            .slots
            .lock()
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();

        let mut closed = 0;
        for (id, slot) in snapshot {
            // Held by acquire/close right now; leave it alone.
            let Ok(mut entry) = slot.try_lock() else {
                continue;
            };
            let reason = match entry.as_ref() {
                Some(shell) if !shell.is_alive() => "dead",
                Some(shell) if shell.idle_for() > self.idle_timeout => "idle",
                _ => continue,
            };
            if let Some(shell) = entry.take() {
                shell.close().await;
                closed += 1;
                info!("[pool] Swept {} connection {}", reason, id);
            }
        }

        self.slots.lock().retain(|_, slot| {
            Arc::strong_count(slot) > 1 || slot.try_lock().map_or(true, |entry| entry.is_some())
        });
        closed
    }

    pub fn stats(&self) -> PoolStats {
        let slots = self.slots.lock();
        let mut stats = PoolStats::default();
        for (id, slot) in slots.iter() {
            match slot.try_lock() {
                Ok(entry) => match entry.as_ref() {
                    Some(shell) => {
                        stats.total += 1;
                        if shell.is_alive() {
                            stats.alive += 1;
                        }
                        stats.ids.push(id.clone());
                    }
                    None => continue,
                },
                Err(_) => {
                    stats.busy += 1;
                    stats.ids.push(id.clone());
                }
            }
        }
        stats.ids.sort();
        stats
    }

    /// Start the background sweep at the configured
    /// [`sweep_interval`](PoolSettings::sweep_interval).
    #[must_use = "dropping the handle stops the reaper"]
    pub fn start_reaper(self: &Arc<Self>) -> ReaperHandle {
        self.spawn_reaper(self.sweep_interval)
    }

    /// Run [`sweep`](Self::sweep) every `period` until the pool is dropped or
    /// the returned handle is stopped or dropped.
    #[must_use = "dropping the handle stops the reaper"]
    pub fn spawn_reaper(self: &Arc<Self>, period: Duration) -> ReaperHandle {
        let pool = Arc::downgrade(self);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(reaper_loop(pool, period, stop_rx));
        ReaperHandle {
            stop_tx: Some(stop_tx),
            task,
        }
    }
}

async fn reaper_loop(pool: Weak<ConnectionPool>, period: Duration, mut stop_rx: oneshot::Receiver<()>) {
    let mut interval = tokio::time::interval(period);
    // Skip the immediate first tick
    interval.tick().await;
    debug!("[pool] Reaper started (every {}s)", period.as_secs());

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut stop_rx => break,
        }
        let Some(pool) = pool.upgrade() else {
            break;
        };
        let closed = pool.sweep().await;
        if closed > 0 {
            info!("[pool] Reaper closed {} connection(s)", closed);
        }
    }

    debug!("[pool] Reaper stopped");
}

/// Handle to the background sweep task
pub struct ReaperHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
