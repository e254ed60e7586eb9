//! Per-connection command gate.
//!
//! One holder at a time runs a command or transfer. Activity is stamped on
//! entry, on every `touch` and on release; while held, the connection is
//! never idle.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

pub struct ExecLock {
    gate: tokio::sync::Mutex<()>,
    last_activity: Mutex<Instant>,
}

impl Default for ExecLock {
    fn default() -> Self {
        Self {
            gate: tokio::sync::Mutex::new(()),
            last_activity: Mutex::new(Instant::now()),
        }
    }
}

impl ExecLock {
    /// Wait for exclusive use of the connection.
    pub async fn acquire(&self) -> ExecGuard<'_> {
        let guard = self.gate.lock().await;
        self.touch();
        ExecGuard {
            _guard: guard,
            owner: self,
        }
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last activity; zero while held.
    pub fn idle_for(&self) -> Duration {
        if self.gate.try_lock().is_err() {
            return Duration::ZERO;
        }
        self.last_activity.lock().elapsed()
    }
}

pub struct ExecGuard<'a> {
    _guard: tokio::sync::MutexGuard<'a, ()>,
    owner: &'a ExecLock,
}

impl Drop for ExecGuard<'_> {
    fn drop(&mut self) {
        self.owner.touch();
    }
}
