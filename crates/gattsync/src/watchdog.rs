//! Keyed periodic tasks.
//!
//! A watchdog ticks immediately when started and then once per interval
//! until it is invalidated. Ticks of one watchdog never overlap: a tick that
//! runs past the interval causes the missed ones to be skipped. Invalidating
//! drops a tick that is still running.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Watchdog: Send + Sync + 'static {
    fn interval(&self) -> Duration;

    async fn tick(&self);

    /// Called once when the watchdog is invalidated or replaced.
    fn invalidated(&self) {}
}

struct Running {
    watchdog: Arc<dyn Watchdog>,
    token: CancellationToken,
}

pub struct WatchdogManager {
    running: DashMap<String, Running>,
    runtime: Handle,
}

impl WatchdogManager {
    pub fn new(runtime: Handle) -> Self {
        Self {
            running: DashMap::new(),
            runtime,
        }
    }

    /// Start `watchdog` under `key`, invalidating any watchdog already
    /// running there. Returns `false` for a zero interval.
    pub fn start(&self, key: impl Into<String>, watchdog: Arc<dyn Watchdog>) -> bool {
        let key = key.into();
        let interval = watchdog.interval();
        if interval.is_zero() {
            tracing::warn!(%key, "Refusing watchdog with zero interval");
            return false;
        }

        let token = CancellationToken::new();
        let previous = self.running.insert(
            key.clone(),
            Running {
                watchdog: Arc::clone(&watchdog),
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            tracing::debug!(%key, "Replacing running watchdog");
            stop(previous);
        }

        tracing::info!(%key, ?interval, "Watchdog started");
        self.runtime.spawn(run(key, watchdog, interval, token));
        true
    }

    /// Returns `false` if nothing was running under `key`.
    pub fn invalidate(&self, key: &str) -> bool {
        match self.running.remove(key) {
            Some((_, running)) => {
                tracing::info!(%key, "Watchdog invalidated");
                stop(running);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.running.contains_key(key)
    }

    /// Invalidate every watchdog. Returns how many were running.
    pub fn invalidate_all(&self) -> usize {
        let keys: Vec<String> = self.running.iter().map(|e| e.key().clone()).collect();
        keys.iter().filter(|key| self.invalidate(key)).count()
    }
}

impl Drop for WatchdogManager {
    fn drop(&mut self) {
        self.invalidate_all();
    }
}

fn stop(running: Running) {
    running.token.cancel();
    running.watchdog.invalidated();
}

async fn run(key: String, watchdog: Arc<dyn Watchdog>, period: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = watchdog.tick() => ticks += 1,
        }
    }

    tracing::debug!(%key, ticks, "Watchdog stopped");
}
