//! Background eviction of stale admissions and idle clients.
//!
//! The limiter never forgets a client on its own. The janitor is an optional
//! tokio task that periodically prunes out-of-window timestamps and drops
//! clients that have been idle for longer than a TTL.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::limiter::Limiter;
use crate::config::JanitorSettings;
use crate::error::{Result, TurnstileError};

/// Schedule for a janitor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JanitorConfig {
    /// Time between passes
    pub interval: Duration,
    /// Time since last admission before a client is forgotten
    pub idle_ttl: TimeDelta,
}

impl JanitorConfig {
    /// Create a schedule, raising `idle_ttl` to at least `window`.
    pub fn new(interval: Duration, idle_ttl: TimeDelta, window: TimeDelta) -> Self {
        Self {
            interval,
            idle_ttl: idle_ttl.max(window),
        }
    }

    /// Build a schedule from configuration for a limiter with the given window.
    pub fn from_settings(settings: &JanitorSettings, window: TimeDelta) -> Result<Self> {
        if settings.interval_secs == 0 {
            return Err(TurnstileError::Config(
                "janitor interval must be positive".to_string(),
            ));
        }

        let idle_ttl = TimeDelta::from_std(Duration::from_secs(settings.idle_ttl_secs))
            .map_err(|e| TurnstileError::Config(format!("janitor idle TTL out of range: {}", e)))?;

        Ok(Self::new(
            Duration::from_secs(settings.interval_secs),
            idle_ttl,
            window,
        ))
    }
}

/// Periodic eviction task for a shared limiter.
pub struct Janitor;

impl Janitor {
    /// Spawn the eviction loop on the current tokio runtime.
    ///
    /// The first pass runs one `interval` after spawning.
    pub fn spawn<C>(limiter: Arc<Limiter<C>>, config: JanitorConfig) -> JanitorHandle
    where
        C: Clock + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        info!(
            interval_ms = config.interval.as_millis() as u64,
            idle_ttl_secs = config.idle_ttl.num_seconds(),
            "Starting janitor"
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            let mut passes = 0u64;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = limiter.prune_stale();
                        let evicted = limiter.evict_idle(config.idle_ttl);
                        passes += 1;

                        debug!(
                            pass = passes,
                            timestamps_removed = stats.timestamps_removed,
                            clients_removed = stats.clients_removed + evicted,
                            clients_tracked = limiter.client_count(),
                            "Janitor pass complete"
                        );
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!(passes = passes, "Janitor stopped");
        });

        JanitorHandle {
            shutdown: shutdown_tx,
            task: Some(task),
        }
    }
}

/// Handle to a running janitor task.
///
/// Dropping the handle without calling [`JanitorHandle::shutdown`] aborts the task.
pub struct JanitorHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl JanitorHandle {
    /// Stop the task and wait for it to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Janitor task ended abnormally");
            }
        }
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }
}

impl Drop for JanitorHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
