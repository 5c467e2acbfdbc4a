//! Periodic maintenance for in-memory security state.
//!
//! # Responsibilities
//! - Drop expired rate-limit windows
//! - Drop stale failed-login records and expired locks
//! - Enforce the audit retention age
//!
//! Each sweep runs in its own task and exits on the shutdown signal or
//! when the [`MaintenanceHandle`] is stopped.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::config::GuardConfig;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::security::SecurityCore;

/// Cancellation handle for the sweep tasks.
pub struct MaintenanceHandle {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl MaintenanceHandle {
    /// Start every sweep the configuration enables.
    pub fn spawn(core: Arc<SecurityCore>, config: &GuardConfig, shutdown: &Shutdown) -> Self {
        let mut tasks = Vec::new();

        if config.rate_limit.enabled {
            let core = core.clone();
            tasks.push(spawn_sweep(
                "rate_limit",
                Duration::from_secs(config.rate_limit.sweep_interval_secs),
                shutdown.subscribe(),
                move || core.rate_limiter().sweep(),
            ));
        }

        if config.lockout.enabled {
            let core = core.clone();
            tasks.push(spawn_sweep(
                "lockout",
                Duration::from_secs(config.lockout.sweep_interval_secs),
                shutdown.subscribe(),
                move || core.lockout().sweep(),
            ));
        }

        let retention_days = config.audit.retention_days;
        tasks.push(spawn_sweep(
            "audit_retention",
            Duration::from_secs(config.audit.sweep_interval_secs),
            shutdown.subscribe(),
            move || core.audit().sweep(retention_days),
        ));

        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Abort every sweep without waiting for a shutdown signal.
    pub fn stop(self) {
        for (name, task) in self.tasks {
            task.abort();
            tracing::debug!(task = name, "Maintenance task aborted");
        }
    }

    /// Wait for the tasks to exit after shutdown.
    pub async fn join(self) {
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::error!(task = name, error = %e, "Maintenance task panicked");
                }
            }
        }
    }
}

/// Run `sweep` every `period` until shutdown. The first sweep happens one
/// period after start.
pub fn spawn_sweep<F>(
    name: &'static str,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
    sweep: F,
) -> (&'static str, JoinHandle<()>)
where
    F: Fn() -> usize + Send + 'static,
{
    let period = period.max(Duration::from_millis(1));
    let handle = tokio::spawn(async move {
        tracing::info!(task = name, interval = ?period, "Maintenance task starting");
        let mut ticker = time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = sweep();
                    metrics::record_sweep(name, removed);
                    if removed > 0 {
                        tracing::debug!(task = name, removed, "Sweep completed");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!(task = name, "Maintenance task received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    });
    (name, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_sweep_runs_until_shutdown() {
        let (tx, _) = broadcast::channel(1);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let (_, handle) = spawn_sweep("test", Duration::from_millis(10), tx.subscribe(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            0
        });

        time::sleep(Duration::from_millis(60)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        let seen = runs.load(Ordering::SeqCst);
        assert!(seen >= 1);
        time::sleep(Duration::from_millis(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_spawn_respects_disabled_guards() {
        use crate::clock::SystemClock;
        use crate::security::InMemoryIdentifierRegistry;

        let mut config = GuardConfig::default();
        config.rate_limit.enabled = false;
        let core = Arc::new(
            SecurityCore::from_config(
                &config,
                Arc::new(InMemoryIdentifierRegistry::new()),
                Arc::new(SystemClock),
            )
            .unwrap(),
        );
        let shutdown = Shutdown::new();

        let handle = MaintenanceHandle::spawn(core, &config, &shutdown);
        assert_eq!(handle.len(), 2);

        shutdown.trigger();
        handle.join().await;
    }
}
