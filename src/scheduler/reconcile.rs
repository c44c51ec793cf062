//! Periodic re-sync of running tasks against the stored configs.

use super::{LiveProbe, Scheduler};
use crate::db::DbError;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

impl Scheduler {
    /// Start (or restart) tasks for stored configs that are unknown or newer
    /// than the scheduler's copy. Returns how many tasks were started.
    ///
    /// Tasks are never removed here; deletion goes through `remove_probe`.
    pub async fn reconcile(&self) -> Result<usize, DbError> {
        let configs = self.storage.list_configs()?;
        let mut probes = self.probes.write().await;
        let mut started = 0;

        for mut config in configs {
            if let Some(live) = probes.get(&config.id) {
                if config.updated_at <= live.config.updated_at {
                    continue;
                }
            }

            config.normalize();
            let config = Arc::new(config);
            let live = probes
                .entry(config.id.clone())
                .or_insert_with(|| LiveProbe {
                    config: config.clone(),
                    task: None,
                });
            self.replace(live, config.clone()).await;

            if live.task.is_some() {
                tracing::info!("Reconciler: Started probe {} ({})", config.name, config.id);
                started += 1;
            }
        }

        Ok(started)
    }
}

/// Run `reconcile` every `period` until `token` is cancelled.
pub(crate) async fn run_reconcile_loop(
    scheduler: Arc<Scheduler>,
    period: Duration,
    token: CancellationToken,
) {
    // start() has just reconciled, so skip the immediate first tick
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                match scheduler.reconcile().await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("Reconciler: Started {} probe tasks", n),
                    Err(e) => tracing::error!("Reconciler: Failed to read probe configs: {}", e),
                }
            }
        }
    }
}
