//! Scheduler module.
//!
//! Owns one cancellable task per enabled probe. Each task checks its target
//! immediately, then once per interval, writing every outcome to the
//! [`ResultStore`] and the storage backend. Replacing a probe's config always
//! stops the old task (cancel, then wait for it) before the new one starts.

mod reconcile;
mod results;

pub use reconcile::*;
pub use results::*;

use crate::db::{DbError, ProbeConfig, ProbeOutcome, ProbeType, ProbeUpdate, Storage};
use crate::error::EngineError;
use crate::probe::Executor;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// How often stored configs are re-read when no interval is configured.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

struct ProbeTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProbeTask {
    /// Cancel the task and wait until it has exited.
    async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::error!("Scheduler: Probe task panicked: {}", e);
            }
        }
    }

    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// A config the scheduler knows about. Only enabled configs have a task.
struct LiveProbe {
    config: Arc<ProbeConfig>,
    task: Option<ProbeTask>,
}

/// The main scheduler that owns per-probe tasks.
pub struct Scheduler {
    storage: Arc<dyn Storage>,
    executor: Arc<Executor>,
    results: Arc<ResultStore>,
    probes: RwLock<HashMap<String, LiveProbe>>,
    shutdown: CancellationToken,
    reconcile_interval: Duration,
    reconciler: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        storage: Arc<dyn Storage>,
        executor: Arc<Executor>,
        results: Arc<ResultStore>,
        reconcile_interval: Duration,
    ) -> Self {
        let reconcile_interval = if reconcile_interval.is_zero() {
            DEFAULT_RECONCILE_INTERVAL
        } else {
            reconcile_interval
        };
        Self {
            storage,
            executor,
            results,
            probes: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            reconcile_interval,
            reconciler: Mutex::new(None),
        }
    }

    /// Load stored configs, start their tasks and launch the reconciliation loop.
    pub async fn start(self: &Arc<Self>) -> Result<(), DbError> {
        let started = self.reconcile().await?;
        tracing::info!("Starting scheduler with {} probes", started);

        let mut reconciler = self.reconciler.lock().await;
        if reconciler.is_none() {
            *reconciler = Some(tokio::spawn(run_reconcile_loop(
                self.clone(),
                self.reconcile_interval,
                self.shutdown.clone(),
            )));
        }
        Ok(())
    }

    /// Cancel every task and wait for all of them to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        if let Some(handle) = self.reconciler.lock().await.take() {
            let _ = handle.await;
        }

        let tasks: Vec<ProbeTask> = {
            let mut probes = self.probes.write().await;
            probes.values_mut().filter_map(|p| p.task.take()).collect()
        };
        for task in tasks {
            task.stop().await;
        }

        tracing::info!("Scheduler stopped");
    }

    /// Register a new probe and start checking it.
    pub async fn add_probe(&self, mut config: ProbeConfig) -> Result<ProbeConfig, EngineError> {
        config.validate().map_err(EngineError::InvalidConfig)?;
        config.normalize();
        self.validate_plugin(&config)?;

        let mut probes = self.probes.write().await;

        if config.id.is_empty() {
            config.id = generate_id(&probes);
        } else if probes.contains_key(&config.id) || self.storage.get_config(&config.id).is_ok() {
            return Err(EngineError::AlreadyExists(config.id));
        }

        let now = Utc::now();
        config.enabled = true;
        config.created_at = now;
        config.updated_at = now;

        self.storage.store_config(&config)?;

        tracing::info!("Scheduler: Adding probe {} ({})", config.name, config.id);

        let config = Arc::new(config);
        let task = self.spawn_task(config.clone());
        probes.insert(
            config.id.clone(),
            LiveProbe {
                config: config.clone(),
                task: Some(task),
            },
        );

        Ok(config.as_ref().clone())
    }

    /// Replace the config of a known probe, restarting its task.
    pub async fn update_probe(&self, config: ProbeConfig) -> Result<ProbeConfig, EngineError> {
        let mut probes = self.probes.write().await;
        let live = probes
            .get_mut(&config.id)
            .ok_or_else(|| EngineError::NotFound(config.id.clone()))?;
        self.apply_update(live, config).await
    }

    /// Merge `update` over a probe's current config and restart its task.
    /// Read, merge and write happen under one write lock.
    pub async fn merge_probe(&self, id: &str, update: ProbeUpdate) -> Result<ProbeConfig, EngineError> {
        let mut probes = self.probes.write().await;
        let live = probes
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let mut config = live.config.as_ref().clone();
        config.merge(update);
        self.apply_update(live, config).await
    }

    /// Stop a probe and delete its config, results and history.
    pub async fn remove_probe(&self, id: &str) -> Result<(), EngineError> {
        let mut probes = self.probes.write().await;
        if !probes.contains_key(id) {
            return Err(EngineError::NotFound(id.to_string()));
        }

        match self.storage.delete_config(id) {
            Ok(()) | Err(DbError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(live) = probes.remove(id) {
            if let Some(task) = live.task {
                task.stop().await;
            }
            tracing::info!("Scheduler: Removed probe {} ({})", live.config.name, id);
        }
        self.results.remove(id).await;

        Ok(())
    }

    /// The scheduler's current copy of a probe config.
    pub async fn config(&self, id: &str) -> Option<ProbeConfig> {
        let probes = self.probes.read().await;
        probes.get(id).map(|p| p.config.as_ref().clone())
    }

    pub async fn is_running(&self, id: &str) -> bool {
        let probes = self.probes.read().await;
        probes
            .get(id)
            .and_then(|p| p.task.as_ref())
            .is_some_and(ProbeTask::is_running)
    }

    /// Number of probes with a live task.
    pub async fn running_count(&self) -> usize {
        let probes = self.probes.read().await;
        probes
            .values()
            .filter(|p| p.task.as_ref().is_some_and(ProbeTask::is_running))
            .count()
    }

    pub fn results(&self) -> &Arc<ResultStore> {
        &self.results
    }

    async fn apply_update(&self, live: &mut LiveProbe, mut config: ProbeConfig) -> Result<ProbeConfig, EngineError> {
        config.validate().map_err(EngineError::InvalidConfig)?;
        config.normalize();
        self.validate_plugin(&config)?;

        config.created_at = live.config.created_at;
        config.updated_at = next_update_stamp(live.config.updated_at);

        self.storage.store_config(&config)?;

        tracing::info!("Scheduler: Updating probe {} ({})", config.name, config.id);

        self.replace(live, Arc::new(config.clone())).await;
        Ok(config)
    }

    /// Swap in `config`, stopping the previous task before starting a new one.
    async fn replace(&self, live: &mut LiveProbe, config: Arc<ProbeConfig>) {
        if let Some(task) = live.task.take() {
            task.stop().await;
        }
        live.config = config.clone();
        if config.enabled {
            live.task = Some(self.spawn_task(config));
        }
    }

    fn spawn_task(&self, config: Arc<ProbeConfig>) -> ProbeTask {
        let token = self.shutdown.child_token();
        let handle = tokio::spawn(run_probe_loop(
            config,
            self.executor.clone(),
            self.results.clone(),
            self.storage.clone(),
            token.clone(),
        ));
        ProbeTask { token, handle }
    }

    fn validate_plugin(&self, config: &ProbeConfig) -> Result<(), EngineError> {
        if config.probe_type != ProbeType::Plugin {
            return Ok(());
        }
        let Some(name) = config.plugin_name.as_deref() else {
            return Ok(());
        };
        match self.executor.plugins().get(name) {
            Some(plugin) => plugin
                .validate_config(config)
                .map_err(|e| EngineError::InvalidConfig(e.to_string())),
            None => Ok(()),
        }
    }
}

/// Run the check loop for a single probe until `token` is cancelled.
async fn run_probe_loop(
    config: Arc<ProbeConfig>,
    executor: Arc<Executor>,
    results: Arc<ResultStore>,
    storage: Arc<dyn Storage>,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let checked_at = Utc::now();
        let execution = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            execution = executor.execute(&config) => execution,
        };

        let outcome = ProbeOutcome {
            probe_id: config.id.clone(),
            name: config.name.clone(),
            probe_type: config.probe_type,
            target: config.target.clone(),
            status: execution.status,
            response_time: execution.response_time,
            message: execution.message,
            last_checked: checked_at,
            history: Vec::new(),
        };

        tracing::debug!(
            "Probe {}: {} in {:?} ({})",
            config.name,
            outcome.status,
            outcome.response_time,
            outcome.message
        );

        if let Err(e) = storage.store_result(&outcome) {
            tracing::warn!("Scheduler: Failed to persist result for {}: {}", config.name, e);
        }
        results.store_outcome(outcome).await;
    }

    tracing::debug!("Scheduler: Probe {} stopped", config.name);
}

/// Time-derived ID that is not already taken.
fn generate_id(probes: &HashMap<String, LiveProbe>) -> String {
    let mut stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    loop {
        let id = format!("check_{}", stamp);
        if !probes.contains_key(&id) {
            return id;
        }
        stamp += 1;
    }
}

/// A timestamp strictly after `previous`, normally just now.
fn next_update_stamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + ChronoDuration::microseconds(1)
    }
}
