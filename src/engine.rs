//! The engine facade: the only surface an API layer needs.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::{EngineConfig, StorageBackend};
use crate::db::{
    DbError, HistoryEntry, MemoryStore, ProbeConfig, ProbeOutcome, ProbeType, ProbeUpdate,
    SqliteStore, Storage,
};
use crate::error::EngineError;
use crate::probe::{Executor, PluginRegistry, ProbePlugin};
use crate::scheduler::{ResultStore, Scheduler};

/// Name, type and description of a registered plugin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub probe_type: ProbeType,
    pub description: String,
}

pub struct Engine {
    storage: Arc<dyn Storage>,
    plugins: Arc<PluginRegistry>,
    results: Arc<ResultStore>,
    scheduler: Arc<Scheduler>,
}

impl Engine {
    /// Open the storage backend named by `cfg` and build an engine on it.
    pub fn open(cfg: &EngineConfig) -> Result<Self, EngineError> {
        let storage: Arc<dyn Storage> = match cfg.storage {
            StorageBackend::Sqlite => {
                Arc::new(SqliteStore::new(&cfg.db_path)?.with_history_limit(cfg.history_limit))
            }
            StorageBackend::Memory => {
                Arc::new(MemoryStore::new().with_history_limit(cfg.history_limit))
            }
        };
        Self::new(storage, cfg)
    }

    /// Build an engine on an existing storage backend. Built-in plugins are
    /// registered; more can be added with [`Engine::register_plugin`].
    pub fn new(storage: Arc<dyn Storage>, cfg: &EngineConfig) -> Result<Self, EngineError> {
        let plugins = Arc::new(PluginRegistry::with_builtin());
        let executor = Arc::new(Executor::new(plugins.clone(), cfg.connect_timeout)?);
        let results = Arc::new(ResultStore::new(cfg.history_limit));
        let scheduler = Arc::new(Scheduler::new(
            storage.clone(),
            executor,
            results.clone(),
            cfg.reconcile_interval,
        ));
        Ok(Self {
            storage,
            plugins,
            results,
            scheduler,
        })
    }

    /// Start every stored, enabled probe and the reconciliation loop.
    pub async fn start(&self) -> Result<(), EngineError> {
        self.scheduler.start().await?;
        Ok(())
    }

    /// Stop all probe tasks and wait for them.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }

    pub fn register_plugin(&self, plugin: Arc<dyn ProbePlugin>) {
        self.plugins.register(plugin);
    }

    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        self.plugins
            .list()
            .into_iter()
            .map(|p| PluginInfo {
                name: p.name().to_string(),
                probe_type: p.probe_type(),
                description: p.description().to_string(),
            })
            .collect()
    }

    /// Create a probe. ID, timestamps, `enabled` and zero durations are filled in.
    pub async fn add_probe(&self, config: ProbeConfig) -> Result<ProbeConfig, EngineError> {
        self.scheduler.add_probe(config).await
    }

    /// Merge `update` over the probe's current config and restart it.
    pub async fn update_probe(&self, id: &str, update: ProbeUpdate) -> Result<ProbeConfig, EngineError> {
        self.scheduler.merge_probe(id, update).await
    }

    pub async fn remove_probe(&self, id: &str) -> Result<(), EngineError> {
        self.scheduler.remove_probe(id).await
    }

    pub async fn list_probes(&self) -> Result<Vec<ProbeConfig>, EngineError> {
        Ok(self.storage.list_configs()?)
    }

    pub async fn get_probe(&self, id: &str) -> Result<ProbeConfig, EngineError> {
        self.storage.get_config(id).map_err(|e| not_found(e, id))
    }

    /// Latest outcome of every probe, without history, ordered by name.
    /// Probes not yet checked by this process are read from storage.
    pub async fn list_outcomes(&self) -> Result<Vec<ProbeOutcome>, EngineError> {
        let mut outcomes: Vec<ProbeOutcome> = self
            .results
            .get_all_outcomes()
            .await
            .iter()
            .map(ProbeOutcome::summary)
            .collect();
        let live: HashSet<String> = outcomes.iter().map(|o| o.probe_id.clone()).collect();

        outcomes.extend(
            self.storage
                .list_results()?
                .iter()
                .filter(|o| !live.contains(&o.probe_id))
                .map(ProbeOutcome::summary),
        );
        outcomes.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.probe_id.cmp(&b.probe_id)));
        Ok(outcomes)
    }

    /// Latest outcome with its recent history. Falls back to storage for
    /// probes that have not been checked since the process started.
    pub async fn get_outcome(&self, id: &str) -> Result<ProbeOutcome, EngineError> {
        if let Some(outcome) = self.results.get_outcome(id).await {
            return Ok(outcome);
        }
        self.storage.get_result(id).map_err(|e| not_found(e, id))
    }

    /// Durable history of a probe; a zero window returns everything retained.
    pub async fn get_history(&self, id: &str, window: Duration) -> Result<Vec<HistoryEntry>, EngineError> {
        self.storage.get_config(id).map_err(|e| not_found(e, id))?;
        Ok(self.storage.get_history(id, window)?)
    }
}

fn not_found(err: DbError, id: &str) -> EngineError {
    match err {
        DbError::NotFound(_) => EngineError::NotFound(id.to_string()),
        other => EngineError::Storage(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ProbeStatus;
    use crate::scheduler::tests::{recorded, wait_until, Recorder, RecordingPlugin};
    use tempfile::NamedTempFile;

    fn memory_engine(recorder: &Arc<Recorder>) -> Engine {
        let cfg = EngineConfig {
            storage: StorageBackend::Memory,
            ..Default::default()
        };
        let engine = Engine::open(&cfg).unwrap();
        engine.register_plugin(Arc::new(RecordingPlugin(recorder.clone())));
        engine
    }

    async fn wait_for_outcome(engine: &Engine, id: &str) -> ProbeOutcome {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok(outcome) = engine.get_outcome(id).await {
                return outcome;
            }
            assert!(tokio::time::Instant::now() < deadline, "no outcome for {}", id);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_lists_builtin_and_registered_plugins() {
        let recorder = Arc::new(Recorder::default());
        let engine = memory_engine(&recorder);
        let names: Vec<_> = engine.list_plugins().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["dns", "recorder"]);
    }

    #[tokio::test]
    async fn test_update_merges_partial_body() {
        let recorder = Arc::new(Recorder::default());
        let engine = memory_engine(&recorder);
        let stored = engine
            .add_probe(recorded("one", Duration::from_secs(3600)))
            .await
            .unwrap();
        wait_until(|| recorder.calls().len() == 1).await;

        let updated = engine
            .update_probe(
                &stored.id,
                ProbeUpdate {
                    target: Some("two".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, stored.name);
        assert_eq!(updated.plugin_name, stored.plugin_name);
        assert_eq!(updated.target, "two");
        assert_eq!(engine.get_probe(&stored.id).await.unwrap().target, "two");
        wait_until(|| recorder.calls() == vec!["one".to_string(), "two".to_string()]).await;

        assert!(matches!(
            engine.update_probe("ghost", ProbeUpdate::default()).await,
            Err(EngineError::NotFound(_))
        ));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_outcomes_history_and_removal() {
        let recorder = Arc::new(Recorder::default());
        let engine = memory_engine(&recorder);
        let stored = engine
            .add_probe(recorded("one", Duration::from_millis(20)))
            .await
            .unwrap();

        let outcome = wait_for_outcome(&engine, &stored.id).await;
        assert_eq!(outcome.status, ProbeStatus::Up);
        assert_eq!(outcome.message, "checked one");

        // each check is persisted before the next one starts
        wait_until(|| recorder.calls().len() >= 4).await;
        let summaries = engine.list_outcomes().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].history.is_empty());

        let history = engine.get_history(&stored.id, Duration::ZERO).await.unwrap();
        assert!(history.len() >= 3);
        assert!(history.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

        engine.remove_probe(&stored.id).await.unwrap();
        assert!(matches!(
            engine.get_outcome(&stored.id).await,
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            engine.get_history(&stored.id, Duration::ZERO).await,
            Err(EngineError::NotFound(_))
        ));
        assert!(engine.list_probes().await.unwrap().is_empty());
        assert!(matches!(
            engine.remove_probe(&stored.id).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sqlite_engine_restores_probes_after_restart() {
        let tmp = NamedTempFile::new().unwrap();
        let cfg = EngineConfig {
            storage: StorageBackend::Sqlite,
            db_path: tmp.path().display().to_string(),
            ..Default::default()
        };
        let recorder = Arc::new(Recorder::default());

        let id = {
            let engine = Engine::open(&cfg).unwrap();
            engine.register_plugin(Arc::new(RecordingPlugin(recorder.clone())));
            engine.start().await.unwrap();
            let stored = engine
                .add_probe(recorded("persisted", Duration::from_secs(3600)))
                .await
                .unwrap();
            wait_for_outcome(&engine, &stored.id).await;
            engine.shutdown().await;
            stored.id
        };
        assert_eq!(recorder.calls().len(), 1);

        let engine = Engine::open(&cfg).unwrap();
        engine.register_plugin(Arc::new(RecordingPlugin(recorder.clone())));
        // the durable result is visible before the probe runs again
        assert_eq!(engine.get_outcome(&id).await.unwrap().target, "persisted");
        let listed = engine.list_outcomes().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].probe_id, id);
        assert!(listed[0].history.is_empty());

        engine.start().await.unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while engine.get_history(&id, Duration::ZERO).await.unwrap().len() < 2 {
            assert!(tokio::time::Instant::now() < deadline, "second check not persisted");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(recorder.calls().len(), 2);
        // live and stored outcomes of the same probe are listed once
        assert_eq!(engine.list_outcomes().await.unwrap().len(), 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_history_is_capped_through_the_engine() {
        let recorder = Arc::new(Recorder::default());
        let engine = memory_engine(&recorder);
        let stored = engine
            .add_probe(recorded("busy", Duration::from_millis(1)))
            .await
            .unwrap();

        wait_until(|| recorder.calls().len() > 110).await;
        engine.shutdown().await;

        let history = engine.get_history(&stored.id, Duration::ZERO).await.unwrap();
        assert_eq!(history.len(), 100);
        assert!(history.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        let live = engine.get_outcome(&stored.id).await.unwrap();
        assert_eq!(live.history.len(), 100);
    }
}
