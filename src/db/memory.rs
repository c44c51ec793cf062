//! In-process storage backend. Nothing survives a restart.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use super::history::HistoryRing;
use super::models::*;
use super::store::{DbError, Storage};

#[derive(Default)]
struct Tables {
    configs: HashMap<String, ProbeConfig>,
    results: HashMap<String, ProbeOutcome>,
    history: HashMap<String, HistoryRing>,
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
    history_limit: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            history_limit: HISTORY_LIMIT,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, DbError> {
        self.tables.read().map_err(|_| DbError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, DbError> {
        self.tables.write().map_err(|_| DbError::LockPoisoned)
    }
}

impl Tables {
    fn outcome_with_history(&self, id: &str) -> Option<ProbeOutcome> {
        let mut outcome = self.results.get(id)?.clone();
        outcome.history = self
            .history
            .get(id)
            .map(HistoryRing::to_vec)
            .unwrap_or_default();
        Some(outcome)
    }
}

impl Storage for MemoryStore {
    fn store_config(&self, config: &ProbeConfig) -> Result<(), DbError> {
        self.write()?
            .configs
            .insert(config.id.clone(), config.clone());
        Ok(())
    }

    fn get_config(&self, id: &str) -> Result<ProbeConfig, DbError> {
        self.read()?
            .configs
            .get(id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("probe config {}", id)))
    }

    fn list_configs(&self) -> Result<Vec<ProbeConfig>, DbError> {
        let mut configs: Vec<_> = self.read()?.configs.values().cloned().collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(configs)
    }

    fn delete_config(&self, id: &str) -> Result<(), DbError> {
        let mut tables = self.write()?;
        if tables.configs.remove(id).is_none() {
            return Err(DbError::NotFound(format!("probe config {}", id)));
        }
        tables.results.remove(id);
        tables.history.remove(id);
        Ok(())
    }

    fn store_result(&self, outcome: &ProbeOutcome) -> Result<(), DbError> {
        let mut tables = self.write()?;
        if !tables.configs.contains_key(&outcome.probe_id) {
            return Err(DbError::NotFound(format!("probe config {}", outcome.probe_id)));
        }
        let limit = self.history_limit;
        tables
            .history
            .entry(outcome.probe_id.clone())
            .or_insert_with(|| HistoryRing::new(limit))
            .push(outcome.history_entry());
        tables
            .results
            .insert(outcome.probe_id.clone(), outcome.summary());
        Ok(())
    }

    fn get_result(&self, id: &str) -> Result<ProbeOutcome, DbError> {
        self.read()?
            .outcome_with_history(id)
            .ok_or_else(|| DbError::NotFound(format!("probe result {}", id)))
    }

    fn list_results(&self) -> Result<Vec<ProbeOutcome>, DbError> {
        let tables = self.read()?;
        let mut outcomes: Vec<_> = tables
            .results
            .keys()
            .filter_map(|id| tables.outcome_with_history(id))
            .collect();
        outcomes.sort_by(|a, b| b.last_checked.cmp(&a.last_checked));
        Ok(outcomes)
    }

    fn get_history(&self, id: &str, window: Duration) -> Result<Vec<HistoryEntry>, DbError> {
        let tables = self.read()?;
        let Some(ring) = tables.history.get(id) else {
            return Ok(Vec::new());
        };
        if window.is_zero() {
            return Ok(ring.to_vec());
        }
        let window = ChronoDuration::from_std(window).unwrap_or(ChronoDuration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Ok(ring.since(cutoff))
    }
}
