//! Configuration module for the health-check engine.
//!
//! Loads configuration from environment variables with sensible defaults.

use humantime_serde::re::humantime;
use std::env;
use std::time::Duration;

use crate::db::HISTORY_LIMIT;
use crate::scheduler::DEFAULT_RECONCILE_INTERVAL;

/// Which storage backend holds configs and results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Storage backend (default: sqlite)
    pub storage: StorageBackend,
    /// Path to the SQLite database file (default: "healthwatch.db")
    pub db_path: String,
    /// How often stored configs are re-read (default: 30s)
    pub reconcile_interval: Duration,
    /// History entries kept per probe (default: 100)
    pub history_limit: usize,
    /// Connect timeout of the shared HTTP client (default: 5s)
    pub connect_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::Sqlite,
            db_path: "healthwatch.db".to_string(),
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            history_limit: HISTORY_LIMIT,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `HEALTHWATCH_STORAGE`: `sqlite` or `memory` (default: sqlite)
    /// - `HEALTHWATCH_DB_PATH`: Database file path (default: "healthwatch.db")
    /// - `HEALTHWATCH_RECONCILE_INTERVAL`: e.g. `30s`, `2m` (default: 30s)
    /// - `HEALTHWATCH_HISTORY_LIMIT`: entries per probe (default: 100)
    /// - `HEALTHWATCH_CONNECT_TIMEOUT`: e.g. `5s` (default: 5s)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let mut cfg = Self::default();

        if let Some(storage) = lookup("HEALTHWATCH_STORAGE") {
            match storage.trim().to_ascii_lowercase().as_str() {
                "sqlite" => cfg.storage = StorageBackend::Sqlite,
                "memory" => cfg.storage = StorageBackend::Memory,
                other => tracing::warn!("Ignoring unknown storage backend {:?}", other),
            }
        }

        if let Some(db_path) = lookup("HEALTHWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(interval) = lookup("HEALTHWATCH_RECONCILE_INTERVAL") {
            if let Some(d) = parse_duration(&interval) {
                cfg.reconcile_interval = d;
            }
        }

        if let Some(limit) = lookup("HEALTHWATCH_HISTORY_LIMIT") {
            if let Ok(limit) = limit.trim().parse::<usize>() {
                if limit > 0 {
                    cfg.history_limit = limit;
                }
            }
        }

        if let Some(timeout) = lookup("HEALTHWATCH_CONNECT_TIMEOUT") {
            if let Some(d) = parse_duration(&timeout) {
                cfg.connect_timeout = d;
            }
        }

        cfg
    }
}

fn parse_duration(raw: &str) -> Option<Duration> {
    humantime::parse_duration(raw.trim())
        .ok()
        .filter(|d| !d.is_zero())
}
