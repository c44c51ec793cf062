//! SQLite storage backend.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::models::*;
use super::store::{DbError, Storage};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const CONFIG_COLUMNS: &str = "id, name, type, target, interval, timeout, method, headers, body, \
     expected_status_code, expected_body, plugin_name, enabled, created_at, updated_at";

/// Durable store backed by a single SQLite connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    history_limit: usize,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and make sure the schema exists.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            history_limit: HISTORY_LIMIT,
        };
        store.init()?;
        Ok(store)
    }

    /// Override how many history rows are retained per probe.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }
}

impl Storage for SqliteStore {
    fn store_config(&self, config: &ProbeConfig) -> Result<(), DbError> {
        let headers = serde_json::to_string(&config.headers)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO probe_configs (id, name, type, target, interval, timeout, method, headers, body, \
             expected_status_code, expected_body, plugin_name, enabled, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                config.id,
                config.name,
                config.probe_type.as_str(),
                config.target,
                nanos(config.interval),
                nanos(config.timeout),
                config.method,
                headers,
                config.body,
                config.expected_status_code,
                config.expected_body,
                config.plugin_name,
                config.enabled,
                format_db_time(&config.created_at),
                format_db_time(&config.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_config(&self, id: &str) -> Result<ProbeConfig, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {CONFIG_COLUMNS} FROM probe_configs WHERE id = ?1"),
            params![id],
            config_from_row,
        )
        .optional()?
        .ok_or_else(|| DbError::NotFound(format!("probe config {}", id)))
    }

    fn list_configs(&self) -> Result<Vec<ProbeConfig>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONFIG_COLUMNS} FROM probe_configs ORDER BY name, id"
        ))?;
        let configs = stmt
            .query_map([], config_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(configs)
    }

    fn delete_config(&self, id: &str) -> Result<(), DbError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM probe_history WHERE probe_id = ?1", params![id])?;
        tx.execute("DELETE FROM probe_results WHERE id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM probe_configs WHERE id = ?1", params![id])?;
        if deleted == 0 {
            // dropping the transaction rolls back
            return Err(DbError::NotFound(format!("probe config {}", id)));
        }
        tx.commit()?;
        Ok(())
    }

    fn store_result(&self, outcome: &ProbeOutcome) -> Result<(), DbError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM probe_configs WHERE id = ?1)",
            params![outcome.probe_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(DbError::NotFound(format!("probe config {}", outcome.probe_id)));
        }

        let checked = format_db_time(&outcome.last_checked);
        let response_time = nanos(outcome.response_time);

        tx.execute(
            "INSERT OR REPLACE INTO probe_results (id, status, response_time, message, last_checked) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                outcome.probe_id,
                outcome.status.as_str(),
                response_time,
                outcome.message,
                checked,
            ],
        )?;

        tx.execute(
            "INSERT INTO probe_history (probe_id, timestamp, status, response_time, message) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                outcome.probe_id,
                checked,
                outcome.status.as_str(),
                response_time,
                outcome.message,
            ],
        )?;

        tx.execute(
            "DELETE FROM probe_history WHERE probe_id = ?1 AND id NOT IN ( \
                SELECT id FROM probe_history WHERE probe_id = ?1 \
                ORDER BY timestamp DESC, id DESC LIMIT ?2)",
            params![outcome.probe_id, self.history_limit as i64],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn get_result(&self, id: &str) -> Result<ProbeOutcome, DbError> {
        let conn = self.conn()?;
        let mut outcome = conn
            .query_row(
                "SELECT r.id, c.name, c.type, c.target, r.status, r.response_time, r.message, r.last_checked \
                 FROM probe_results r JOIN probe_configs c ON c.id = r.id WHERE r.id = ?1",
                params![id],
                outcome_from_row,
            )
            .optional()?
            .ok_or_else(|| DbError::NotFound(format!("probe result {}", id)))?;
        outcome.history = load_history(&conn, id, None, self.history_limit)?;
        Ok(outcome)
    }

    fn list_results(&self) -> Result<Vec<ProbeOutcome>, DbError> {
        let conn = self.conn()?;
        let mut outcomes = {
            let mut stmt = conn.prepare(
                "SELECT r.id, c.name, c.type, c.target, r.status, r.response_time, r.message, r.last_checked \
                 FROM probe_results r JOIN probe_configs c ON c.id = r.id \
                 ORDER BY r.last_checked DESC",
            )?;
            let rows = stmt
                .query_map([], outcome_from_row)?
                .collect::<SqlResult<Vec<_>>>()?;
            rows
        };
        for outcome in &mut outcomes {
            outcome.history = load_history(&conn, &outcome.probe_id, None, self.history_limit)?;
        }
        Ok(outcomes)
    }

    fn get_history(&self, id: &str, window: Duration) -> Result<Vec<HistoryEntry>, DbError> {
        let cutoff = if window.is_zero() {
            None
        } else {
            let window = ChronoDuration::from_std(window).unwrap_or(ChronoDuration::MAX);
            Some(Utc::now().checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC))
        };
        let conn = self.conn()?;
        load_history(&conn, id, cutoff, self.history_limit)
    }
}

fn load_history(
    conn: &Connection,
    id: &str,
    cutoff: Option<DateTime<Utc>>,
    limit: usize,
) -> Result<Vec<HistoryEntry>, DbError> {
    // An empty cutoff string sorts before every stored timestamp.
    let cutoff = cutoff.map(|c| format_db_time(&c)).unwrap_or_default();
    let mut stmt = conn.prepare(
        "SELECT timestamp, status, response_time, message FROM probe_history \
         WHERE probe_id = ?1 AND timestamp > ?2 \
         ORDER BY timestamp DESC, id DESC LIMIT ?3",
    )?;
    let entries = stmt
        .query_map(params![id, cutoff, limit as i64], |row| {
            Ok(HistoryEntry {
                timestamp: time_column(row, 0)?,
                status: status_column(row, 1)?,
                response_time: duration_from_nanos(row.get(2)?),
                message: row.get(3)?,
            })
        })?
        .collect::<SqlResult<Vec<_>>>()?;
    Ok(entries)
}

fn config_from_row(row: &Row<'_>) -> SqlResult<ProbeConfig> {
    let probe_type: String = row.get(2)?;
    let headers: String = row.get(7)?;
    let headers = serde_json::from_str(&headers)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;
    let expected_status_code: Option<i64> = row.get(9)?;

    Ok(ProbeConfig {
        id: row.get(0)?,
        name: row.get(1)?,
        probe_type: probe_type.parse().unwrap_or(ProbeType::Unknown),
        target: row.get(3)?,
        interval: duration_from_nanos(row.get(4)?),
        timeout: duration_from_nanos(row.get(5)?),
        method: row.get(6)?,
        headers,
        body: row.get(8)?,
        expected_status_code: expected_status_code.and_then(|c| u16::try_from(c).ok()),
        expected_body: row.get(10)?,
        plugin_name: row.get(11)?,
        enabled: row.get(12)?,
        created_at: time_column(row, 13)?,
        updated_at: time_column(row, 14)?,
    })
}

fn outcome_from_row(row: &Row<'_>) -> SqlResult<ProbeOutcome> {
    let probe_type: String = row.get(2)?;
    Ok(ProbeOutcome {
        probe_id: row.get(0)?,
        name: row.get(1)?,
        probe_type: probe_type.parse().unwrap_or(ProbeType::Unknown),
        target: row.get(3)?,
        status: status_column(row, 4)?,
        response_time: duration_from_nanos(row.get(5)?),
        message: row.get(6)?,
        last_checked: time_column(row, 7)?,
        history: Vec::new(),
    })
}

fn status_column(row: &Row<'_>, idx: usize) -> SqlResult<ProbeStatus> {
    let status: String = row.get(idx)?;
    Ok(status.parse().unwrap_or(ProbeStatus::Unknown))
}

fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_db_time(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp: {}", raw).into(),
        )
    })
}

fn nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

fn duration_from_nanos(n: i64) -> Duration {
    Duration::from_nanos(n.max(0) as u64)
}

fn format_db_time(t: &DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.9fZ",
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{exercise_storage, sample_config, sample_outcome};
    use tempfile::NamedTempFile;

    #[test]
    fn test_shared_storage_contract() {
        let tmp = NamedTempFile::new().unwrap();
        let store = SqliteStore::new(tmp.path()).unwrap();
        exercise_storage(&store);
    }

    #[test]
    fn test_schema_init_is_idempotent_and_survives_reopen() {
        let tmp = NamedTempFile::new().unwrap();
        let mut cfg = sample_config("persist");
        cfg.method = "POST".to_string();
        cfg.headers.insert("X-Token".to_string(), "abc".to_string());
        cfg.expected_status_code = Some(204);
        cfg.plugin_name = Some("dns".to_string());

        {
            let store = SqliteStore::new(tmp.path()).unwrap();
            store.store_config(&cfg).unwrap();
            store.store_result(&sample_outcome("persist", Utc::now())).unwrap();
        }

        let reopened = SqliteStore::new(tmp.path()).unwrap();
        let loaded = reopened.get_config("persist").unwrap();
        assert_eq!(loaded, cfg);
        assert_eq!(reopened.get_history("persist", Duration::ZERO).unwrap().len(), 1);
    }

    #[test]
    fn test_custom_history_limit() {
        let tmp = NamedTempFile::new().unwrap();
        let store = SqliteStore::new(tmp.path()).unwrap().with_history_limit(5);
        store.store_config(&sample_config("small")).unwrap();
        let start = Utc::now();
        for i in 0..12 {
            store
                .store_result(&sample_outcome("small", start + ChronoDuration::seconds(i)))
                .unwrap();
        }
        let history = store.get_history("small", Duration::ZERO).unwrap();
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].timestamp, start + ChronoDuration::seconds(11));
    }

    #[test]
    fn test_parse_db_time_formats() {
        assert!(parse_db_time("2024-01-02 03:04:05.123456789").is_some());
        assert!(parse_db_time("2024-01-02 03:04:05").is_some());
        assert!(parse_db_time("2024-01-02T03:04:05Z").is_some());
        assert!(parse_db_time("yesterday").is_none());
    }
}
