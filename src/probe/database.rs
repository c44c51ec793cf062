//! Database liveness probe.
//!
//! The driver is picked from the target's URI scheme: `postgres://` and
//! `postgresql://` go through sqlx's Postgres driver, `mysql://` through its
//! MySQL driver and `sqlite://<path>` opens the file read-only with rusqlite.

use rusqlite::{Connection as SqliteConnection, OpenFlags};
use sqlx::{Connection, MySqlConnection, PgConnection};
use std::time::Duration;

use super::{Execution, ProbeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseDriver {
    Postgres,
    MySql,
    Sqlite,
}

impl DatabaseDriver {
    /// Pick a driver from the URI scheme of `target`.
    pub fn detect(target: &str) -> Option<Self> {
        if target.starts_with("postgres://") || target.starts_with("postgresql://") {
            Some(DatabaseDriver::Postgres)
        } else if target.starts_with("mysql://") {
            Some(DatabaseDriver::MySql)
        } else if target.starts_with("sqlite://") {
            Some(DatabaseDriver::Sqlite)
        } else {
            None
        }
    }
}

/// Open a connection to `target` and ping it, bounded by `timeout`.
pub async fn run_database_check(target: &str, timeout: Duration) -> Result<Execution, ProbeError> {
    let driver = DatabaseDriver::detect(target)
        .ok_or_else(|| ProbeError::Config("unsupported database type".to_string()))?;

    let ping = async {
        match driver {
            DatabaseDriver::Postgres => {
                let mut conn = PgConnection::connect(target).await.map_err(connect_error)?;
                conn.ping().await.map_err(ping_error)?;
                let _ = conn.close().await;
            }
            DatabaseDriver::MySql => {
                let mut conn = MySqlConnection::connect(target).await.map_err(connect_error)?;
                conn.ping().await.map_err(ping_error)?;
                let _ = conn.close().await;
            }
            DatabaseDriver::Sqlite => {
                let path = target.trim_start_matches("sqlite://").to_string();
                tokio::task::spawn_blocking(move || ping_sqlite(&path))
                    .await
                    .map_err(|e| ProbeError::Database(format!("ping task failed: {}", e)))??;
            }
        }
        Ok::<_, ProbeError>(())
    };

    tokio::time::timeout(timeout, ping)
        .await
        .map_err(|_| ProbeError::Timeout(timeout))??;

    Ok(Execution::up("database connection successful"))
}

fn ping_sqlite(path: &str) -> Result<(), ProbeError> {
    let conn = SqliteConnection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| ProbeError::Database(format!("connection error: {}", e)))?;
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        .map_err(ping_error)?;
    Ok(())
}

fn connect_error(e: impl std::fmt::Display) -> ProbeError {
    ProbeError::Database(format!("connection error: {}", e))
}

fn ping_error(e: impl std::fmt::Display) -> ProbeError {
    ProbeError::Database(format!("ping failed: {}", e))
}
