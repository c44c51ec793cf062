//! Data model types shared by the storage backends, the executor and the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Interval applied when a config arrives with a zero interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
/// Timeout applied when a config arrives with a zero timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Number of history entries retained per probe.
pub const HISTORY_LIMIT: usize = 100;

/// Kind of check a probe performs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeType {
    #[default]
    Http,
    Tcp,
    Database,
    Api,
    Plugin,
    /// A type string this build does not understand, e.g. from a direct storage write.
    #[serde(other)]
    Unknown,
}

impl ProbeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeType::Http => "http",
            ProbeType::Tcp => "tcp",
            ProbeType::Database => "database",
            ProbeType::Api => "api",
            ProbeType::Plugin => "plugin",
            ProbeType::Unknown => "unknown",
        }
    }
}

impl FromStr for ProbeType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "http" => ProbeType::Http,
            "tcp" => ProbeType::Tcp,
            "database" => ProbeType::Database,
            "api" => ProbeType::Api,
            "plugin" => ProbeType::Plugin,
            _ => ProbeType::Unknown,
        })
    }
}

impl fmt::Display for ProbeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of a target as seen by its latest check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Up,
    Down,
    Warning,
    #[default]
    Unknown,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Up => "up",
            ProbeStatus::Down => "down",
            ProbeStatus::Warning => "warning",
            ProbeStatus::Unknown => "unknown",
        }
    }
}

impl FromStr for ProbeStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "up" => ProbeStatus::Up,
            "down" => ProbeStatus::Down,
            "warning" => ProbeStatus::Warning,
            _ => ProbeStatus::Unknown,
        })
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A monitored target and how to check it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub probe_type: ProbeType,
    pub target: String,
    #[serde(default, with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_name: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            probe_type: ProbeType::Http,
            target: String::new(),
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            method: String::new(),
            headers: HashMap::new(),
            body: String::new(),
            expected_status_code: None,
            expected_body: None,
            plugin_name: None,
            enabled: true,
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
        }
    }
}

impl ProbeConfig {
    /// Replace zero interval/timeout with the defaults.
    pub fn normalize(&mut self) {
        if self.interval.is_zero() {
            self.interval = DEFAULT_INTERVAL;
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
    }

    /// Check the fields that have no sensible default.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("probe name cannot be empty".to_string());
        }
        if self.target.trim().is_empty() {
            return Err("probe target cannot be empty".to_string());
        }
        Ok(())
    }

    /// Apply a partial update on top of this config.
    pub fn merge(&mut self, update: ProbeUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(probe_type) = update.probe_type {
            self.probe_type = probe_type;
        }
        if let Some(target) = update.target {
            self.target = target;
        }
        if let Some(interval) = update.interval {
            self.interval = interval;
        }
        if let Some(timeout) = update.timeout {
            self.timeout = timeout;
        }
        if let Some(method) = update.method {
            self.method = method;
        }
        if let Some(headers) = update.headers {
            self.headers = headers;
        }
        if let Some(body) = update.body {
            self.body = body;
        }
        if let Some(code) = update.expected_status_code {
            self.expected_status_code = code;
        }
        if let Some(expected) = update.expected_body {
            self.expected_body = expected;
        }
        if let Some(plugin_name) = update.plugin_name {
            self.plugin_name = plugin_name;
        }
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
    }
}

/// Partial update applied to an existing probe. `None` leaves a field untouched;
/// the nested options of the optional fields allow clearing them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeUpdate {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub probe_type: Option<ProbeType>,
    pub target: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    pub method: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub body: Option<String>,
    pub expected_status_code: Option<Option<u16>>,
    pub expected_body: Option<Option<String>>,
    pub plugin_name: Option<Option<String>>,
    pub enabled: Option<bool>,
}

/// One retained past outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub status: ProbeStatus,
    #[serde(with = "humantime_serde")]
    pub response_time: Duration,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Latest result of a probe, optionally carrying its recent history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub probe_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub probe_type: ProbeType,
    pub target: String,
    pub status: ProbeStatus,
    #[serde(with = "humantime_serde")]
    pub response_time: Duration,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub last_checked: DateTime<Utc>,
    /// Most recent first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
}

impl ProbeOutcome {
    pub fn history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            timestamp: self.last_checked,
            status: self.status,
            response_time: self.response_time,
            message: self.message.clone(),
        }
    }

    /// Same outcome without the history payload.
    pub fn summary(&self) -> ProbeOutcome {
        ProbeOutcome {
            history: Vec::new(),
            ..self.clone()
        }
    }
}
