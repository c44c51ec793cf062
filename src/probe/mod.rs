//! Probe execution.
//!
//! HTTP/API, TCP and database checks are built in; anything else goes through
//! the [`PluginRegistry`].

mod database;
mod dns;
mod http;
mod plugin;
mod tcp;

pub use database::*;
pub use dns::*;
pub use http::*;
pub use plugin::*;
pub use tcp::*;

use crate::db::{ProbeConfig, ProbeStatus, ProbeType};

use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("database error: {0}")]
    Database(String),
}

/// What a single check produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub status: ProbeStatus,
    pub message: String,
    pub response_time: Duration,
}

impl Execution {
    pub fn new(status: ProbeStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            response_time: Duration::ZERO,
        }
    }

    pub fn up(message: impl Into<String>) -> Self {
        Self::new(ProbeStatus::Up, message)
    }

    pub fn down(message: impl Into<String>) -> Self {
        Self::new(ProbeStatus::Down, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ProbeStatus::Unknown, message)
    }

    pub fn with_response_time(mut self, elapsed: Duration) -> Self {
        self.response_time = elapsed;
        self
    }
}

impl From<ProbeError> for Execution {
    fn from(err: ProbeError) -> Self {
        Execution::down(err.to_string())
    }
}

/// Runs checks for probe configs. Never fails: every problem becomes a status.
pub struct Executor {
    http: HttpChecker,
    plugins: Arc<PluginRegistry>,
}

impl Executor {
    pub fn new(plugins: Arc<PluginRegistry>, connect_timeout: Duration) -> Result<Self, ProbeError> {
        Ok(Self {
            http: HttpChecker::new(connect_timeout)?,
            plugins,
        })
    }

    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    /// Run one check for `config`.
    pub async fn execute(&self, config: &ProbeConfig) -> Execution {
        let start = Instant::now();

        let result = match config.probe_type {
            ProbeType::Http | ProbeType::Api => self.http.check(config).await,
            ProbeType::Tcp => run_tcp_check(&config.target, config.timeout).await,
            ProbeType::Database => run_database_check(&config.target, config.timeout).await,
            // plugins report their own elapsed time
            ProbeType::Plugin => return self.execute_plugin(config).await,
            ProbeType::Unknown => Ok(Execution::unknown("unknown check type")),
        };

        result
            .unwrap_or_else(Execution::from)
            .with_response_time(start.elapsed())
    }

    async fn execute_plugin(&self, config: &ProbeConfig) -> Execution {
        let name = match config.plugin_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => return Execution::unknown("no plugin specified"),
        };

        let Some(plugin) = self.plugins.get(name) else {
            return Execution::unknown(format!("plugin '{}' not found", name));
        };

        // cancelled on every exit path, including this future being dropped
        let token = CancellationToken::new();
        let _guard = token.clone().drop_guard();
        let start = Instant::now();

        match tokio::time::timeout(
            config.timeout,
            plugin.execute(token.clone(), &config.target, config.timeout),
        )
        .await
        {
            Ok(execution) => execution,
            Err(_) => Execution::down(format!(
                "plugin '{}' timed out after {:?}",
                name, config.timeout
            ))
            .with_response_time(start.elapsed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Fixed;

    #[async_trait]
    impl ProbePlugin for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn probe_type(&self) -> ProbeType {
            ProbeType::Plugin
        }

        fn description(&self) -> &str {
            "always warns"
        }

        async fn execute(&self, _token: CancellationToken, target: &str, _timeout: Duration) -> Execution {
            Execution::new(ProbeStatus::Warning, format!("saw {}", target))
                .with_response_time(Duration::from_millis(42))
        }
    }

    struct Hangs;

    #[async_trait]
    impl ProbePlugin for Hangs {
        fn name(&self) -> &str {
            "hangs"
        }

        fn probe_type(&self) -> ProbeType {
            ProbeType::Plugin
        }

        fn description(&self) -> &str {
            "never answers"
        }

        async fn execute(&self, _token: CancellationToken, _target: &str, _timeout: Duration) -> Execution {
            std::future::pending::<()>().await;
            Execution::up("unreachable")
        }
    }

    fn executor() -> Executor {
        let registry = PluginRegistry::new();
        registry.register(Arc::new(Fixed));
        registry.register(Arc::new(Hangs));
        Executor::new(Arc::new(registry), Duration::from_secs(1)).unwrap()
    }

    fn plugin_config(plugin: Option<&str>) -> ProbeConfig {
        ProbeConfig {
            name: "plugin".to_string(),
            probe_type: ProbeType::Plugin,
            target: "somewhere".to_string(),
            timeout: Duration::from_millis(200),
            plugin_name: plugin.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_plugin_result_passes_through() {
        let result = executor().execute(&plugin_config(Some("fixed"))).await;
        assert_eq!(result.status, ProbeStatus::Warning);
        assert_eq!(result.message, "saw somewhere");
        assert_eq!(result.response_time, Duration::from_millis(42));
    }

    #[tokio::test]
    async fn test_missing_plugin_is_unknown() {
        let result = executor().execute(&plugin_config(Some("ghost"))).await;
        assert_eq!(result.status, ProbeStatus::Unknown);
        assert!(result.message.contains("ghost"));

        let result = executor().execute(&plugin_config(None)).await;
        assert_eq!(result.status, ProbeStatus::Unknown);
    }

    #[tokio::test]
    async fn test_hung_plugin_is_cut_off_at_timeout() {
        let start = Instant::now();
        let result = executor().execute(&plugin_config(Some("hangs"))).await;
        assert_eq!(result.status, ProbeStatus::Down);
        assert!(result.message.contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unknown_type() {
        let cfg = ProbeConfig {
            name: "odd".to_string(),
            probe_type: ProbeType::Unknown,
            target: "x".to_string(),
            ..Default::default()
        };
        let result = executor().execute(&cfg).await;
        assert_eq!(result.status, ProbeStatus::Unknown);
        assert_eq!(result.message, "unknown check type");
    }

    async fn serve() -> String {
        use axum::{routing::get, Router};

        let app = Router::new()
            .route("/health", get(|| async { "ok" }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    "late"
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn built_in(probe_type: ProbeType, target: String, timeout: Duration) -> ProbeConfig {
        ProbeConfig {
            name: "built-in".to_string(),
            probe_type,
            target,
            timeout,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_api_type_uses_http_check() {
        let base = serve().await;
        for probe_type in [ProbeType::Http, ProbeType::Api] {
            let cfg = built_in(probe_type, format!("{}/health", base), Duration::from_secs(2));
            let result = executor().execute(&cfg).await;
            assert_eq!(result.status, ProbeStatus::Up, "{:?}", probe_type);
            assert!(result.message.contains("200"));
            assert!(result.response_time > Duration::ZERO);
        }
    }

    #[tokio::test]
    async fn test_http_timeout_is_down_with_message() {
        let base = serve().await;
        let cfg = built_in(ProbeType::Api, format!("{}/slow", base), Duration::from_millis(200));
        let start = Instant::now();
        let result = executor().execute(&cfg).await;
        assert_eq!(result.status, ProbeStatus::Down);
        assert!(!result.message.is_empty());
        assert!(result.response_time >= Duration::from_millis(200));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_closed_tcp_port_is_down_with_elapsed_time() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let cfg = built_in(ProbeType::Tcp, addr.to_string(), Duration::from_secs(1));
        let result = executor().execute(&cfg).await;
        assert_eq!(result.status, ProbeStatus::Down);
        assert!(!result.message.is_empty());
        assert!(result.response_time > Duration::ZERO);
        assert!(result.response_time < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unsupported_database_scheme_is_down() {
        let cfg = ProbeConfig {
            name: "cache".to_string(),
            probe_type: ProbeType::Database,
            target: "redis://localhost:6379".to_string(),
            timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let result = executor().execute(&cfg).await;
        assert_eq!(result.status, ProbeStatus::Down);
        assert!(result.message.contains("unsupported database type"));
    }
}
