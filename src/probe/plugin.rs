//! Plugin extension point for probe types that are not built in.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{DnsPlugin, Execution, ProbeError};
use crate::db::{ProbeConfig, ProbeType};

/// An externally supplied probe type.
///
/// `execute` must return within `timeout` and must watch `token`, which is
/// cancelled once the executor stops waiting. Failures are reported through
/// the returned status, never by panicking.
#[async_trait]
pub trait ProbePlugin: Send + Sync {
    fn name(&self) -> &str;

    fn probe_type(&self) -> ProbeType;

    fn description(&self) -> &str;

    async fn execute(&self, token: CancellationToken, target: &str, timeout: Duration) -> Execution;

    /// Reject configs this plugin cannot run.
    fn validate_config(&self, _config: &ProbeConfig) -> Result<(), ProbeError> {
        Ok(())
    }
}

/// Name-keyed lookup of plugins. Registering a name twice keeps the last one.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, Arc<dyn ProbePlugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the plugins that ship with the crate.
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(DnsPlugin));
        registry
    }

    pub fn register(&self, plugin: Arc<dyn ProbePlugin>) {
        let name = plugin.name().to_string();
        let previous = self
            .plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), plugin);
        if previous.is_some() {
            tracing::info!("PluginRegistry: Replaced plugin {}", name);
        } else {
            tracing::info!("PluginRegistry: Registered plugin {}", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProbePlugin>> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// All plugins, ordered by name.
    pub fn list(&self) -> Vec<Arc<dyn ProbePlugin>> {
        let mut plugins: Vec<_> = self
            .plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        plugins.sort_by(|a, b| a.name().cmp(b.name()));
        plugins
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ProbeStatus;

    struct Named(&'static str, &'static str);

    #[async_trait]
    impl ProbePlugin for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn probe_type(&self) -> ProbeType {
            ProbeType::Plugin
        }

        fn description(&self) -> &str {
            self.1
        }

        async fn execute(&self, _token: CancellationToken, _target: &str, _timeout: Duration) -> Execution {
            Execution::new(ProbeStatus::Up, self.1)
        }
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = PluginRegistry::new();
        registry.register(Arc::new(Named("echo", "first")));
        registry.register(Arc::new(Named("echo", "second")));
        registry.register(Arc::new(Named("alpha", "other")));

        assert_eq!(registry.get("echo").unwrap().description(), "second");
        assert!(registry.get("missing").is_none());

        let names: Vec<_> = registry.list().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["alpha", "echo"]);
    }

    #[test]
    fn test_builtin_registry_has_dns() {
        let registry = PluginRegistry::with_builtin();
        let dns = registry.get("dns").unwrap();
        assert_eq!(dns.probe_type(), ProbeType::Plugin);
    }
}
