//! # Upstream Manager
//!
//! Owns one [`UpstreamGuard`] per upstream source for the life of the process.
//! Guards are built once from configuration and handed out by name.

use super::metrics::UpstreamStatus;
use super::upstream::UpstreamGuard;
use crate::config::OrchestratorConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Default)]
pub struct UpstreamManager {
    guards: HashMap<String, Arc<UpstreamGuard>>,
}

impl UpstreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build guards for every configured upstream and every upstream a task
    /// names; unconfigured names get `default_upstream` settings.
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        let mut manager = Self::new();
        let names = config
            .upstreams
            .keys()
            .cloned()
            .chain(config.tasks.iter().map(|task| task.upstream.clone()));

        for name in names {
            if manager.guards.contains_key(&name) {
                continue;
            }
            let guard = UpstreamGuard::from_config(name.clone(), config.upstream(&name));
            manager.insert(Arc::new(guard));
        }

        info!(
            upstreams = manager.guards.len(),
            "🌐 Upstream guards initialized"
        );
        manager
    }

    pub fn insert(&mut self, guard: Arc<UpstreamGuard>) {
        self.guards.insert(guard.name().to_string(), guard);
    }

    pub fn get(&self, name: &str) -> Option<Arc<UpstreamGuard>> {
        self.guards.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.guards.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn statuses(&self) -> Vec<UpstreamStatus> {
        let mut statuses: Vec<UpstreamStatus> =
            self.guards.values().map(|guard| guard.status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Fraction of upstreams whose breaker is healthy; 1.0 with no upstreams
    pub fn system_health_score(&self) -> f64 {
        if self.guards.is_empty() {
            return 1.0;
        }
        let healthy = self
            .guards
            .values()
            .filter(|guard| guard.breaker().is_healthy())
            .count();
        healthy as f64 / self.guards.len() as f64
    }
}
