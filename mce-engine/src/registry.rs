// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Metric registry

use crate::Metric;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

/// Name-indexed metric table.
///
/// Registration normally happens at startup; lookups during a run clone the
/// `Arc` out of the read lock so no lock is held across an await.
/// Registering an existing name replaces the previous entry.
#[derive(Clone, Default)]
pub struct MetricRegistry {
    metrics: Arc<RwLock<HashMap<String, Arc<dyn Metric>>>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the metric's own name
    pub fn register(&self, metric: Arc<dyn Metric>) -> Result<(), RegistryError> {
        self.register_as(None, metric)
    }

    /// Register under an explicit name, or the metric's own name
    pub fn register_as(&self, name: Option<&str>, metric: Arc<dyn Metric>) -> Result<(), RegistryError> {
        let name = name.unwrap_or_else(|| metric.name()).trim().to_string();

        metric.validate().map_err(|e| RegistryError::InvalidMetric {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        if name.is_empty() {
            return Err(RegistryError::InvalidMetric {
                name,
                reason: "registration name is empty".to_string(),
            });
        }

        let mut metrics = self.metrics.write();
        if metrics.contains_key(&name) {
            info!("Overriding metric: {} ({})", name, metric.aggregation_level());
        } else {
            info!("Registering metric: {} ({})", name, metric.aggregation_level());
        }
        metrics.insert(name, metric);
        Ok(())
    }

    /// Unregister a metric by name
    pub fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        let mut metrics = self.metrics.write();
        metrics
            .remove(name)
            .ok_or(RegistryError::NotFound(name.to_string()))?;

        info!("Unregistered metric: {}", name);
        Ok(())
    }

    /// Get a metric by name.
    ///
    /// Dotted names (`metrics.session.CyclesCount`) fall back to their last segment.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Metric>> {
        let metrics = self.metrics.read();
        let name = name.trim();
        metrics.get(name).cloned().or_else(|| {
            name.rsplit_once('.')
                .and_then(|(_, short)| metrics.get(short).cloned())
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Snapshot of all registered metrics
    pub fn list(&self) -> BTreeMap<String, Arc<dyn Metric>> {
        let metrics = self.metrics.read();
        metrics
            .iter()
            .map(|(name, metric)| (name.clone(), Arc::clone(metric)))
            .collect()
    }

    /// Sorted registered names
    pub fn names(&self) -> Vec<String> {
        let metrics = self.metrics.read();
        let mut names: Vec<String> = metrics.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.read().is_empty()
    }
}

/// Errors that can occur in the registry
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid metric {name}: {reason}")]
    InvalidMetric { name: String, reason: String },

    #[error("Metric not found: {0}")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MetricContext, MetricError, MetricInput};
    use async_trait::async_trait;
    use mce_core::{AggregationLevel, EntityType, MetricResult};

    struct Constant {
        name: &'static str,
        level: AggregationLevel,
        types: &'static [EntityType],
        value: i64,
    }

    #[async_trait]
    impl Metric for Constant {
        fn name(&self) -> &str {
            self.name
        }

        fn aggregation_level(&self) -> AggregationLevel {
            self.level
        }

        fn required_entity_types(&self) -> &[EntityType] {
            self.types
        }

        async fn compute(&self, _input: MetricInput<'_>, _ctx: &MetricContext) -> Result<MetricResult, MetricError> {
            Ok(MetricResult::success(self.name, self.level, self.value))
        }
    }

    fn session_metric(name: &'static str, value: i64) -> Arc<dyn Metric> {
        Arc::new(Constant {
            name,
            level: AggregationLevel::Session,
            types: &[],
            value,
        })
    }

    #[test]
    fn test_register_and_get() {
        let registry = MetricRegistry::new();
        registry.register(session_metric("CyclesCount", 1)).unwrap();

        assert!(registry.get("CyclesCount").is_some());
        assert!(registry.get("metrics.session.CyclesCount").is_some());
        assert!(registry.get("Unknown").is_none());
        assert_eq!(registry.names(), vec!["CyclesCount"]);
    }

    #[tokio::test]
    async fn test_reregistration_overrides() {
        let registry = MetricRegistry::new();
        registry.register(session_metric("Score", 1)).unwrap();
        registry.register(session_metric("Score", 2)).unwrap();
        assert_eq!(registry.len(), 1);

        let metric = registry.get("Score").unwrap();
        let session = mce_core::SessionEntity::new("s");
        let result = metric
            .compute(MetricInput::Session(&session), &MetricContext::new())
            .await
            .unwrap();
        assert_eq!(result.value, mce_core::MetricValue::Int(2));
    }

    #[test]
    fn test_invalid_metric_fails_at_registration() {
        let registry = MetricRegistry::new();
        let untyped_span_metric = Arc::new(Constant {
            name: "Bad",
            level: AggregationLevel::Span,
            types: &[],
            value: 0,
        });
        assert!(matches!(
            registry.register(untyped_span_metric),
            Err(RegistryError::InvalidMetric { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_as_alias_and_unregister() {
        let registry = MetricRegistry::new();
        registry
            .register_as(Some("custom.Alias"), session_metric("Original", 1))
            .unwrap();
        assert!(registry.contains("custom.Alias"));
        assert!(!registry.contains("Original"));

        registry.unregister("custom.Alias").unwrap();
        assert!(matches!(registry.unregister("custom.Alias"), Err(RegistryError::NotFound(_))));
    }
}
