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

//! Built-in metric set
//!
//! ```rust,ignore
//! use mce_engine::{native, MetricRegistry};
//!
//! let registry = MetricRegistry::new();
//! native::register_native(&registry)?;
//! assert!(registry.contains("metrics.session.CyclesCount"));
//! ```

use crate::metrics::{
    AgentToAgentInteractions, AgentToToolInteractions, CyclesCount, Groundedness, ToolError, ToolErrorRate,
    ToolUtilizationAccuracy,
};
use crate::registry::{MetricRegistry, RegistryError};
use crate::Metric;
use std::sync::Arc;

/// Names of the built-in metrics
pub const NATIVE_METRICS: [&str; 7] = [
    ToolError::NAME,
    ToolUtilizationAccuracy::NAME,
    AgentToAgentInteractions::NAME,
    AgentToToolInteractions::NAME,
    ToolErrorRate::NAME,
    CyclesCount::NAME,
    Groundedness::NAME,
];

/// Built-in metric by name; dotted names resolve by their last segment
pub fn native_metric(name: &str) -> Option<Arc<dyn Metric>> {
    let name = name.trim();
    let short = name.rsplit_once('.').map(|(_, short)| short).unwrap_or(name);

    let metric: Arc<dyn Metric> = match short {
        ToolError::NAME => Arc::new(ToolError),
        ToolUtilizationAccuracy::NAME => Arc::new(ToolUtilizationAccuracy),
        AgentToAgentInteractions::NAME => Arc::new(AgentToAgentInteractions),
        AgentToToolInteractions::NAME => Arc::new(AgentToToolInteractions),
        ToolErrorRate::NAME => Arc::new(ToolErrorRate),
        CyclesCount::NAME => Arc::new(CyclesCount),
        Groundedness::NAME => Arc::new(Groundedness),
        _ => return None,
    };
    Some(metric)
}

/// Register every built-in metric, replacing entries of the same name
pub fn register_native(registry: &MetricRegistry) -> Result<(), RegistryError> {
    for name in NATIVE_METRICS {
        if let Some(metric) = native_metric(name) {
            registry.register(metric)?;
        }
    }
    Ok(())
}

/// Register the built-in metrics among `names` that the registry lacks.
///
/// Returns how many were added. Names that are already registered, possibly
/// by a plugin overriding a built-in, are left alone.
pub fn register_requested<S: AsRef<str>>(registry: &MetricRegistry, names: &[S]) -> Result<usize, RegistryError> {
    let mut added = 0;
    for name in names {
        let name = name.as_ref();
        if registry.contains(name) {
            continue;
        }
        if let Some(metric) = native_metric(name) {
            registry.register(metric)?;
            added += 1;
        }
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mce_core::AggregationLevel;

    #[test]
    fn test_all_native_metrics_register() {
        let registry = MetricRegistry::new();
        register_native(&registry).unwrap();

        let mut expected: Vec<String> = NATIVE_METRICS.iter().map(|n| n.to_string()).collect();
        expected.sort();
        assert_eq!(registry.names(), expected);
    }

    #[test]
    fn test_levels() {
        let level = |name: &str| native_metric(name).map(|m| m.aggregation_level());
        assert_eq!(level("ToolError"), Some(AggregationLevel::Span));
        assert_eq!(level("ToolUtilizationAccuracy"), Some(AggregationLevel::Span));
        assert_eq!(level("metrics.session.CyclesCount"), Some(AggregationLevel::Session));
        assert_eq!(level("Groundedness"), Some(AggregationLevel::Session));
        assert!(native_metric("Nope").is_none());
    }

    #[test]
    fn test_register_requested_keeps_existing() {
        let registry = MetricRegistry::new();
        registry.register(Arc::new(CyclesCount)).unwrap();

        let added = register_requested(&registry, &["CyclesCount", "ToolErrorRate", "Unknown"]).unwrap();
        assert_eq!(added, 1);
        assert_eq!(registry.names(), vec!["CyclesCount", "ToolErrorRate"]);
    }
}
