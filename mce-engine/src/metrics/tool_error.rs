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

//! Status reported by a tool span

use super::span_input;
use crate::{Metric, MetricContext, MetricError, MetricInput};
use async_trait::async_trait;
use mce_core::{AggregationLevel, EntityType, MetricResult, MetricValue};
use serde_json::{Map, Value};

const STATUS_KEY: &str = "status";

/// Reports the first `status` field found in a tool span.
///
/// The output payload is searched first, then the input payload, then the
/// span attributes. Nested objects and arrays are searched depth first.
pub struct ToolError;

impl ToolError {
    pub const NAME: &'static str = "ToolError";

    fn find_status(value: &Value) -> Option<&Value> {
        match value {
            Value::Object(map) => Self::find_in_map(map),
            Value::Array(items) => items.iter().find_map(Self::find_status),
            _ => None,
        }
    }

    fn find_in_map(map: &Map<String, Value>) -> Option<&Value> {
        map.iter().find_map(|(key, value)| {
            if key == STATUS_KEY {
                Some(value)
            } else {
                Self::find_status(value)
            }
        })
    }
}

#[async_trait]
impl Metric for ToolError {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn aggregation_level(&self) -> AggregationLevel {
        AggregationLevel::Span
    }

    fn required_entity_types(&self) -> &[EntityType] {
        &[EntityType::Tool]
    }

    fn description(&self) -> &str {
        "Status reported by a tool call"
    }

    async fn compute(&self, input: MetricInput<'_>, _ctx: &MetricContext) -> Result<MetricResult, MetricError> {
        let span = span_input(self.name(), &input)?;
        if span.entity_type != EntityType::Tool {
            return Err(MetricError::MissingData(format!(
                "span {} is a {} span, not a tool span",
                span.span_id, span.entity_type
            )));
        }

        let status = Self::find_in_map(&span.output_payload)
            .or_else(|| Self::find_in_map(&span.input_payload))
            .or_else(|| Self::find_in_map(&span.attributes))
            .ok_or_else(|| MetricError::MissingData(format!("no status field in tool span {}", span.span_id)))?;

        Ok(
            MetricResult::success(self.name(), AggregationLevel::Span, MetricValue::from(status.clone()))
                .with_description(self.description())
                .with_entities([span.entity_name.as_str()]),
        )
    }
}
