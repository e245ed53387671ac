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

//! Share of failing tool calls

use super::session_input;
use crate::{Metric, MetricContext, MetricError, MetricInput};
use async_trait::async_trait;
use mce_core::{AggregationLevel, EntityType, MetricResult};

/// Percentage of tool spans flagged with an error; 0 when the session made no tool calls
pub struct ToolErrorRate;

impl ToolErrorRate {
    pub const NAME: &'static str = "ToolErrorRate";
}

#[async_trait]
impl Metric for ToolErrorRate {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn aggregation_level(&self) -> AggregationLevel {
        AggregationLevel::Session
    }

    fn description(&self) -> &str {
        "Percentage of tool spans that encountered errors"
    }

    async fn compute(&self, input: MetricInput<'_>, _ctx: &MetricContext) -> Result<MetricResult, MetricError> {
        let session = session_input(self.name(), &input)?;

        let mut total = 0usize;
        let mut failed = Vec::new();
        for tool in session.spans_of(EntityType::Tool) {
            total += 1;
            if tool.contains_error {
                failed.push(tool.span_id.as_str());
            }
        }

        let rate = if total == 0 {
            0.0
        } else {
            failed.len() as f64 / total as f64 * 100.0
        };

        Ok(MetricResult::success(self.name(), AggregationLevel::Session, rate)
            .with_description(self.description())
            .with_unit("%")
            .with_metadata("total_tool_calls", total)
            .with_metadata("total_tool_errors", failed.len())
            .with_entities(failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mce_core::{MetricValue, SessionEntity, SpanEntity};
    use serde_json::json;

    fn tool(id: &str, error: bool) -> SpanEntity {
        let mut span = SpanEntity::new(id, EntityType::Tool, "search");
        span.contains_error = error;
        span
    }

    async fn run(spans: Vec<SpanEntity>) -> MetricResult {
        let mut session = SessionEntity::new("s1");
        session.spans = spans;
        ToolErrorRate
            .compute(MetricInput::Session(&session), &MetricContext::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_rate_over_tool_spans_only() {
        let result = run(vec![
            tool("t1", true),
            tool("t2", false),
            tool("t3", false),
            tool("t4", true),
            SpanEntity::new("a1", EntityType::Agent, "planner"),
        ])
        .await;

        assert_eq!(result.value, MetricValue::Float(50.0));
        assert_eq!(result.unit, "%");
        assert_eq!(result.metadata.get("total_tool_calls"), Some(&json!(4)));
        assert_eq!(result.metadata.get("total_tool_errors"), Some(&json!(2)));
        assert_eq!(result.entities_involved, vec!["t1", "t4"]);
    }

    #[tokio::test]
    async fn test_no_tool_spans_is_zero() {
        let result = run(vec![SpanEntity::new("a1", EntityType::Agent, "planner")]).await;
        assert!(result.success);
        assert_eq!(result.value.as_f64(), Some(0.0));
        assert_eq!(result.metadata.get("total_tool_calls"), Some(&json!(0)));
    }
}
