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

//! Agent to tool call counts

use super::session_input;
use crate::{Metric, MetricContext, MetricError, MetricInput};
use async_trait::async_trait;
use mce_core::conventions::{keys, UNKNOWN_ENTITY};
use mce_core::enrichment::ancestors;
use mce_core::{AggregationLevel, EntityType, MetricResult, MetricValue, SessionEntity, SpanEntity};
use std::collections::BTreeMap;

/// Counts `"(Agent: A) -> (Tool: T)"` pairs over a session's tool spans.
///
/// The calling agent is the span's workflow name attribute, else the
/// nearest agent span above it, else `unknown`.
pub struct AgentToToolInteractions;

impl AgentToToolInteractions {
    pub const NAME: &'static str = "AgentToToolInteractions";

    fn calling_agent(session: &SessionEntity, tool: &SpanEntity) -> String {
        if let Some(name) = non_blank(tool.attribute_str(keys::WORKFLOW_NAME)) {
            return name.to_string();
        }
        ancestors(session, &tool.span_id)
            .into_iter()
            .find(|s| s.entity_type == EntityType::Agent)
            .map(|agent| agent.entity_name.clone())
            .unwrap_or_else(|| UNKNOWN_ENTITY.to_string())
    }

    fn tool_name(tool: &SpanEntity) -> String {
        non_blank(tool.attribute_str(keys::ENTITY_NAME))
            .unwrap_or(tool.entity_name.as_str())
            .to_string()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[async_trait]
impl Metric for AgentToToolInteractions {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn aggregation_level(&self) -> AggregationLevel {
        AggregationLevel::Session
    }

    fn description(&self) -> &str {
        "Number of calls each agent made to each tool"
    }

    async fn compute(&self, input: MetricInput<'_>, _ctx: &MetricContext) -> Result<MetricResult, MetricError> {
        let session = session_input(self.name(), &input)?;

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut tool_spans = Vec::new();
        for tool in session.spans_of(EntityType::Tool) {
            let label = format!(
                "(Agent: {}) -> (Tool: {})",
                Self::calling_agent(session, tool),
                Self::tool_name(tool)
            );
            *counts.entry(label).or_default() += 1;
            tool_spans.push(tool.span_id.as_str());
        }

        Ok(
            MetricResult::success(self.name(), AggregationLevel::Session, MetricValue::counts(counts))
                .with_description(self.description())
                .with_entities(tool_spans),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(id: &str, name: &str, parent: &str) -> SpanEntity {
        SpanEntity::new(id, EntityType::Tool, name).with_parent(parent)
    }

    #[tokio::test]
    async fn test_agent_resolution_order() {
        let mut explicit = tool("t1", "search", "a1");
        explicit
            .attributes
            .insert(keys::WORKFLOW_NAME.to_string(), json!("research_agent"));
        explicit
            .attributes
            .insert(keys::ENTITY_NAME.to_string(), json!("web_search"));

        let mut session = SessionEntity::new("s1");
        session.spans = vec![
            SpanEntity::new("a1", EntityType::Agent, "planner"),
            SpanEntity::new("task", EntityType::Task, "step").with_parent("a1"),
            explicit,
            tool("t2", "calculator", "task"),
            tool("t3", "calculator", "task"),
            tool("t4", "orphan_tool", "missing"),
        ];

        let result = AgentToToolInteractions
            .compute(MetricInput::Session(&session), &MetricContext::new())
            .await
            .unwrap();

        assert_eq!(
            result.value,
            MetricValue::counts([
                ("(Agent: research_agent) -> (Tool: web_search)", 1),
                ("(Agent: planner) -> (Tool: calculator)", 2),
                ("(Agent: unknown) -> (Tool: orphan_tool)", 1),
            ])
        );
        assert_eq!(result.entities_involved, vec!["t1", "t2", "t3", "t4"]);
    }

    #[tokio::test]
    async fn test_no_tools() {
        let mut session = SessionEntity::new("s1");
        session.spans = vec![SpanEntity::new("a1", EntityType::Agent, "planner")];
        let result = AgentToToolInteractions
            .compute(MetricInput::Session(&session), &MetricContext::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.value, MetricValue::Object(BTreeMap::new()));
    }
}
