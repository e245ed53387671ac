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

//! LLM-judged accuracy of a single tool call

use super::{binary_judgment, span_input};
use crate::prompts::{self, labels};
use crate::{Metric, MetricContext, MetricError, MetricInput};
use async_trait::async_trait;
use mce_core::{AggregationLevel, EntityType, MetricResult};

/// Asks the jury whether a tool call fit the request it served.
///
/// Needs the tool's input, output and name; the tool definition is passed
/// along when the parser found one.
pub struct ToolUtilizationAccuracy;

impl ToolUtilizationAccuracy {
    pub const NAME: &'static str = "ToolUtilizationAccuracy";
}

#[async_trait]
impl Metric for ToolUtilizationAccuracy {
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
        "Whether a tool was called appropriately and its output addressed the input"
    }

    fn requires_judge(&self) -> bool {
        true
    }

    async fn compute(&self, input: MetricInput<'_>, ctx: &MetricContext) -> Result<MetricResult, MetricError> {
        let span = span_input(self.name(), &input)?;

        let mut missing = Vec::new();
        if !span.has_input() {
            missing.push("input");
        }
        if !span.has_output() {
            missing.push("output");
        }
        if span.entity_name.trim().is_empty() {
            missing.push("tool name");
        }
        if !missing.is_empty() {
            return Err(MetricError::MissingData(format!(
                "tool span {} has no {}",
                span.span_id,
                missing.join(", ")
            )));
        }

        let definition = match &span.tool_definition {
            Some(definition) => serde_json::to_string(definition)?,
            None => "not provided".to_string(),
        };
        let prompt = prompts::tool_utilization_accuracy(
            &span.input_text(),
            &span.entity_name,
            &definition,
            &span.output_text(),
        );

        let result = binary_judgment(
            ctx,
            self.name(),
            AggregationLevel::Span,
            &prompt,
            labels::TOOL_USAGE_CORRECT,
            labels::TOOL_USAGE_INCORRECT,
        )
        .await?;

        Ok(result
            .with_description(self.description())
            .with_entities([span.entity_name.as_str()]))
    }
}
