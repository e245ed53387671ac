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

//! Native metrics
//!
//! Span-level metrics look at a single tool span, session-level metrics at
//! one session's spans and its enriched attributes.

pub mod agent_to_agent_interactions;
pub mod agent_to_tool_interactions;
pub mod cycles;
pub mod groundedness;
pub mod tool_error;
pub mod tool_error_rate;
pub mod tool_utilization_accuracy;

pub use agent_to_agent_interactions::AgentToAgentInteractions;
pub use agent_to_tool_interactions::AgentToToolInteractions;
pub use cycles::CyclesCount;
pub use groundedness::Groundedness;
pub use tool_error::ToolError;
pub use tool_error_rate::ToolErrorRate;
pub use tool_utilization_accuracy::ToolUtilizationAccuracy;

use crate::jury::GradingSchema;
use crate::{MetricContext, MetricError, MetricInput};
use mce_core::{AggregationLevel, MetricResult, SessionEntity, SpanEntity};

/// Session behind a session-level input
pub(crate) fn session_input<'a>(metric: &str, input: &MetricInput<'a>) -> Result<&'a SessionEntity, MetricError> {
    match *input {
        MetricInput::Session(session) => Ok(session),
        _ => Err(MetricError::unsupported(metric, input)),
    }
}

/// Span behind a span-level input
pub(crate) fn span_input<'a>(metric: &str, input: &MetricInput<'a>) -> Result<&'a SpanEntity, MetricError> {
    match *input {
        MetricInput::Span { span, .. } => Ok(span),
        _ => Err(MetricError::unsupported(metric, input)),
    }
}

/// Ask the jury for a 0/1 judgment and turn the consensus into a result
pub(crate) async fn binary_judgment(
    ctx: &MetricContext,
    metric: &str,
    level: AggregationLevel,
    prompt: &str,
    positive: &'static str,
    negative: &'static str,
) -> Result<MetricResult, MetricError> {
    let jury = ctx.jury()?;
    let verdict = jury.judge(prompt, &GradingSchema::Binary).await?;

    let models: Vec<String> = verdict.votes.iter().map(|v| v.model.clone()).collect();
    Ok(MetricResult::success(metric, level, verdict.score)
        .with_reasoning(verdict.reasoning.clone())
        .with_metadata("label", crate::prompts::labels::binary(verdict.score, positive, negative))
        .with_metadata("votes", verdict.vote_count())
        .with_metadata("models", models)
        .with_metadata("disagreement", verdict.disagreement))
}
