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

//! LLM-judged groundedness of a whole session

use super::{binary_judgment, session_input};
use crate::prompts::{self, labels};
use crate::{Metric, MetricContext, MetricError, MetricInput};
use async_trait::async_trait;
use mce_core::span::chronological;
use mce_core::{AggregationLevel, EntityType, MetricResult, SessionEntity};

/// Asks the jury whether the agents' and tools' outputs are supported by
/// the data they were given
pub struct Groundedness;

impl Groundedness {
    pub const NAME: &'static str = "Groundedness";

    /// `INPUT/OUTPUT` blocks of every agent and tool span, in time order
    pub fn conversation(session: &SessionEntity) -> String {
        chronological(
            session
                .spans
                .iter()
                .filter(|s| matches!(s.entity_type, EntityType::Agent | EntityType::Tool)),
        )
        .into_iter()
        .map(|s| format!("INPUT: {}\n OUTPUT: {}", s.input_text(), s.output_text()))
        .collect::<Vec<_>>()
        .join("\n\n")
    }
}

#[async_trait]
impl Metric for Groundedness {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn aggregation_level(&self) -> AggregationLevel {
        AggregationLevel::Session
    }

    fn description(&self) -> &str {
        "Whether responses are supported by the data available in the session"
    }

    fn requires_judge(&self) -> bool {
        true
    }

    async fn compute(&self, input: MetricInput<'_>, ctx: &MetricContext) -> Result<MetricResult, MetricError> {
        let session = session_input(self.name(), &input)?;
        let conversation = Self::conversation(session);
        if conversation.is_empty() {
            return Err(MetricError::MissingData(format!(
                "session {} has no agent or tool spans",
                session.session_id
            )));
        }

        let prompt = prompts::groundedness(&conversation);
        let result = binary_judgment(
            ctx,
            self.name(),
            AggregationLevel::Session,
            &prompt,
            labels::GROUNDED,
            labels::NOT_GROUNDED,
        )
        .await?;

        Ok(result.with_description(self.description()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testing::{context_with, FixedJudge};
    use mce_core::{MetricValue, SpanEntity};
    use serde_json::json;

    fn session() -> SessionEntity {
        let mut agent = SpanEntity::new("a1", EntityType::Agent, "planner").with_timing(1.0, 1.0);
        agent.input_payload = json!({"query": "weather in Paris?"}).as_object().unwrap().clone();
        agent.output_payload = json!({"content": "It is sunny"}).as_object().unwrap().clone();

        let mut tool = SpanEntity::new("t1", EntityType::Tool, "weather").with_timing(0.5, 1.0);
        tool.input_payload = json!({"city": "Paris"}).as_object().unwrap().clone();
        tool.output_payload = json!({"sky": "sunny"}).as_object().unwrap().clone();

        let llm = SpanEntity::new("l1", EntityType::Llm, "gpt").with_timing(2.0, 1.0);

        let mut session = SessionEntity::new("s1");
        session.spans = vec![agent, tool, llm];
        session
    }

    #[test]
    fn test_conversation_format() {
        let conversation = Groundedness::conversation(&session());
        assert_eq!(
            conversation,
            "INPUT: {\"city\":\"Paris\"}\n OUTPUT: {\"sky\":\"sunny\"}\n\n\
             INPUT: {\"query\":\"weather in Paris?\"}\n OUTPUT: {\"content\":\"It is sunny\"}"
        );
    }

    #[tokio::test]
    async fn test_jury_consensus_and_label() {
        let ctx = context_with(vec![
            FixedJudge::new("a", r#"{"metric_score": 0, "score_reasoning": "invented detail"}"#),
            FixedJudge::new("b", "```json\n{\"score\": 0, \"reasoning\": \"unsupported\"}\n```"),
            FixedJudge::new("c", r#"{'metric_score': 1, 'score_reasoning': 'fine'}"#),
        ]);
        let session = session();

        let result = Groundedness
            .compute(MetricInput::Session(&session), &ctx)
            .await
            .unwrap();

        assert_eq!(result.value, MetricValue::Float(0.0));
        assert_eq!(result.metadata.get("label"), Some(&json!("not_grounded")));
        assert_eq!(result.metadata.get("votes"), Some(&json!(3)));
        assert_eq!(result.metadata.get("disagreement"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_without_judge() {
        let session = session();
        let err = Groundedness
            .compute(MetricInput::Session(&session), &MetricContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MetricError::JudgeNotConfigured));
    }
}
