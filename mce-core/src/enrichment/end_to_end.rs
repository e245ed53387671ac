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

//! First query and final response of a session

use super::{attribute_keys, indexed_messages, payload_text, to_value, SessionTransformer};
use crate::conventions::keys;
use crate::error::EnrichmentError;
use crate::session::SessionEntity;
use crate::span::{chronological, EntityType, SpanEntity};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndToEndAttributes {
    pub query: Option<String>,
    pub query_span_id: Option<String>,
    pub response: Option<String>,
    pub response_span_id: Option<String>,
}

/// Writes `end_to_end`.
///
/// The query is the earliest user-facing input and the response the last
/// produced output, considering workflow, graph, agent and LLM spans.
pub struct EndToEndAttributesTransformer;

impl EndToEndAttributesTransformer {
    pub fn extract(session: &SessionEntity) -> EndToEndAttributes {
        let ordered = chronological(session.spans.iter().filter(|s| is_user_facing(s)));

        let first_query = ordered
            .iter()
            .find_map(|span| query_text(span).map(|text| (span.span_id.clone(), text)));

        let mut by_end = ordered.clone();
        by_end.sort_by(|a, b| end_key(a).total_cmp(&end_key(b)));
        let last_response = by_end
            .iter()
            .rev()
            .find_map(|span| payload_text(&span.output_payload).map(|text| (span.span_id.clone(), text)));

        EndToEndAttributes {
            query_span_id: first_query.as_ref().map(|(id, _)| id.clone()),
            query: first_query.map(|(_, text)| text),
            response_span_id: last_response.as_ref().map(|(id, _)| id.clone()),
            response: last_response.map(|(_, text)| text),
        }
    }
}

fn is_user_facing(span: &SpanEntity) -> bool {
    matches!(
        span.entity_type,
        EntityType::Workflow | EntityType::Graph | EntityType::Agent | EntityType::Llm
    )
}

fn end_key(span: &SpanEntity) -> f64 {
    span.end_time.or(span.start_time).unwrap_or(f64::NEG_INFINITY)
}

/// LLM spans contribute their last user message; others their input text
fn query_text(span: &SpanEntity) -> Option<String> {
    if span.entity_type == EntityType::Llm {
        return indexed_messages(&span.input_payload, keys::PROMPT_PREFIX)
            .into_iter()
            .rev()
            .find(|m| m.role.as_deref() == Some("user"))
            .and_then(|m| m.content);
    }
    payload_text(&span.input_payload)
}

impl SessionTransformer for EndToEndAttributesTransformer {
    fn key(&self) -> &'static str {
        attribute_keys::END_TO_END
    }

    fn derive(&self, session: &SessionEntity) -> Result<Value, EnrichmentError> {
        to_value(self.key(), &Self::extract(session))
    }

    fn default_value(&self) -> Value {
        serde_json::json!({"query": null, "query_span_id": null, "response": null, "response_span_id": null})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_query_last_response() {
        let mut llm = SpanEntity::new("llm", EntityType::Llm, "gpt").with_timing(5.0, 2.0);
        llm.input_payload = json!({
            "gen_ai.prompt.0.role": "system",
            "gen_ai.prompt.0.content": "be nice",
            "gen_ai.prompt.1.role": "user",
            "gen_ai.prompt.1.content": "What is the weather?",
        })
        .as_object()
        .unwrap()
        .clone();
        llm.output_payload = json!({"gen_ai.completion.0.content": "Sunny"}).as_object().unwrap().clone();

        let mut agent = SpanEntity::new("agent", EntityType::Agent, "a").with_timing(1.0, 20.0);
        agent.output_payload = json!({"content": "It is sunny in Paris"}).as_object().unwrap().clone();

        let mut tool = SpanEntity::new("tool", EntityType::Tool, "t").with_timing(0.0, 100.0);
        tool.input_payload = json!({"query": "tool input"}).as_object().unwrap().clone();
        tool.output_payload = json!({"content": "tool output"}).as_object().unwrap().clone();

        let mut session = SessionEntity::new("s");
        session.spans = vec![tool, llm, agent];

        let attrs = EndToEndAttributesTransformer::extract(&session);
        assert_eq!(attrs.query.as_deref(), Some("What is the weather?"));
        assert_eq!(attrs.query_span_id.as_deref(), Some("llm"));
        assert_eq!(attrs.response.as_deref(), Some("It is sunny in Paris"));
        assert_eq!(attrs.response_span_id.as_deref(), Some("agent"));
    }

    #[test]
    fn test_empty_session() {
        let attrs = EndToEndAttributesTransformer::extract(&SessionEntity::new("s"));
        assert_eq!(attrs, EndToEndAttributes::default());
    }
}
