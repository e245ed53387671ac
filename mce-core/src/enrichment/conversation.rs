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

//! Conversation turns from LLM and agent spans

use super::{attribute_keys, indexed_messages, payload_text, to_value, SessionTransformer};
use crate::conventions::keys;
use crate::error::EnrichmentError;
use crate::session::SessionEntity;
use crate::span::{chronological, EntityType, SpanEntity};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One turn of the session's conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub span_id: String,
    pub entity_type: EntityType,
    /// Agent name or model name
    pub speaker: String,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<Value>,
    pub start_time: Option<f64>,
}

/// Writes `conversation`: one turn per LLM or agent span, in start order
pub struct ConversationDataTransformer;

impl ConversationDataTransformer {
    pub fn turns(session: &SessionEntity) -> Vec<ConversationTurn> {
        chronological(
            session
                .spans
                .iter()
                .filter(|s| matches!(s.entity_type, EntityType::Llm | EntityType::Agent)),
        )
        .into_iter()
        .filter_map(turn_for)
        .collect()
    }
}

fn turn_for(span: &SpanEntity) -> Option<ConversationTurn> {
    let (role, content, tool_calls) = match span.entity_type {
        EntityType::Llm => {
            let last = indexed_messages(&span.output_payload, keys::COMPLETION_PREFIX).pop();
            match last {
                Some(message) => (
                    message.role.unwrap_or_else(|| "assistant".to_string()),
                    message.content.unwrap_or_default(),
                    message.tool_calls,
                ),
                None => (
                    "assistant".to_string(),
                    payload_text(&span.output_payload).unwrap_or_default(),
                    Vec::new(),
                ),
            }
        }
        _ => (
            "agent".to_string(),
            payload_text(&span.output_payload).unwrap_or_default(),
            embedded_tool_calls(span),
        ),
    };

    if content.is_empty() && tool_calls.is_empty() {
        return None;
    }

    Some(ConversationTurn {
        span_id: span.span_id.clone(),
        entity_type: span.entity_type,
        speaker: span.entity_name.clone(),
        role,
        content,
        tool_calls,
        start_time: span.start_time,
    })
}

fn embedded_tool_calls(span: &SpanEntity) -> Vec<Value> {
    match span.output_payload.get("tool_calls") {
        Some(Value::Array(calls)) => calls.clone(),
        Some(Value::Object(call)) => vec![Value::Object(call.clone())],
        _ => Vec::new(),
    }
}

impl SessionTransformer for ConversationDataTransformer {
    fn key(&self) -> &'static str {
        attribute_keys::CONVERSATION
    }

    fn derive(&self, session: &SessionEntity) -> Result<Value, EnrichmentError> {
        to_value(self.key(), &Self::turns(session))
    }

    fn default_value(&self) -> Value {
        Value::Array(Vec::new())
    }
}
