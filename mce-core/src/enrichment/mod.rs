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

//! Session enrichment pipeline
//!
//! Each stage derives one named attribute from a session's spans and writes
//! it under its own key in `enriched_attributes`. Stages never touch keys
//! owned by other stages, so re-running any stage (or the whole pipeline)
//! leaves the other attributes intact.

pub mod conversation;
pub mod end_to_end;
pub mod execution_tree;
pub mod transitions;
pub mod workflow;

pub use conversation::{ConversationDataTransformer, ConversationTurn};
pub use end_to_end::{EndToEndAttributes, EndToEndAttributesTransformer};
pub use execution_tree::{ancestors, ExecutionNode, ExecutionTree, ExecutionTreeTransformer};
pub use transitions::{AgentTransition, AgentTransitionTransformer};
pub use workflow::{WorkflowData, WorkflowDataTransformer, WorkflowRecord};

use crate::error::EnrichmentError;
use crate::session::{SessionEntity, SessionSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Keys written by the standard stages
pub mod attribute_keys {
    pub const CONVERSATION: &str = "conversation";
    pub const EXECUTION_TREE: &str = "execution_tree";
    pub const AGENT_TRANSITIONS: &str = "agent_transitions";
    pub const END_TO_END: &str = "end_to_end";
    pub const WORKFLOW_DATA: &str = "workflow_data";
}

/// One enrichment stage
pub trait SessionTransformer: Send + Sync {
    /// Attribute key this stage owns
    fn key(&self) -> &'static str;

    /// Compute the attribute from the session's spans
    fn derive(&self, session: &SessionEntity) -> Result<Value, EnrichmentError>;

    /// Value written when `derive` fails
    fn default_value(&self) -> Value {
        Value::Null
    }

    /// Write the derived attribute under [`Self::key`], and nothing else.
    ///
    /// A failing stage writes its default value instead of propagating.
    fn transform(&self, session: &mut SessionEntity) {
        let value = match self.derive(session) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    session_id = %session.session_id,
                    stage = self.key(),
                    error = %e,
                    "Enrichment stage failed, using default"
                );
                self.default_value()
            }
        };
        session.set_enriched(self.key(), value);
    }
}

/// Ordered chain of enrichment stages
pub struct DataPipeline {
    stages: Vec<Box<dyn SessionTransformer>>,
}

impl DataPipeline {
    /// Pipeline with no stages
    pub fn empty() -> Self {
        Self { stages: Vec::new() }
    }

    /// The five built-in stages in their fixed order
    pub fn standard() -> Self {
        Self::empty()
            .with_stage(ConversationDataTransformer)
            .with_stage(ExecutionTreeTransformer)
            .with_stage(AgentTransitionTransformer)
            .with_stage(WorkflowDataTransformer)
            .with_stage(EndToEndAttributesTransformer)
    }

    pub fn with_stage(mut self, stage: impl SessionTransformer + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_keys(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.key()).collect()
    }

    pub fn run(&self, session: &mut SessionEntity) {
        for stage in &self.stages {
            stage.transform(session);
        }
    }

    pub fn run_all(&self, sessions: &mut SessionSet) {
        for session in sessions.iter_mut() {
            self.run(session);
        }
        debug!(
            sessions = sessions.len(),
            stages = self.stages.len(),
            "Enriched sessions"
        );
    }
}

impl Default for DataPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

/// Serialize a stage's output
pub(crate) fn to_value<T: Serialize>(stage: &'static str, value: &T) -> Result<Value, EnrichmentError> {
    serde_json::to_value(value).map_err(|e| EnrichmentError::Stage {
        stage,
        reason: e.to_string(),
    })
}

/// Chat message reconstructed from indexed `prefix.N.field` payload keys
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexedMessage {
    pub index: usize,
    pub role: Option<String>,
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<Value>,
}

/// Group `prefix.N.field` keys of a flattened payload into messages
pub fn indexed_messages(payload: &Map<String, Value>, prefix: &str) -> Vec<IndexedMessage> {
    let dotted = format!("{}.", prefix);
    let mut grouped: BTreeMap<usize, Map<String, Value>> = BTreeMap::new();

    for (key, value) in payload {
        let Some(rest) = key.strip_prefix(&dotted) else {
            continue;
        };
        let Some((index, field)) = rest.split_once('.') else {
            continue;
        };
        let Ok(index) = index.parse::<usize>() else {
            continue;
        };
        grouped
            .entry(index)
            .or_default()
            .insert(field.to_string(), value.clone());
    }

    grouped
        .into_iter()
        .map(|(index, fields)| IndexedMessage {
            index,
            role: fields.get("role").and_then(Value::as_str).map(str::to_string),
            content: fields.get("content").and_then(value_text),
            tool_calls: tool_calls_from_fields(&fields),
        })
        .collect()
}

fn tool_calls_from_fields(fields: &Map<String, Value>) -> Vec<Value> {
    if let Some(Value::Array(calls)) = fields.get("tool_calls") {
        return calls.clone();
    }

    let mut calls: BTreeMap<usize, Map<String, Value>> = BTreeMap::new();
    for (key, value) in fields {
        let Some(rest) = key.strip_prefix("tool_calls.") else {
            continue;
        };
        if let Some((index, field)) = rest.split_once('.') {
            if let Ok(index) = index.parse::<usize>() {
                calls
                    .entry(index)
                    .or_default()
                    .insert(field.to_string(), value.clone());
            }
        }
    }
    calls.into_values().map(Value::Object).collect()
}

const TEXT_KEYS: [&str; 9] = [
    "query", "input", "question", "content", "value", "output", "response", "answer", "text",
];

/// Human-readable text of a normalized payload.
///
/// Prefers well-known text fields, then the last indexed message content,
/// then the payload rendered as JSON.
pub fn payload_text(payload: &Map<String, Value>) -> Option<String> {
    if payload.is_empty() {
        return None;
    }

    if let Some(text) = TEXT_KEYS
        .iter()
        .find_map(|key| payload.get(*key).and_then(value_text))
    {
        return Some(text);
    }

    for prefix in [crate::conventions::keys::COMPLETION_PREFIX, crate::conventions::keys::PROMPT_PREFIX] {
        if let Some(text) = indexed_messages(payload, prefix)
            .into_iter()
            .rev()
            .find_map(|m| m.content)
        {
            return Some(text);
        }
    }

    serde_json::to_string(payload).ok()
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(items) => items.iter().rev().find_map(|item| {
            item.get("content").and_then(value_text).or_else(|| value_text(item))
        }),
        _ => None,
    }
}
