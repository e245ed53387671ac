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

//! Typed span model
//!
//! A [`SpanEntity`] is produced once per raw span record by the parser and
//! is read-only afterwards.

use crate::conventions::ERROR_MARKERS;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Kind of work a span represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Llm,
    Tool,
    Agent,
    Workflow,
    Graph,
    Task,
}

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        EntityType::Llm,
        EntityType::Tool,
        EntityType::Agent,
        EntityType::Workflow,
        EntityType::Graph,
        EntityType::Task,
    ];

    const SUFFIXES: [(&'static str, EntityType); 6] = [
        (".chat", EntityType::Llm),
        (".tool", EntityType::Tool),
        (".agent", EntityType::Agent),
        (".workflow", EntityType::Workflow),
        (".graph", EntityType::Graph),
        (".task", EntityType::Task),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Tool => "tool",
            Self::Agent => "agent",
            Self::Workflow => "workflow",
            Self::Graph => "graph",
            Self::Task => "task",
        }
    }

    /// Classify a span by its name.
    ///
    /// Uses the `<name>.<kind>` suffix convention, with Autogen runtime
    /// spans (`autogen process ...`, `autogen create ...`) taking precedence.
    /// Returns `None` for names that match no known kind.
    pub fn from_span_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();

        if lower.contains("autogen process") {
            return Some(Self::Agent);
        }
        if lower.contains("autogen create") {
            return Some(Self::Workflow);
        }

        Self::SUFFIXES
            .iter()
            .find(|(suffix, _)| lower.ends_with(suffix))
            .map(|(_, kind)| *kind)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("unknown entity type: {}", s))
    }
}

/// Payload as found on the wire, before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Structured(Map<String, Value>),
    Raw(String),
}

impl Payload {
    /// Classify an attribute value
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Payload::Empty,
            Some(Value::Object(map)) => Payload::Structured(map.clone()),
            Some(Value::String(s)) => Payload::Raw(s.clone()),
            Some(other) => {
                let mut map = Map::new();
                map.insert("value".to_string(), other.clone());
                Payload::Structured(map)
            }
        }
    }

    /// Canonical mapping form of the payload
    pub fn normalize(self) -> Map<String, Value> {
        match self {
            Payload::Empty => Map::new(),
            Payload::Structured(map) => map,
            Payload::Raw(raw) => safe_parse_json(&raw),
        }
    }
}

/// Parse a payload string into a mapping.
///
/// A JSON object is returned as is, any other JSON value is wrapped as
/// `{"value": v}` and text that is not JSON is wrapped as `{"content": raw}`.
pub fn safe_parse_json(raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }

    let mut map = Map::new();
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(parsed)) => return parsed,
        Ok(other) => {
            map.insert("value".to_string(), other);
        }
        Err(_) => {
            map.insert("content".to_string(), Value::String(raw.to_string()));
        }
    }
    map
}

/// Whether any string inside the value contains a known error marker
pub fn contains_error_marker(value: &Value) -> bool {
    match value {
        Value::String(s) => {
            let lower = s.to_lowercase();
            ERROR_MARKERS.iter().any(|marker| lower.contains(marker))
        }
        Value::Array(items) => items.iter().any(contains_error_marker),
        Value::Object(map) => map.values().any(contains_error_marker),
        _ => false,
    }
}

/// Token counts reported by an LLM span
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Function definition advertised to an LLM and later invoked as a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Request/response details specific to LLM spans
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmDetails {
    pub request_model: Option<String>,
    pub response_model: Option<String>,
    pub temperature: Option<f64>,
    pub cache_read_tokens: Option<u64>,
}

/// One unit of execution work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEntity {
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub trace_id: String,
    pub session_id: Option<String>,
    pub app_name: String,
    pub entity_type: EntityType,
    pub entity_name: String,
    pub agent_id: Option<String>,

    pub input_payload: Map<String, Value>,
    pub output_payload: Map<String, Value>,
    pub message: Option<String>,
    pub tool_definition: Option<ToolDefinition>,

    /// Explicit error attribute or error marker in the output
    pub contains_error: bool,

    /// Raw timestamp string from the source record
    pub timestamp: Option<String>,
    /// Epoch milliseconds
    pub start_time: Option<f64>,
    /// Epoch milliseconds
    pub end_time: Option<f64>,
    pub duration_ms: f64,

    pub token_usage: Option<TokenUsage>,
    pub llm: Option<LlmDetails>,

    /// Flattened span attributes
    pub attributes: Map<String, Value>,
}

impl SpanEntity {
    /// Minimal span with empty payloads, mostly useful for tests and adapters
    pub fn new(span_id: impl Into<String>, entity_type: EntityType, entity_name: impl Into<String>) -> Self {
        Self {
            span_id: span_id.into(),
            parent_span_id: None,
            trace_id: String::new(),
            session_id: None,
            app_name: crate::conventions::UNKNOWN_APP.to_string(),
            entity_type,
            entity_name: entity_name.into(),
            agent_id: None,
            input_payload: Map::new(),
            output_payload: Map::new(),
            message: None,
            tool_definition: None,
            contains_error: false,
            timestamp: None,
            start_time: None,
            end_time: None,
            duration_ms: 0.0,
            token_usage: None,
            llm: None,
            attributes: Map::new(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_parent(mut self, parent_span_id: impl Into<String>) -> Self {
        self.parent_span_id = Some(parent_span_id.into());
        self
    }

    /// Set start time and duration, both in milliseconds
    pub fn with_timing(mut self, start_ms: f64, duration_ms: f64) -> Self {
        self.start_time = Some(start_ms);
        self.end_time = Some(start_ms + duration_ms);
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    pub fn is_type(&self, kind: EntityType) -> bool {
        self.entity_type == kind
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    pub fn has_input(&self) -> bool {
        !self.input_payload.is_empty()
    }

    pub fn has_output(&self) -> bool {
        !self.output_payload.is_empty()
    }

    /// Input payload rendered as compact JSON
    pub fn input_text(&self) -> String {
        render_payload(&self.input_payload)
    }

    /// Output payload rendered as compact JSON
    pub fn output_text(&self) -> String {
        render_payload(&self.output_payload)
    }

    /// Start time used for ordering; spans without one sort first
    pub fn sort_key(&self) -> f64 {
        self.start_time.unwrap_or(f64::NEG_INFINITY)
    }
}

fn render_payload(payload: &Map<String, Value>) -> String {
    if payload.is_empty() {
        return String::new();
    }
    serde_json::to_string(payload).unwrap_or_default()
}

/// Sort spans chronologically, keeping arrival order for ties
pub fn chronological<'a, I>(spans: I) -> Vec<&'a SpanEntity>
where
    I: IntoIterator<Item = &'a SpanEntity>,
{
    let mut ordered: Vec<&SpanEntity> = spans.into_iter().collect();
    ordered.sort_by(|a, b| a.sort_key().total_cmp(&b.sort_key()));
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_type_from_suffix() {
        assert_eq!(EntityType::from_span_name("openai.chat"), Some(EntityType::Llm));
        assert_eq!(EntityType::from_span_name("search.tool"), Some(EntityType::Tool));
        assert_eq!(EntityType::from_span_name("planner.agent"), Some(EntityType::Agent));
        assert_eq!(EntityType::from_span_name("root.workflow"), Some(EntityType::Workflow));
        assert_eq!(EntityType::from_span_name("lang.graph"), Some(EntityType::Graph));
        assert_eq!(EntityType::from_span_name("fetch.task"), Some(EntityType::Task));
        assert_eq!(EntityType::from_span_name("Planner.AGENT"), Some(EntityType::Agent));
        assert_eq!(EntityType::from_span_name("http.request"), None);
        assert_eq!(EntityType::from_span_name(""), None);
    }

    #[test]
    fn test_entity_type_autogen() {
        assert_eq!(
            EntityType::from_span_name("autogen process WebSurfer_01f4.(01f4)-A"),
            Some(EntityType::Agent)
        );
        assert_eq!(
            EntityType::from_span_name("autogen create group_topic_abc"),
            Some(EntityType::Workflow)
        );
    }

    #[test]
    fn test_entity_type_serde() {
        assert_eq!(serde_json::to_string(&EntityType::Llm).unwrap(), "\"llm\"");
        assert_eq!("Tool".parse::<EntityType>().unwrap(), EntityType::Tool);
        assert!("span".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_safe_parse_json() {
        assert_eq!(safe_parse_json(r#"{"a": 1}"#), json!({"a": 1}).as_object().unwrap().clone());
        assert_eq!(safe_parse_json("[1, 2]"), json!({"value": [1, 2]}).as_object().unwrap().clone());
        assert_eq!(
            safe_parse_json("plain text"),
            json!({"content": "plain text"}).as_object().unwrap().clone()
        );
        assert!(safe_parse_json("").is_empty());
    }

    #[test]
    fn test_payload_normalize() {
        assert!(Payload::from_value(None).normalize().is_empty());
        assert!(Payload::from_value(Some(&Value::Null)).normalize().is_empty());

        let structured = json!({"query": "weather"});
        assert_eq!(
            Payload::from_value(Some(&structured)).normalize(),
            structured.as_object().unwrap().clone()
        );

        let encoded = Value::String(r#"{"query": "weather"}"#.to_string());
        assert_eq!(
            Payload::from_value(Some(&encoded)).normalize(),
            structured.as_object().unwrap().clone()
        );

        let number = json!(42);
        assert_eq!(
            Payload::from_value(Some(&number)).normalize(),
            json!({"value": 42}).as_object().unwrap().clone()
        );
    }

    #[test]
    fn test_contains_error_marker() {
        assert!(contains_error_marker(&json!({"out": ["ok", {"msg": "Traceback (most recent call last)"}]})));
        assert!(contains_error_marker(&json!("requests.exceptions.HTTPError: 500")));
        assert!(!contains_error_marker(&json!({"out": "all good", "code": 500})));
    }

    #[test]
    fn test_chronological_is_stable() {
        let a = SpanEntity::new("a", EntityType::Agent, "x").with_timing(20.0, 1.0);
        let b = SpanEntity::new("b", EntityType::Agent, "x").with_timing(10.0, 1.0);
        let c = SpanEntity::new("c", EntityType::Agent, "x");
        let d = SpanEntity::new("d", EntityType::Agent, "x").with_timing(10.0, 5.0);
        let spans = vec![a, b, c, d];

        let ids: Vec<&str> = chronological(&spans).iter().map(|s| s.span_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "d", "a"]);
    }
}
