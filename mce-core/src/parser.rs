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

//! Raw span parsing
//!
//! Accepts flattened OpenTelemetry export rows and Jaeger JSON spans. Each
//! record is parsed independently; records that are malformed or whose name
//! matches no known entity kind are skipped, so the output is never longer
//! than the input.

use crate::conventions::{columns, jaeger, keys, UNKNOWN_APP, UNKNOWN_ENTITY};
use crate::error::{ParseError, ParseResult};
use crate::span::{
    contains_error_marker, EntityType, LlmDetails, Payload, SpanEntity, TokenUsage,
    ToolDefinition,
};
use chrono::DateTime;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Parse a batch of raw span records.
///
/// Never fails: malformed records are logged and skipped, and records whose
/// name does not identify an entity kind are filtered out.
pub fn parse_raw_spans(raw_spans: &[Value]) -> Vec<SpanEntity> {
    let records: Vec<SpanRecord> = raw_spans
        .iter()
        .enumerate()
        .filter_map(|(index, raw)| match SpanRecord::from_raw(raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(index, error = %e, "Skipping malformed span record");
                None
            }
        })
        .collect();

    let tool_definitions = collect_tool_definitions(&records);

    let spans: Vec<SpanEntity> = records
        .iter()
        .filter_map(|record| match parse_record(record, &tool_definitions) {
            Ok(Some(span)) => Some(span),
            Ok(None) => {
                debug!(name = %record.name, "Ignoring span with unrecognized entity kind");
                None
            }
            Err(e) => {
                warn!(name = %record.name, error = %e, "Skipping span that failed to parse");
                None
            }
        })
        .collect();

    debug!(input = raw_spans.len(), parsed = spans.len(), "Parsed raw spans");
    spans
}

/// Raw record normalized to the flattened export layout
#[derive(Debug)]
struct SpanRecord {
    name: String,
    kind: Option<EntityType>,
    fields: Map<String, Value>,
    attributes: Map<String, Value>,
    resource: Map<String, Value>,
}

impl SpanRecord {
    fn from_raw(raw: &Value) -> ParseResult<Self> {
        let object = raw.as_object().ok_or(ParseError::NotAnObject)?;

        let fields = if is_jaeger(object) {
            convert_jaeger(object)
        } else {
            object.clone()
        };

        let name = fields
            .get(columns::SPAN_NAME)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ParseError::MissingField(columns::SPAN_NAME))?;

        let attributes = flatten_attributes(fields.get(columns::SPAN_ATTRIBUTES))?;
        let resource = flatten_attributes(fields.get(columns::RESOURCE_ATTRIBUTES))?;

        Ok(Self {
            kind: EntityType::from_span_name(&name),
            name,
            fields,
            attributes,
            resource,
        })
    }

    fn field_string(&self, key: &str) -> Option<String> {
        self.fields.get(key).and_then(scalar_to_string)
    }

    fn attr_string(&self, key: &str) -> Option<String> {
        self.attributes.get(key).and_then(scalar_to_string)
    }
}

fn is_jaeger(object: &Map<String, Value>) -> bool {
    object.contains_key(jaeger::OPERATION_NAME)
        && object.contains_key(jaeger::TAGS)
        && !object.contains_key(columns::SPAN_NAME)
}

/// Map a Jaeger span onto the flattened export layout
fn convert_jaeger(span: &Map<String, Value>) -> Map<String, Value> {
    let mut converted = span.clone();

    if let Some(name) = span.get(jaeger::OPERATION_NAME) {
        converted.insert(columns::SPAN_NAME.to_string(), name.clone());
    }

    let mut attributes = jaeger_tags(span.get(jaeger::TAGS));
    if !attributes.contains_key(keys::SESSION_ID) && !attributes.contains_key(keys::EXECUTION_ID) {
        if let Some(trace_id) = span.get(jaeger::TRACE_ID) {
            attributes.insert(keys::SESSION_ID.to_string(), trace_id.clone());
        }
    }

    for (from, to) in [
        (jaeger::SERVICE_NAME, columns::SERVICE_NAME),
        (jaeger::SPAN_ID, columns::SPAN_ID),
        (jaeger::PARENT_ID, columns::PARENT_SPAN_ID),
        (jaeger::TRACE_ID, columns::TRACE_ID),
    ] {
        if let Some(value) = span.get(from) {
            converted.insert(to.to_string(), value.clone());
        }
    }

    if let Some(start) = span.get(jaeger::START_TIME) {
        converted.insert(columns::TIMESTAMP.to_string(), start.clone());
        let seconds = match start {
            Value::String(s) => parse_iso_millis(s)
                .or_else(|| s.trim().parse::<f64>().ok().map(epoch_to_millis)),
            Value::Number(n) => n.as_f64().map(epoch_to_millis),
            _ => None,
        }
        .map(|ms| ms / 1000.0);
        if let Some(seconds) = seconds {
            attributes.insert(
                keys::START_TIME.to_string(),
                Value::String(seconds.to_string()),
            );
        }
    }

    if let Some(micros) = span.get(jaeger::DURATION_MICROS).and_then(value_as_f64) {
        converted.insert(columns::DURATION.to_string(), Value::from(micros * 1000.0));
    }

    converted.insert(columns::SPAN_ATTRIBUTES.to_string(), Value::Object(attributes));
    converted
}

/// Jaeger tags arrive either as a mapping or as `[{key, value}]`
fn jaeger_tags(tags: Option<&Value>) -> Map<String, Value> {
    match tags {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let key = item.get("key")?.as_str()?;
                let value = item.get("value").cloned().unwrap_or(Value::Null);
                Some((key.to_string(), value))
            })
            .collect(),
        _ => Map::new(),
    }
}

/// Flatten an attribute bag into dotted keys.
///
/// The bag may be a mapping or a JSON-encoded mapping; arrays are kept as
/// values.
fn flatten_attributes(value: Option<&Value>) -> ParseResult<Map<String, Value>> {
    let mut flat = Map::new();
    match value {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => flatten_into(&mut flat, None, map),
        Some(Value::String(encoded)) => {
            if !encoded.trim().is_empty() {
                match serde_json::from_str::<Value>(encoded) {
                    Ok(Value::Object(map)) => flatten_into(&mut flat, None, &map),
                    _ => {
                        return Err(ParseError::InvalidField {
                            field: columns::SPAN_ATTRIBUTES,
                            reason: "expected a JSON object".to_string(),
                        })
                    }
                }
            }
        }
        Some(_) => {
            return Err(ParseError::InvalidField {
                field: columns::SPAN_ATTRIBUTES,
                reason: "expected an object".to_string(),
            })
        }
    }
    Ok(flat)
}

fn flatten_into(out: &mut Map<String, Value>, prefix: Option<&str>, map: &Map<String, Value>) {
    for (key, value) in map {
        let full_key = match prefix {
            Some(prefix) => format!("{}.{}", prefix, key),
            None => key.clone(),
        };
        match value {
            Value::Object(nested) if !nested.is_empty() => flatten_into(out, Some(&full_key), nested),
            Value::Null => {}
            _ => {
                out.insert(full_key, value.clone());
            }
        }
    }
}

/// Value stored at `key`, or the entries below `key.` gathered into a mapping
fn lookup_payload(attributes: &Map<String, Value>, key: &str) -> Option<Value> {
    if let Some(value) = attributes.get(key) {
        return Some(value.clone());
    }

    let prefix = format!("{}.", key);
    let nested: Map<String, Value> = attributes
        .iter()
        .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|rest| (rest.to_string(), v.clone())))
        .collect();

    (!nested.is_empty()).then_some(Value::Object(nested))
}

fn parse_record(
    record: &SpanRecord,
    tool_definitions: &HashMap<String, ToolDefinition>,
) -> ParseResult<Option<SpanEntity>> {
    let Some(kind) = record.kind else {
        return Ok(None);
    };

    let span_id = record
        .field_string(columns::SPAN_ID)
        .filter(|id| !id.is_empty())
        .ok_or(ParseError::MissingField(columns::SPAN_ID))?;
    let parent_span_id = record
        .field_string(columns::PARENT_SPAN_ID)
        .filter(|id| !id.is_empty());
    let trace_id = record.field_string(columns::TRACE_ID).unwrap_or_default();

    let entity_name = resolve_entity_name(kind, record);

    let (input_payload, output_payload) = match kind {
        EntityType::Llm => llm_payloads(&record.attributes),
        EntityType::Agent => (
            Payload::from_value(lookup_payload(&record.attributes, keys::AGENT_INPUT).as_ref())
                .normalize(),
            Payload::from_value(lookup_payload(&record.attributes, keys::AGENT_OUTPUT).as_ref())
                .normalize(),
        ),
        _ => (
            Payload::from_value(lookup_payload(&record.attributes, keys::ENTITY_INPUT).as_ref())
                .normalize(),
            Payload::from_value(lookup_payload(&record.attributes, keys::ENTITY_OUTPUT).as_ref())
                .normalize(),
        ),
    };

    let timing = resolve_timing(record)?;
    let contains_error = explicit_error(record)
        || contains_error_marker(&Value::Object(output_payload.clone()));

    let tool_definition = match kind {
        EntityType::Tool => tool_definitions.get(&entity_name).cloned(),
        _ => None,
    };

    let (token_usage, llm) = match kind {
        EntityType::Llm => (token_usage(&record.attributes), Some(llm_details(record))),
        _ => (None, None),
    };

    Ok(Some(SpanEntity {
        span_id,
        parent_span_id,
        trace_id,
        session_id: record
            .attr_string(keys::SESSION_ID)
            .or_else(|| record.attr_string(keys::EXECUTION_ID))
            .filter(|id| !id.is_empty()),
        app_name: resolve_app_name(record),
        entity_type: kind,
        entity_name,
        agent_id: record.attr_string(keys::AGENT_ID),
        input_payload,
        output_payload,
        message: record.attr_string(keys::ENTITY_MESSAGE),
        tool_definition,
        contains_error,
        timestamp: record.field_string(columns::TIMESTAMP),
        start_time: timing.start_ms,
        end_time: timing.end_ms,
        duration_ms: timing.duration_ms,
        token_usage,
        llm,
        attributes: record.attributes.clone(),
    }))
}

fn resolve_entity_name(kind: EntityType, record: &SpanRecord) -> String {
    let from_attrs = match kind {
        EntityType::Llm => record
            .attr_string(keys::RESPONSE_MODEL)
            .or_else(|| record.attr_string(keys::REQUEST_MODEL)),
        EntityType::Tool | EntityType::Task => record.attr_string(keys::ENTITY_NAME),
        EntityType::Agent => record
            .attr_string(keys::AGENT_NAME)
            .or_else(|| autogen_agent_name(&record.name)),
        EntityType::Workflow | EntityType::Graph => record.attr_string(keys::WORKFLOW_NAME),
    };

    from_attrs
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_ENTITY.to_string())
}

/// Agent name embedded in an Autogen span name.
///
/// `autogen process WebSurfer_01f4-66dd.(01f4)-A` yields `WebSurfer`: the
/// leading word run up to its last underscore.
fn autogen_agent_name(span_name: &str) -> Option<String> {
    const MARKER: &str = "autogen process ";
    // ASCII lowercasing keeps byte offsets, so the match indexes the original
    let start = span_name.to_ascii_lowercase().find(MARKER)? + MARKER.len();
    let rest = &span_name[start..];

    let word: &str = rest
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .next()
        .unwrap_or_default();

    let name = match word.rfind('_') {
        Some(pos) if pos > 0 => &word[..pos],
        _ => rest.split('_').next().unwrap_or_default(),
    };

    (!name.is_empty()).then(|| name.to_string())
}

/// LLM prompt keys form the input, completion keys the output.
///
/// Completion values holding encoded JSON objects or arrays are decoded.
fn llm_payloads(attributes: &Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut input = Map::new();
    let mut output = Map::new();

    for (key, value) in attributes {
        if key.starts_with(keys::PROMPT_PREFIX) {
            input.insert(key.clone(), value.clone());
        } else if key.starts_with(keys::COMPLETION_PREFIX) {
            let decoded = match value {
                Value::String(s) => match serde_json::from_str::<Value>(s) {
                    Ok(parsed @ (Value::Object(_) | Value::Array(_))) => parsed,
                    _ => value.clone(),
                },
                _ => value.clone(),
            };
            output.insert(key.clone(), decoded);
        }
    }

    (input, output)
}

fn token_usage(attributes: &Map<String, Value>) -> Option<TokenUsage> {
    let first = |candidates: &[&str]| {
        candidates
            .iter()
            .find_map(|key| attributes.get(*key).and_then(value_as_f64))
            .map(|v| v.max(0.0) as u64)
    };

    let prompt = first(&[keys::PROMPT_TOKENS, keys::INPUT_TOKENS]);
    let completion = first(&[keys::COMPLETION_TOKENS, keys::OUTPUT_TOKENS]);
    let total = first(&[keys::LLM_TOTAL_TOKENS, keys::GEN_AI_TOTAL_TOKENS]);

    if prompt.is_none() && completion.is_none() && total.is_none() {
        return None;
    }

    let prompt_tokens = prompt.unwrap_or(0);
    let completion_tokens = completion.unwrap_or(0);
    Some(TokenUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: total.unwrap_or(prompt_tokens + completion_tokens),
    })
}

fn llm_details(record: &SpanRecord) -> LlmDetails {
    LlmDetails {
        request_model: record.attr_string(keys::REQUEST_MODEL),
        response_model: record.attr_string(keys::RESPONSE_MODEL),
        temperature: record.attributes.get(keys::TEMPERATURE).and_then(value_as_f64),
        cache_read_tokens: record
            .attributes
            .get(keys::CACHE_READ_TOKENS)
            .and_then(value_as_f64)
            .map(|v| v.max(0.0) as u64),
    }
}

fn resolve_app_name(record: &SpanRecord) -> String {
    let known = |name: Option<String>| name.filter(|n| !n.is_empty() && n != "unknown");

    if let Some(name) = known(record.field_string(columns::SERVICE_NAME)) {
        return name;
    }
    if let Some(name) = known(record.resource.get(keys::SERVICE_NAME).and_then(scalar_to_string)) {
        return name;
    }

    [
        keys::APP_NAME,
        keys::SERVICE_NAME,
        keys::APPLICATION_NAME,
        keys::TRACELOOP_WORKFLOW_NAME,
        keys::IOA_WORKFLOW_NAME,
    ]
    .iter()
    .find_map(|key| record.attr_string(key).filter(|n| !n.is_empty()))
    .unwrap_or_else(|| UNKNOWN_APP.to_string())
}

fn explicit_error(record: &SpanRecord) -> bool {
    let flagged = record
        .attributes
        .get(keys::ENTITY_ERROR)
        .map(is_truthy)
        .unwrap_or(false);

    let status_error = record
        .field_string(columns::STATUS_CODE)
        .map(|code| code.to_ascii_lowercase().contains("error"))
        .unwrap_or(false);

    flagged || status_error
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Value::String(s) => {
            let s = s.trim();
            !(s.is_empty()
                || s.eq_ignore_ascii_case("false")
                || s.eq_ignore_ascii_case("none")
                || s.eq_ignore_ascii_case("null")
                || s == "0")
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[derive(Debug, Default)]
struct Timing {
    start_ms: Option<f64>,
    end_ms: Option<f64>,
    duration_ms: f64,
}

/// Start from `ioa_start_time` (epoch seconds) or `Timestamp`; duration from
/// `Duration` (nanoseconds) or the end timestamp.
fn resolve_timing(record: &SpanRecord) -> ParseResult<Timing> {
    let start_ms = match record.attributes.get(keys::START_TIME) {
        Some(value) => Some(value_as_f64(value).map(|s| s * 1000.0).ok_or_else(|| {
            ParseError::InvalidField {
                field: keys::START_TIME,
                reason: format!("not a number: {}", value),
            }
        })?),
        None => record.fields.get(columns::TIMESTAMP).and_then(timestamp_millis),
    };

    let explicit_ms = record
        .fields
        .get(columns::DURATION)
        .and_then(value_as_f64)
        .map(|ns| ns / 1e6);
    let end_field_ms = record
        .fields
        .get(columns::END_TIMESTAMP)
        .and_then(timestamp_millis);

    let (end_ms, duration_ms) = match (start_ms, explicit_ms, end_field_ms) {
        (Some(start), Some(duration), _) => (Some(start + duration), duration),
        (None, Some(duration), end) => (end, duration),
        (Some(start), None, Some(end)) => (Some(end), (end - start).max(0.0)),
        (_, None, end) => (end, 0.0),
    };

    Ok(Timing {
        start_ms,
        end_ms,
        duration_ms,
    })
}

/// Epoch milliseconds from an ISO-8601 string or a numeric epoch value
fn timestamp_millis(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => parse_iso_millis(s).or_else(|| s.trim().parse::<f64>().ok().map(epoch_to_millis)),
        Value::Number(n) => n.as_f64().map(epoch_to_millis),
        _ => None,
    }
}

fn parse_iso_millis(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_micros() as f64 / 1000.0);
    }
    // Exports without an offset are UTC
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc().timestamp_micros() as f64 / 1000.0)
}

/// Scale a numeric epoch value to milliseconds by magnitude
fn epoch_to_millis(value: f64) -> f64 {
    if value >= 1e17 {
        value / 1e6 // nanoseconds
    } else if value >= 1e14 {
        value / 1e3 // microseconds
    } else if value >= 1e11 {
        value // milliseconds
    } else {
        value * 1e3 // seconds
    }
}

/// First-seen tool definition per name, harvested from LLM request functions
fn collect_tool_definitions(records: &[SpanRecord]) -> HashMap<String, ToolDefinition> {
    let mut definitions = HashMap::new();

    for record in records.iter().filter(|r| r.kind == Some(EntityType::Llm)) {
        for definition in request_functions(&record.attributes) {
            definitions
                .entry(definition.name.clone())
                .or_insert(definition);
        }
    }

    definitions
}

fn request_functions(attributes: &Map<String, Value>) -> Vec<ToolDefinition> {
    if let Some(Value::Array(items)) = attributes.get(keys::REQUEST_FUNCTIONS_PREFIX) {
        return items
            .iter()
            .filter_map(|item| {
                let object = item.as_object()?;
                tool_definition(
                    object.get("name"),
                    object.get("description"),
                    object.get("parameters"),
                )
            })
            .collect();
    }

    let mut definitions = Vec::new();
    for index in 0.. {
        let prefix = format!("{}.{}", keys::REQUEST_FUNCTIONS_PREFIX, index);
        let name = attributes.get(&format!("{}.name", prefix));
        if name.is_none() {
            break;
        }
        let parameters = lookup_payload(attributes, &format!("{}.parameters", prefix));
        if let Some(definition) = tool_definition(
            name,
            attributes.get(&format!("{}.description", prefix)),
            parameters.as_ref(),
        ) {
            definitions.push(definition);
        }
    }
    definitions
}

fn tool_definition(
    name: Option<&Value>,
    description: Option<&Value>,
    parameters: Option<&Value>,
) -> Option<ToolDefinition> {
    let name = name.and_then(scalar_to_string).filter(|n| !n.is_empty())?;
    let parameters = match parameters {
        Some(Value::String(encoded)) => {
            serde_json::from_str(encoded).unwrap_or_else(|_| Value::String(encoded.clone()))
        }
        Some(other) => other.clone(),
        None => Value::Null,
    };

    Some(ToolDefinition {
        name,
        description: description.and_then(scalar_to_string).unwrap_or_default(),
        parameters,
    })
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn standard_span(name: &str, span_id: &str, attributes: Value) -> Value {
        json!({
            "SpanName": name,
            "SpanId": span_id,
            "ParentSpanId": "",
            "TraceId": "trace-1",
            "ServiceName": "travel-app",
            "Timestamp": "2024-05-01T10:00:00Z",
            "Duration": 2_500_000_000u64,
            "SpanAttributes": attributes,
        })
    }

    #[test]
    fn test_parse_tool_span() {
        let raw = vec![standard_span(
            "get_weather.tool",
            "s1",
            json!({
                "session.id": "sess-1",
                "traceloop.entity.name": "get_weather",
                "traceloop.entity.input": "{\"city\": \"Paris\"}",
                "traceloop.entity.output": "sunny",
                "ioa_start_time": "1714557600.5",
            }),
        )];

        let spans = parse_raw_spans(&raw);
        assert_eq!(spans.len(), 1);

        let span = &spans[0];
        assert_eq!(span.entity_type, EntityType::Tool);
        assert_eq!(span.entity_name, "get_weather");
        assert_eq!(span.session_id.as_deref(), Some("sess-1"));
        assert_eq!(span.app_name, "travel-app");
        assert!(span.parent_span_id.is_none());
        assert_eq!(span.input_payload, json!({"city": "Paris"}).as_object().unwrap().clone());
        assert_eq!(span.output_payload, json!({"content": "sunny"}).as_object().unwrap().clone());
        assert_eq!(span.start_time, Some(1_714_557_600_500.0));
        assert_eq!(span.duration_ms, 2500.0);
        assert_eq!(span.end_time, Some(1_714_557_603_000.0));
        assert!(!span.contains_error);
    }

    #[test]
    fn test_unknown_kind_is_filtered() {
        let raw = vec![
            standard_span("http.request", "s1", json!({})),
            standard_span("planner.agent", "s2", json!({"ioa_observe.entity.name": "planner"})),
        ];

        let spans = parse_raw_spans(&raw);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].entity_name, "planner");
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let raw = vec![
            json!("not an object"),
            json!({"SpanId": "no-name"}),
            json!({"SpanName": "x.tool"}),
            json!({"SpanName": "x.tool", "SpanId": "s1", "SpanAttributes": 12}),
            standard_span("ok.tool", "s2", json!({})),
        ];

        let spans = parse_raw_spans(&raw);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].span_id, "s2");
        assert_eq!(spans[0].entity_name, "unknown");
    }

    #[test]
    fn test_llm_span_payloads_and_usage() {
        let raw = vec![standard_span(
            "openai.chat",
            "llm-1",
            json!({
                "gen_ai.request.model": "gpt-4o",
                "gen_ai.response.model": "gpt-4o-2024-08-06",
                "gen_ai.request.temperature": 0.2,
                "gen_ai.prompt.0.role": "user",
                "gen_ai.prompt.0.content": "Weather in Paris?",
                "gen_ai.completion.0.role": "assistant",
                "gen_ai.completion.0.tool_calls": "[{\"name\": \"get_weather\"}]",
                "gen_ai.usage.prompt_tokens": 12,
                "gen_ai.usage.completion_tokens": "8",
            }),
        )];

        let spans = parse_raw_spans(&raw);
        let span = &spans[0];
        assert_eq!(span.entity_type, EntityType::Llm);
        assert_eq!(span.entity_name, "gpt-4o-2024-08-06");
        assert_eq!(span.input_payload["gen_ai.prompt.0.content"], "Weather in Paris?");
        assert_eq!(
            span.output_payload["gen_ai.completion.0.tool_calls"],
            json!([{"name": "get_weather"}])
        );
        assert_eq!(
            span.token_usage,
            Some(TokenUsage {
                prompt_tokens: 12,
                completion_tokens: 8,
                total_tokens: 20
            })
        );
        let llm = span.llm.as_ref().unwrap();
        assert_eq!(llm.request_model.as_deref(), Some("gpt-4o"));
        assert_eq!(llm.temperature, Some(0.2));
    }

    #[test]
    fn test_nested_attributes_are_flattened() {
        let raw = vec![standard_span(
            "lookup.tool",
            "s1",
            json!({
                "session": {"id": "sess-9"},
                "traceloop": {"entity": {"name": "lookup", "input": {"q": "x"}}},
            }),
        )];

        let spans = parse_raw_spans(&raw);
        assert_eq!(spans[0].session_id.as_deref(), Some("sess-9"));
        assert_eq!(spans[0].entity_name, "lookup");
        assert_eq!(spans[0].input_payload, json!({"q": "x"}).as_object().unwrap().clone());
    }

    #[test]
    fn test_encoded_attribute_bag() {
        let raw = vec![json!({
            "SpanName": "a.agent",
            "SpanId": "s1",
            "SpanAttributes": "{\"ioa_observe.entity.name\": \"router\", \"execution.id\": \"exec-1\"}",
        })];

        let spans = parse_raw_spans(&raw);
        assert_eq!(spans[0].entity_name, "router");
        assert_eq!(spans[0].session_id.as_deref(), Some("exec-1"));
    }

    #[test]
    fn test_error_detection() {
        let raw = vec![
            standard_span("a.tool", "flag", json!({"traceloop.entity.error": "boom"})),
            standard_span(
                "b.tool",
                "marker",
                json!({"traceloop.entity.output": "{\"msg\": \"HTTPError: 503\"}"}),
            ),
            json!({"SpanName": "c.tool", "SpanId": "status", "StatusCode": "STATUS_CODE_ERROR"}),
            standard_span("d.tool", "clean", json!({"traceloop.entity.error": "false"})),
        ];

        let spans = parse_raw_spans(&raw);
        let errors: Vec<(&str, bool)> = spans
            .iter()
            .map(|s| (s.span_id.as_str(), s.contains_error))
            .collect();
        assert_eq!(
            errors,
            vec![("flag", true), ("marker", true), ("status", true), ("clean", false)]
        );
    }

    #[test]
    fn test_timing_without_duration() {
        let raw = vec![json!({
            "SpanName": "x.task",
            "SpanId": "s1",
            "Timestamp": "2024-05-01T10:00:00Z",
            "EndTimestamp": "2024-05-01T10:00:01.250Z",
        })];
        let spans = parse_raw_spans(&raw);
        assert_eq!(spans[0].duration_ms, 1250.0);

        let raw = vec![json!({"SpanName": "x.task", "SpanId": "s2"})];
        let spans = parse_raw_spans(&raw);
        assert_eq!(spans[0].duration_ms, 0.0);
        assert!(spans[0].start_time.is_none());
    }

    #[test]
    fn test_numeric_timestamp_is_nanoseconds() {
        let raw = vec![json!({
            "SpanName": "x.task",
            "SpanId": "s1",
            "Timestamp": 1_714_557_600_000_000_000u64,
            "Duration": 1_000_000u64,
        })];
        let spans = parse_raw_spans(&raw);
        assert_eq!(spans[0].start_time, Some(1_714_557_600_000.0));
        assert_eq!(spans[0].end_time, Some(1_714_557_600_001.0));
    }

    #[test]
    fn test_jaeger_span() {
        let raw = vec![json!({
            "operationName": "planner.agent",
            "traceID": "ignored",
            "traceId": "jaeger-trace",
            "spanId": "j1",
            "parentId": "j0",
            "serviceName": "jaeger-app",
            "startTime": "2024-05-01T10:00:00Z",
            "durationMicros": 1500,
            "tags": [
                {"key": "ioa_observe.entity.name", "value": "planner"},
                {"key": "ioa_observe.entity.output", "value": "done"}
            ],
        })];

        let spans = parse_raw_spans(&raw);
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.entity_type, EntityType::Agent);
        assert_eq!(span.entity_name, "planner");
        assert_eq!(span.session_id.as_deref(), Some("jaeger-trace"));
        assert_eq!(span.parent_span_id.as_deref(), Some("j0"));
        assert_eq!(span.app_name, "jaeger-app");
        assert_eq!(span.start_time, Some(1_714_557_600_000.0));
        assert_eq!(span.duration_ms, 1.5);
    }

    #[test]
    fn test_autogen_agent_name() {
        assert_eq!(
            autogen_agent_name(
                "autogen process MultimodalWebSurfer_01f41b74-66dd-4438.(01f41b74)-A"
            )
            .as_deref(),
            Some("MultimodalWebSurfer")
        );
        assert_eq!(
            autogen_agent_name("autogen process Coder_agent_9f2c-77").as_deref(),
            Some("Coder_agent")
        );
        assert_eq!(autogen_agent_name("autogen process Planner").as_deref(), Some("Planner"));
        assert_eq!(autogen_agent_name("other span"), None);
        assert_eq!(
            autogen_agent_name("AutoGen Process WebSurfer_01f4-66dd.(01f4)-A").as_deref(),
            Some("WebSurfer")
        );

        let raw = vec![standard_span(
            "autogen process WebSurfer_01f4-66dd.(01f4)-A",
            "s1",
            json!({}),
        )];
        let spans = parse_raw_spans(&raw);
        assert_eq!(spans[0].entity_type, EntityType::Agent);
        assert_eq!(spans[0].entity_name, "WebSurfer");
    }

    #[test]
    fn test_tool_definitions_attached() {
        let raw = vec![
            standard_span(
                "openai.chat",
                "llm-1",
                json!({
                    "llm.request.functions.0.name": "get_weather",
                    "llm.request.functions.0.description": "Current weather",
                    "llm.request.functions.0.parameters": "{\"type\": \"object\"}",
                    "llm.request.functions.1.name": "get_time",
                }),
            ),
            standard_span(
                "get_weather.tool",
                "tool-1",
                json!({"traceloop.entity.name": "get_weather"}),
            ),
            standard_span("other.tool", "tool-2", json!({"traceloop.entity.name": "other"})),
        ];

        let spans = parse_raw_spans(&raw);
        let weather = spans.iter().find(|s| s.span_id == "tool-1").unwrap();
        let definition = weather.tool_definition.as_ref().unwrap();
        assert_eq!(definition.description, "Current weather");
        assert_eq!(definition.parameters, json!({"type": "object"}));

        let other = spans.iter().find(|s| s.span_id == "tool-2").unwrap();
        assert!(other.tool_definition.is_none());
    }

    #[test]
    fn test_app_name_resolution() {
        let raw = vec![
            json!({
                "SpanName": "a.tool", "SpanId": "1", "ServiceName": "unknown",
                "ResourceAttributes": {"service.name": "from-resource"},
            }),
            json!({
                "SpanName": "a.tool", "SpanId": "2",
                "SpanAttributes": {"traceloop.workflow.name": "from-workflow"},
            }),
            json!({"SpanName": "a.tool", "SpanId": "3"}),
        ];

        let names: Vec<String> = parse_raw_spans(&raw).into_iter().map(|s| s.app_name).collect();
        assert_eq!(names, vec!["from-resource", "from-workflow", "unknown-app"]);
    }

    #[test]
    fn test_json_payload_round_trip() {
        let payload = json!({"query": "flights", "filters": {"max_price": 300, "stops": [0, 1]}});
        let raw = vec![standard_span(
            "search.tool",
            "s1",
            json!({"traceloop.entity.input": payload.to_string()}),
        )];

        let spans = parse_raw_spans(&raw);
        let reserialized: Value =
            serde_json::from_str(&serde_json::to_string(&spans[0].input_payload).unwrap()).unwrap();
        assert_eq!(reserialized, payload);
    }

    fn arb_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-z{}\":. ]{0,12}".prop_map(Value::from),
        ]
    }

    fn arb_record() -> impl Strategy<Value = Value> {
        let name = prop_oneof![
            Just("a.chat".to_string()),
            Just("b.tool".to_string()),
            Just("c.agent".to_string()),
            Just("d.workflow".to_string()),
            Just("e.graph".to_string()),
            Just("f.task".to_string()),
            "[a-z.]{0,10}",
        ];
        (
            name,
            proptest::option::of("[a-z0-9]{0,6}"),
            proptest::collection::btree_map("[a-z_.]{1,12}", arb_leaf(), 0..6),
            arb_leaf(),
            arb_leaf(),
        )
            .prop_map(|(name, span_id, attrs, timestamp, duration)| {
                let mut record = json!({
                    "SpanName": name,
                    "SpanAttributes": attrs,
                    "Timestamp": timestamp,
                    "Duration": duration,
                });
                if let Some(id) = span_id {
                    record["SpanId"] = Value::from(id);
                }
                record
            })
    }

    proptest! {
        #[test]
        fn prop_parse_is_total_and_bounded(records in proptest::collection::vec(
            prop_oneof![arb_record(), arb_leaf()], 0..20)
        ) {
            let spans = parse_raw_spans(&records);
            prop_assert!(spans.len() <= records.len());
            for span in &spans {
                prop_assert!(EntityType::ALL.contains(&span.entity_type));
                prop_assert!(span.duration_ms.is_finite());
            }
        }
    }
}
