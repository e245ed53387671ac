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

//! Integration tests: raw spans through sessions to metric results

use async_trait::async_trait;
use mce_core::enrichment::{attribute_keys, ExecutionTree};
use mce_core::{parse_raw_spans, AggregationLevel, BatchConfig, MetricResult, MetricValue, TraceProcessor};
use mce_engine::config::LLMJudgeConfig;
use mce_engine::llm_client::{JudgeClientFactory, TokenUsage};
use mce_engine::{
    EngineConfig, InMemorySource, JsonFileSource, LLMClient, LLMError, LLMResponse, Metric, MetricContext,
    MetricError, MetricInput, MetricsConfigRequest, MetricsEngine,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

const DAY_SECS: f64 = 86_400.0;
const JAN_2024_SECS: f64 = 1_704_067_200.0;

struct SpanShape<'a> {
    kind: &'a str,
    id: String,
    parent: Option<String>,
    session: String,
    name: &'a str,
    start_secs: f64,
}

fn raw_span(shape: SpanShape<'_>, extra: Value) -> Value {
    let mut attributes = json!({
        "session.id": &shape.session,
        "ioa_start_time": shape.start_secs,
    });
    let name_key = match shape.kind {
        "agent" => "ioa_observe.entity.name",
        "workflow" => "ioa_observe.workflow.name",
        "chat" => "gen_ai.response.model",
        _ => "traceloop.entity.name",
    };
    attributes[name_key] = json!(shape.name);
    if let (Some(attrs), Some(extra)) = (attributes.as_object_mut(), extra.as_object()) {
        attrs.extend(extra.clone());
    }

    let span_name = match shape.kind {
        "chat" => "openai.chat".to_string(),
        kind => format!("{}.{}", shape.name, kind),
    };
    json!({
        "SpanName": span_name,
        "SpanId": shape.id,
        "ParentSpanId": shape.parent.unwrap_or_default(),
        "TraceId": format!("trace-{}", shape.session),
        "ServiceName": "travel-planner",
        "Duration": 500_000_000u64,
        "SpanAttributes": attributes,
    })
}

/// One production-like session: workflow root, agents under it, tools and
/// an LLM call under each agent
fn production_session(session: &str, agents: &[&str], tools_per_agent: usize, start_secs: f64) -> Vec<Value> {
    let mut spans = Vec::new();
    let mut clock = start_secs;
    let mut tick = || {
        clock += 1.0;
        clock
    };

    let root = format!("{}-root", session);
    spans.push(raw_span(
        SpanShape {
            kind: "workflow",
            id: root.clone(),
            parent: None,
            session: session.to_string(),
            name: "trip_planning",
            start_secs: tick(),
        },
        json!({"traceloop.entity.input": "{\"query\": \"Plan a weekend in Lisbon\"}"}),
    ));

    for (a, agent) in agents.iter().enumerate() {
        let agent_id = format!("{}-agent{}", session, a);
        spans.push(raw_span(
            SpanShape {
                kind: "agent",
                id: agent_id.clone(),
                parent: Some(root.clone()),
                session: session.to_string(),
                name: agent,
                start_secs: tick(),
            },
            json!({
                "ioa_observe.entity.input": "{\"content\": \"weekend in Lisbon\"}",
                "ioa_observe.entity.output": "{\"content\": \"Found options\"}",
            }),
        ));
        spans.push(raw_span(
            SpanShape {
                kind: "chat",
                id: format!("{}-llm{}", session, a),
                parent: Some(agent_id.clone()),
                session: session.to_string(),
                name: "gpt-4o",
                start_secs: tick(),
            },
            json!({
                "gen_ai.prompt.0.role": "user",
                "gen_ai.prompt.0.content": "Find hotels in Lisbon",
                "gen_ai.completion.0.content": "Here are three hotels",
                "gen_ai.usage.prompt_tokens": 40,
                "gen_ai.usage.completion_tokens": 12,
            }),
        ));
        for t in 0..tools_per_agent {
            spans.push(raw_span(
                SpanShape {
                    kind: "tool",
                    id: format!("{}-agent{}-tool{}", session, a, t),
                    parent: Some(agent_id.clone()),
                    session: session.to_string(),
                    name: if t % 2 == 0 { "hotel_search" } else { "weather" },
                    start_secs: tick(),
                },
                json!({
                    "ioa_observe.workflow.name": agent,
                    "traceloop.entity.input": "{\"city\": \"Lisbon\"}",
                    "traceloop.entity.output": "{\"status\": \"success\", \"items\": 3}",
                }),
            ));
        }
    }
    spans
}

fn production_batch() -> Vec<Value> {
    let mut spans = Vec::new();
    for s in 0..6 {
        spans.extend(production_session(
            &format!("prod-{}", s),
            &["planner", "booker", "planner"],
            2,
            JAN_2024_SECS + s as f64 * DAY_SECS,
        ));
    }
    spans.extend(production_session("prod-6", &["concierge"], 2, JAN_2024_SECS + 6.0 * DAY_SECS));
    spans
}

fn request(metrics: &[&str], batch: BatchConfig) -> MetricsConfigRequest {
    MetricsConfigRequest {
        metrics: metrics.iter().map(|m| m.to_string()).collect(),
        llm_judge_config: None,
        batch_config: batch,
    }
}

/// An 83-span batch keeps every parent link
#[test]
fn test_production_batch_preserves_parent_links() {
    let raw = production_batch();
    assert_eq!(raw.len(), 83);

    let spans = parse_raw_spans(&raw);
    assert_eq!(spans.len(), 83);

    let ids: HashSet<&str> = spans.iter().map(|s| s.span_id.as_str()).collect();
    for span in &spans {
        if let Some(parent) = &span.parent_span_id {
            assert!(ids.contains(parent.as_str()), "dangling parent {} on {}", parent, span.span_id);
        }
    }

    let sessions = TraceProcessor::new().process_raw_traces(&raw);
    assert_eq!(sessions.len(), 7);
    assert_eq!(sessions.span_count(), 83);
    for session in sessions.iter() {
        let tree: ExecutionTree = session.enriched_as(attribute_keys::EXECUTION_TREE).unwrap();
        assert_eq!(tree.roots.len(), 1, "session {}", session.session_id);
        assert_eq!(tree.node_count, session.span_count());
        assert_eq!(tree.depth, 3);
    }
}

/// The full flow from a trace file to grouped results
#[tokio::test]
async fn test_full_flow_from_trace_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for record in production_batch() {
        writeln!(file, "{}", record).unwrap();
    }

    let engine = MetricsEngine::new(EngineConfig::default());
    let response = engine
        .compute_metrics(
            request(
                &[
                    "ToolError",
                    "ToolErrorRate",
                    "AgentToAgentInteractions",
                    "AgentToToolInteractions",
                    "metrics.session.CyclesCount",
                ],
                BatchConfig::most_recent(2),
            ),
            &JsonFileSource::new(file.path()),
        )
        .await
        .unwrap();

    assert_eq!(response.session_count, 2);
    assert!(!response.cancelled);
    assert!(response.errors.is_empty());

    // prod-6 has 2 tools, prod-5 has 6
    assert_eq!(response.results.span_metrics.len(), 8);
    assert!(response
        .results
        .span_metrics
        .iter()
        .all(|r| r.value == MetricValue::String("success".to_string())));

    // Four session metrics for each of the two sessions
    assert_eq!(response.results.session_metrics.len(), 8);

    let find = |metric: &str, session: &str| -> &MetricResult {
        response
            .results
            .session_metrics
            .iter()
            .find(|r| r.metric_name == metric && r.session_id.as_deref() == Some(session))
            .unwrap()
    };

    assert_eq!(
        find("AgentToAgentInteractions", "prod-5").value,
        MetricValue::counts([("planner -> booker", 1), ("booker -> planner", 1)])
    );
    assert_eq!(
        find("AgentToToolInteractions", "prod-5").value,
        MetricValue::counts([
            ("(Agent: planner) -> (Tool: hotel_search)", 2),
            ("(Agent: planner) -> (Tool: weather)", 2),
            ("(Agent: booker) -> (Tool: hotel_search)", 1),
            ("(Agent: booker) -> (Tool: weather)", 1),
        ])
    );
    assert_eq!(find("ToolErrorRate", "prod-6").value.as_f64(), Some(0.0));
    assert_eq!(find("CyclesCount", "prod-6").value, MetricValue::Int(0));
}

struct Exploding;

#[async_trait]
impl Metric for Exploding {
    fn name(&self) -> &str {
        "Exploding"
    }

    fn aggregation_level(&self) -> AggregationLevel {
        AggregationLevel::Session
    }

    async fn compute(&self, _input: MetricInput<'_>, _ctx: &MetricContext) -> Result<MetricResult, MetricError> {
        panic!("metric blew up");
    }
}

/// One panicking metric among N yields N results with N-1 successes
#[tokio::test]
async fn test_error_isolation() {
    let engine = MetricsEngine::new(EngineConfig::default());
    engine.register(Arc::new(Exploding)).unwrap();

    let response = engine
        .compute_metrics(
            request(
                &["ToolErrorRate", "Exploding", "CyclesCount", "AgentToAgentInteractions"],
                BatchConfig::most_recent(1),
            ),
            &InMemorySource::new(production_batch()),
        )
        .await
        .unwrap();

    let results = &response.results.session_metrics;
    assert_eq!(results.len(), 4);
    assert_eq!(results.iter().filter(|r| r.success).count(), 3);

    let failed: Vec<&MetricResult> = results.iter().filter(|r| !r.success).collect();
    assert_eq!(failed[0].metric_name, "Exploding");
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].metric_name, "Exploding");
}

fn dated_sessions(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            raw_span(
                SpanShape {
                    kind: "agent",
                    id: format!("span-{:02}", i),
                    parent: None,
                    session: format!("day-{:02}", i),
                    name: "planner",
                    start_secs: JAN_2024_SECS + i as f64 * 30.0 * DAY_SECS,
                },
                json!({}),
            )
        })
        .collect()
}

/// Batch selection by count and by time range
#[tokio::test]
async fn test_batch_selection() {
    let engine = MetricsEngine::new(EngineConfig::default());
    let source = InMemorySource::new(dated_sessions(15));

    let recent = engine
        .compute_metrics(request(&["CyclesCount"], BatchConfig::most_recent(10)), &source)
        .await
        .unwrap();
    let sessions: Vec<&str> = recent
        .results
        .session_metrics
        .iter()
        .filter_map(|r| r.session_id.as_deref())
        .collect();
    let expected: Vec<String> = (5..15).rev().map(|i| format!("day-{:02}", i)).collect();
    assert_eq!(sessions, expected);

    // Day 0 through day 360 fall in 2024; day 390 and later do not
    let year = engine
        .compute_metrics(
            request(
                &["CyclesCount"],
                BatchConfig::time_range("2024-01-01T00:00:00Z", "2024-12-31T23:59:59Z"),
            ),
            &source,
        )
        .await
        .unwrap();
    assert_eq!(year.session_count, 13);
}

struct ScriptedJudge {
    model: String,
}

#[async_trait]
impl LLMClient for ScriptedJudge {
    async fn evaluate(&self, _prompt: String) -> Result<LLMResponse, LLMError> {
        let content = match self.model.as_str() {
            "judge-a" => r#"{"metric_score": 1, "score_reasoning": "all claims come from tool output"}"#,
            "judge-b" => "```json\n{\"score\": \"1\", \"reasoning\": \"grounded\"}\n```",
            _ => return Err(LLMError::RateLimitExceeded),
        };
        Ok(LLMResponse {
            content: content.to_string(),
            usage: TokenUsage::default(),
            model: self.model.clone(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

struct ScriptedFactory;

impl JudgeClientFactory for ScriptedFactory {
    fn create(&self, config: &LLMJudgeConfig) -> Result<Arc<dyn LLMClient>, LLMError> {
        Ok(Arc::new(ScriptedJudge {
            model: config.model_name.clone(),
        }))
    }
}

/// A three-model jury where one model fails still reaches a verdict
#[tokio::test]
async fn test_judged_metrics_with_partial_jury() {
    let mut config = EngineConfig::default();
    config.judge.models = ["judge-a", "judge-b", "judge-c"]
        .iter()
        .map(|model| LLMJudgeConfig {
            model_name: model.to_string(),
            base_url: Some("http://localhost:9/v1".to_string()),
            api_key: Some("sk-test".to_string()),
        })
        .collect();

    let engine = MetricsEngine::new(config).with_factory(Arc::new(ScriptedFactory));
    let response = engine
        .compute_metrics(
            request(&["Groundedness", "ToolUtilizationAccuracy"], BatchConfig::most_recent(1)),
            &InMemorySource::new(production_batch()),
        )
        .await
        .unwrap();

    let groundedness = &response.results.session_metrics[0];
    assert!(groundedness.success);
    assert_eq!(groundedness.value, MetricValue::Float(1.0));
    assert_eq!(groundedness.metadata.get("votes"), Some(&json!(2)));
    assert_eq!(groundedness.metadata.get("label"), Some(&json!("grounded")));

    assert_eq!(response.results.span_metrics.len(), 2);
    assert!(response.results.span_metrics.iter().all(|r| r.success));
}
