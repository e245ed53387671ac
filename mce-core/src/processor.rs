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

//! Trace processing facade: parse, aggregate, enrich

use crate::enrichment::DataPipeline;
use crate::parser::parse_raw_spans;
use crate::session::{SessionAggregator, SessionEntity, SessionSet};
use crate::span::SpanEntity;
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

/// Turns raw span records into enriched sessions
#[derive(Default)]
pub struct TraceProcessor {
    aggregator: SessionAggregator,
    pipeline: DataPipeline,
}

impl TraceProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_aggregator(mut self, aggregator: SessionAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn with_pipeline(mut self, pipeline: DataPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Parse a flat batch of raw spans, group by session id and enrich
    pub fn process_raw_traces(&self, raw_spans: &[Value]) -> SessionSet {
        let spans = parse_raw_spans(raw_spans);
        let sessions = self.process_spans(spans);
        info!(
            raw_spans = raw_spans.len(),
            sessions = sessions.len(),
            spans = sessions.span_count(),
            "Processed raw traces"
        );
        sessions
    }

    /// Group already parsed spans by session id and enrich
    pub fn process_spans(&self, spans: Vec<SpanEntity>) -> SessionSet {
        let mut sessions = self.aggregator.aggregate(spans);
        self.pipeline.run_all(&mut sessions);
        sessions
    }

    /// Process records that were grouped by session upstream.
    ///
    /// The group key becomes the session id of every span in the group,
    /// whatever the spans' own session attributes say. Groups sharing a key
    /// are merged in order.
    pub fn process_grouped<I>(&self, groups: I) -> SessionSet
    where
        I: IntoIterator<Item = (String, Vec<Value>)>,
    {
        let mut order: Vec<String> = Vec::new();
        let mut merged: HashMap<String, Vec<SpanEntity>> = HashMap::new();

        for (session_id, records) in groups {
            let spans = parse_raw_spans(&records);
            merged
                .entry(session_id.clone())
                .or_insert_with(|| {
                    order.push(session_id);
                    Vec::new()
                })
                .extend(spans);
        }

        let mut sessions: SessionSet = order
            .into_iter()
            .filter_map(|id| {
                let spans = merged.remove(&id)?;
                Some(SessionEntity::from_spans(id, spans, self.aggregator.strategy()))
            })
            .collect();

        self.pipeline.run_all(&mut sessions);
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::attribute_keys;
    use crate::session::UNKNOWN_SESSION_ID;
    use serde_json::json;

    fn raw(name: &str, id: &str, session: Option<&str>, agent: &str, start: f64) -> Value {
        let mut attributes = json!({
            "ioa_observe.entity.name": agent,
            "ioa_start_time": start,
        });
        if let Some(session) = session {
            attributes["session.id"] = json!(session);
        }
        json!({"SpanName": name, "SpanId": id, "Duration": 1_000_000, "SpanAttributes": attributes})
    }

    #[test]
    fn test_process_raw_traces() {
        let records = vec![
            raw("a.agent", "1", Some("s1"), "alpha", 1.0),
            raw("b.agent", "2", Some("s1"), "beta", 2.0),
            raw("ignored.http", "3", Some("s1"), "x", 3.0),
            raw("c.agent", "4", None, "gamma", 4.0),
        ];

        let sessions = TraceProcessor::new().process_raw_traces(&records);
        assert_eq!(sessions.session_ids(), vec!["s1", UNKNOWN_SESSION_ID]);

        let s1 = sessions.get("s1").unwrap();
        assert_eq!(s1.span_count(), 2);
        assert_eq!(
            s1.enriched(attribute_keys::AGENT_TRANSITIONS),
            Some(&json!([{"from": "alpha", "to": "beta"}]))
        );
    }

    #[test]
    fn test_process_grouped_forces_session_id() {
        let groups = vec![
            (
                "group-1".to_string(),
                vec![raw("a.agent", "1", Some("other"), "alpha", 1.0)],
            ),
            ("group-2".to_string(), vec![raw("b.agent", "2", None, "beta", 2.0)]),
            ("group-1".to_string(), vec![raw("c.agent", "3", None, "gamma", 3.0)]),
        ];

        let sessions = TraceProcessor::new().process_grouped(groups);
        assert_eq!(sessions.session_ids(), vec!["group-1", "group-2"]);

        let first = sessions.get("group-1").unwrap();
        assert_eq!(first.span_count(), 2);
        assert!(first
            .spans
            .iter()
            .all(|s| s.session_id.as_deref() == Some("group-1")));
        assert!(first.enriched(attribute_keys::EXECUTION_TREE).is_some());
    }

    #[test]
    fn test_empty_input() {
        let sessions = TraceProcessor::new().process_raw_traces(&[]);
        assert!(sessions.is_empty());
    }
}
