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

//! Per-workflow query/response data

use super::{attribute_keys, payload_text, to_value, SessionTransformer};
use crate::error::EnrichmentError;
use crate::session::SessionEntity;
use crate::span::{chronological, contains_error_marker, EntityType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub span_id: String,
    pub name: String,
    pub query: Option<String>,
    pub response: Option<String>,
    pub contains_error: bool,
    pub start_time: Option<f64>,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowData {
    pub workflows: Vec<WorkflowRecord>,
    pub workflow_count: usize,
    pub error_count: usize,
    /// Distinct workflow names in first-seen order
    pub names: Vec<String>,
}

/// Writes `workflow_data` from workflow and graph spans
pub struct WorkflowDataTransformer;

impl WorkflowDataTransformer {
    pub fn collect(session: &SessionEntity) -> WorkflowData {
        let workflows: Vec<WorkflowRecord> = chronological(
            session
                .spans
                .iter()
                .filter(|s| matches!(s.entity_type, EntityType::Workflow | EntityType::Graph)),
        )
        .into_iter()
        .map(|span| WorkflowRecord {
            span_id: span.span_id.clone(),
            name: span.entity_name.clone(),
            query: payload_text(&span.input_payload),
            response: payload_text(&span.output_payload),
            contains_error: span.contains_error
                || contains_error_marker(&Value::Object(span.input_payload.clone())),
            start_time: span.start_time,
            duration_ms: span.duration_ms,
        })
        .collect();

        let mut names: Vec<String> = Vec::new();
        for record in &workflows {
            if !names.contains(&record.name) {
                names.push(record.name.clone());
            }
        }

        WorkflowData {
            workflow_count: workflows.len(),
            error_count: workflows.iter().filter(|w| w.contains_error).count(),
            names,
            workflows,
        }
    }
}

impl SessionTransformer for WorkflowDataTransformer {
    fn key(&self) -> &'static str {
        attribute_keys::WORKFLOW_DATA
    }

    fn derive(&self, session: &SessionEntity) -> Result<Value, EnrichmentError> {
        to_value(self.key(), &Self::collect(session))
    }

    fn default_value(&self) -> Value {
        serde_json::json!({"workflows": [], "workflow_count": 0, "error_count": 0, "names": []})
    }
}
