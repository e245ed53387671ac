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

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Granularity at which a metric is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationLevel {
    Span,
    Session,
    Population,
}

impl AggregationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationLevel::Span => "span",
            AggregationLevel::Session => "session",
            AggregationLevel::Population => "population",
        }
    }
}

impl fmt::Display for AggregationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "span" => Ok(AggregationLevel::Span),
            "session" => Ok(AggregationLevel::Session),
            "population" => Ok(AggregationLevel::Population),
            other => Err(format!("unknown aggregation level: {}", other)),
        }
    }
}

/// Type-safe metric values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Array(Vec<MetricValue>),
    Object(BTreeMap<String, MetricValue>),
    Json(Value),
}

impl MetricValue {
    /// Value carried by failed results
    pub fn null() -> Self {
        MetricValue::Json(Value::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, MetricValue::Json(Value::Null))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Int(i) => Some(*i as f64),
            MetricValue::Float(f) => Some(*f),
            MetricValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            MetricValue::Json(v) => v.as_f64(),
            _ => None,
        }
    }

    /// Object of integer counts, ordered by key
    pub fn counts<I, K>(counts: I) -> Self
    where
        I: IntoIterator<Item = (K, usize)>,
        K: Into<String>,
    {
        MetricValue::Object(
            counts
                .into_iter()
                .map(|(k, v)| (k.into(), MetricValue::Int(v as i64)))
                .collect(),
        )
    }
}

impl From<Value> for MetricValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Bool(b) => MetricValue::Bool(b),
            Value::String(s) => MetricValue::String(s),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    MetricValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    MetricValue::Float(f)
                } else {
                    MetricValue::Json(Value::Number(n))
                }
            }
            other => MetricValue::Json(other),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<usize> for MetricValue {
    fn from(v: usize) -> Self {
        MetricValue::Int(v as i64)
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Bool(v)
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::String(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::String(v.to_string())
    }
}

/// Output of one metric execution over one scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub metric_name: String,
    pub aggregation_level: AggregationLevel,
    pub value: MetricValue,
    pub success: bool,

    /// Populated on failure
    #[serde(default)]
    pub error_message: Option<String>,

    /// Ids of the spans or sessions that contributed
    #[serde(default)]
    pub entities_involved: Vec<String>,

    /// Judge reasoning for LLM-graded metrics
    #[serde(default)]
    pub reasoning: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub unit: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,

    /// "native" or the plugin that produced the result
    #[serde(default = "default_source")]
    pub source: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

fn default_source() -> String {
    "native".to_string()
}

impl MetricResult {
    pub fn success(
        metric_name: impl Into<String>,
        aggregation_level: AggregationLevel,
        value: impl Into<MetricValue>,
    ) -> Self {
        Self {
            metric_name: metric_name.into(),
            aggregation_level,
            value: value.into(),
            success: true,
            error_message: None,
            entities_involved: Vec::new(),
            reasoning: None,
            description: String::new(),
            unit: String::new(),
            session_id: None,
            span_id: None,
            source: default_source(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn failure(
        metric_name: impl Into<String>,
        aggregation_level: AggregationLevel,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            error_message: Some(error_message.into()),
            ..Self::success(metric_name, aggregation_level, MetricValue::null())
        }
    }

    pub fn with_entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities_involved = entities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_span(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Fill identity fields the metric left empty
    pub fn scoped(mut self, session_id: Option<&str>, span_id: Option<&str>) -> Self {
        if self.session_id.is_none() {
            self.session_id = session_id.map(str::to_string);
        }
        if self.span_id.is_none() {
            self.span_id = span_id.map(str::to_string);
        }
        self
    }
}
