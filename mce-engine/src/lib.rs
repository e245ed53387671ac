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

//! # MCE Engine
//!
//! Metric computation over enriched agent sessions.
//!
//! ## Features
//!
//! - **Trait-based metrics**: span, session and population level metrics behind one trait
//! - **Registry**: read-mostly registry where re-registration overrides
//! - **Isolated execution**: bounded fan-out with per-metric timeouts and panic capture
//! - **LLM jury**: one or many judge models reduced to a deterministic consensus
//! - **Native metrics**: tool errors, interaction counts, cycles, groundedness
//!
//! ## Example
//!
//! ```rust,ignore
//! use mce_engine::{EngineConfig, MetricsEngine, MetricsConfigRequest};
//! use mce_engine::source::JsonFileSource;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = MetricsEngine::new(EngineConfig::load(None)?);
//!     let request: MetricsConfigRequest = serde_json::from_str(
//!         r#"{"metrics": ["ToolErrorRate", "CyclesCount"], "batch_config": {"num_sessions": 10}}"#,
//!     )?;
//!     let response = engine
//!         .compute_metrics(request, &JsonFileSource::new("traces.json"))
//!         .await?;
//!     println!("{}", serde_json::to_string_pretty(&response)?);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use mce_core::{AggregationLevel, EntityType, MetricResult, SessionEntity, SessionSet, SpanEntity};
use std::sync::Arc;
use thiserror::Error;

pub mod config;
pub mod engine;
pub mod jury;
pub mod llm_client;
pub mod metrics;
pub mod native;
pub mod processor;
pub mod prompts;
pub mod registry;
pub mod source;

pub use config::{EngineConfig, LLMJudgeConfig};
pub use engine::{EngineError, MetricsConfigRequest, MetricsEngine, MetricsResponse};
pub use jury::{ConsensusVerdict, GradingSchema, JudgeVerdict, Jury, JuryError};
pub use llm_client::{LLMClient, LLMError, LLMResponse, OpenAIClient};
pub use processor::{
    GroupedResults, MetricErrorSummary, MetricsProcessor, MetricsReport, ProcessorConfig, ProcessorError,
};
pub use registry::{MetricRegistry, RegistryError};
pub use source::{InMemorySource, JsonFileSource, SourceError, TraceSource};

/// Core trait that all metrics implement
#[async_trait]
pub trait Metric: Send + Sync {
    /// Registry name (e.g., "ToolErrorRate")
    fn name(&self) -> &str;

    fn aggregation_level(&self) -> AggregationLevel;

    /// Span kinds a span-level metric applies to
    fn required_entity_types(&self) -> &[EntityType] {
        &[]
    }

    fn description(&self) -> &str {
        ""
    }

    /// Whether the metric needs an LLM jury to produce a value
    fn requires_judge(&self) -> bool {
        false
    }

    /// Checked once at registration time
    fn validate(&self) -> Result<(), MetricError> {
        if self.name().trim().is_empty() {
            return Err(MetricError::InvalidDefinition("metric name is empty".to_string()));
        }
        if self.aggregation_level() == AggregationLevel::Span && self.required_entity_types().is_empty() {
            return Err(MetricError::InvalidDefinition(format!(
                "span-level metric {} declares no required entity types",
                self.name()
            )));
        }
        Ok(())
    }

    async fn compute(&self, input: MetricInput<'_>, ctx: &MetricContext) -> Result<MetricResult, MetricError>;
}

/// The scope a metric is computed over
#[derive(Debug, Clone, Copy)]
pub enum MetricInput<'a> {
    Span {
        span: &'a SpanEntity,
        session: &'a SessionEntity,
    },
    Session(&'a SessionEntity),
    Population(&'a SessionSet),
}

impl<'a> MetricInput<'a> {
    pub fn level(&self) -> AggregationLevel {
        match self {
            MetricInput::Span { .. } => AggregationLevel::Span,
            MetricInput::Session(_) => AggregationLevel::Session,
            MetricInput::Population(_) => AggregationLevel::Population,
        }
    }

    pub fn span(&self) -> Option<&'a SpanEntity> {
        match *self {
            MetricInput::Span { span, .. } => Some(span),
            _ => None,
        }
    }

    pub fn session(&self) -> Option<&'a SessionEntity> {
        match *self {
            MetricInput::Span { session, .. } => Some(session),
            MetricInput::Session(session) => Some(session),
            MetricInput::Population(_) => None,
        }
    }

    pub fn population(&self) -> Option<&'a SessionSet> {
        match *self {
            MetricInput::Population(sessions) => Some(sessions),
            _ => None,
        }
    }

    /// Session id of a span or session scope
    pub fn session_id(&self) -> Option<&'a str> {
        self.session().map(|s| s.session_id.as_str())
    }

    pub fn span_id(&self) -> Option<&'a str> {
        self.span().map(|s| s.span_id.as_str())
    }

    /// Id of the entity this scope stands for, used in error reports
    pub fn entity_id(&self) -> String {
        match self {
            MetricInput::Span { span, .. } => span.span_id.clone(),
            MetricInput::Session(session) => session.session_id.clone(),
            MetricInput::Population(_) => "population".to_string(),
        }
    }
}

/// Shared services available to metrics during a run
#[derive(Clone, Default)]
pub struct MetricContext {
    jury: Option<Arc<Jury>>,
}

impl MetricContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jury(mut self, jury: Arc<Jury>) -> Self {
        self.jury = Some(jury);
        self
    }

    pub fn has_jury(&self) -> bool {
        self.jury.is_some()
    }

    pub fn jury(&self) -> Result<&Jury, MetricError> {
        self.jury.as_deref().ok_or(MetricError::JudgeNotConfigured)
    }
}

/// Errors raised by a single metric invocation
#[derive(Debug, Error)]
pub enum MetricError {
    #[error("Missing required data: {0}")]
    MissingData(String),

    #[error("Metric {metric} does not accept {level} input")]
    UnsupportedScope {
        metric: String,
        level: AggregationLevel,
    },

    #[error("Please configure your LLM credentials")]
    JudgeNotConfigured,

    #[error("Judge error: {0}")]
    Judge(#[from] JuryError),

    #[error("Invalid metric definition: {0}")]
    InvalidDefinition(String),

    #[error("Computation failed: {0}")]
    Computation(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MetricError {
    pub fn unsupported(metric: &str, input: &MetricInput<'_>) -> Self {
        MetricError::UnsupportedScope {
            metric: metric.to_string(),
            level: input.level(),
        }
    }
}
