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

//! Engine entry point: batch request in, grouped metric results out

use crate::config::{ConfigError, EngineConfig, LLMJudgeConfig};
use crate::jury::{Jury, VerdictCache};
use crate::llm_client::{JudgeClientFactory, OpenAIClientFactory};
use crate::native;
use crate::processor::{GroupedResults, MetricErrorSummary, MetricsProcessor, MetricsReport, ProcessorConfig, ProcessorError};
use crate::registry::{MetricRegistry, RegistryError};
use crate::source::{SourceError, TraceSource};
use crate::{Metric, MetricContext};
use mce_core::{BatchConfig, BatchError, SessionSet, TraceProcessor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// A metrics computation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfigRequest {
    pub metrics: Vec<String>,

    /// Overrides the configured judge models when it carries a real API key
    #[serde(default)]
    pub llm_judge_config: Option<LLMJudgeConfig>,

    #[serde(default)]
    pub batch_config: BatchConfig,
}

/// Results of a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsResponse {
    /// Metrics that were resolved and computed
    pub metrics: Vec<String>,
    pub results: GroupedResults,
    pub errors: Vec<MetricErrorSummary>,
    pub cancelled: bool,
    pub session_count: usize,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Processor(#[from] ProcessorError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Whether the caller's request caused the error (4xx rather than 5xx)
    pub fn is_client_error(&self) -> bool {
        match self {
            EngineError::Batch(_) => true,
            EngineError::Processor(ProcessorError::NoMetrics) => true,
            EngineError::Processor(_) => false,
            EngineError::Source(_) | EngineError::Registry(_) | EngineError::Config(_) => false,
        }
    }
}

/// Long-lived engine shared across requests
pub struct MetricsEngine {
    config: EngineConfig,
    registry: MetricRegistry,
    traces: TraceProcessor,
    factory: Arc<dyn JudgeClientFactory>,
    verdict_cache: Option<Arc<VerdictCache>>,
}

impl MetricsEngine {
    pub fn new(config: EngineConfig) -> Self {
        let verdict_cache = config
            .judge
            .enable_cache
            .then(|| Arc::new(VerdictCache::new(config.judge.cache_ttl_secs)));
        Self {
            config,
            registry: MetricRegistry::new(),
            traces: TraceProcessor::new(),
            factory: Arc::new(OpenAIClientFactory),
            verdict_cache,
        }
    }

    /// Use a different judge client implementation
    pub fn with_factory(mut self, factory: Arc<dyn JudgeClientFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_trace_processor(mut self, traces: TraceProcessor) -> Self {
        self.traces = traces;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    /// Register a custom metric, replacing any metric of the same name
    pub fn register(&self, metric: Arc<dyn Metric>) -> Result<(), EngineError> {
        Ok(self.registry.register(metric)?)
    }

    /// Registered metric names, sorted
    pub fn list_metrics(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Registered and built-in metric names, sorted
    pub fn available_metrics(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.registry.names().into_iter().collect();
        names.extend(native::NATIVE_METRICS.iter().map(|n| n.to_string()));
        names.into_iter().collect()
    }

    /// Fetch, process and score the sessions a request selects
    pub async fn compute_metrics(
        &self,
        request: MetricsConfigRequest,
        source: &dyn TraceSource,
    ) -> Result<MetricsResponse, EngineError> {
        request.batch_config.validate()?;
        if request.metrics.is_empty() {
            return Err(ProcessorError::NoMetrics.into());
        }

        let raw = source.fetch(&request.batch_config).await?;
        let sessions = self.traces.process_raw_traces(&raw);
        let selected = request.batch_config.resolve(&sessions)?;
        info!(
            batch = %request.batch_config.describe(),
            sessions = selected.len(),
            spans = selected.span_count(),
            "Resolved batch"
        );

        let report = self
            .compute_for_sessions(&selected, &request.metrics, request.llm_judge_config.as_ref())
            .await?;

        Ok(MetricsResponse {
            metrics: self.resolved_names(&request.metrics),
            results: report.grouped(),
            errors: report.errors,
            cancelled: report.cancelled,
            session_count: selected.len(),
        })
    }

    /// Score sessions that were already processed
    pub async fn compute_for_sessions(
        &self,
        sessions: &SessionSet,
        metrics: &[String],
        judge: Option<&LLMJudgeConfig>,
    ) -> Result<MetricsReport, EngineError> {
        native::register_requested(&self.registry, metrics)?;

        let needs_judge = metrics
            .iter()
            .filter_map(|name| self.registry.get(name))
            .any(|metric| metric.requires_judge());
        let context = if needs_judge {
            self.judge_context(judge)
        } else {
            MetricContext::new()
        };

        let processor = MetricsProcessor::new(self.registry.clone())
            .with_config(ProcessorConfig::from(&self.config.processor))
            .with_context(context);
        Ok(processor.compute(sessions, metrics).await?)
    }

    fn judge_context(&self, request: Option<&LLMJudgeConfig>) -> MetricContext {
        let models = self.config.judge_models_for(request);
        if models.is_empty() {
            warn!("No judge model configured; LLM-judged metrics will fail");
            return MetricContext::new();
        }

        match Jury::from_configs(&models, self.factory.as_ref()) {
            Ok(jury) => {
                let mut jury = jury.with_timeout(self.config.judge_timeout());
                if let Some(cache) = &self.verdict_cache {
                    jury = jury.with_cache(Arc::clone(cache));
                }
                info!(models = ?jury.models(), "Judge jury ready");
                MetricContext::new().with_jury(Arc::new(jury))
            }
            Err(e) => {
                warn!(error = %e, "Could not build judge jury; LLM-judged metrics will fail");
                MetricContext::new()
            }
        }
    }

    fn resolved_names(&self, requested: &[String]) -> Vec<String> {
        requested
            .iter()
            .filter_map(|name| self.registry.get(name))
            .map(|metric| metric.name().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
