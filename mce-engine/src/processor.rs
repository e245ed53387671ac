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

//! Metrics orchestrator
//!
//! Resolves requested metric names, plans one invocation per applicable
//! scope and runs the invocations with bounded concurrency. Each invocation
//! is isolated: errors, panics and timeouts become failed results and never
//! stop sibling invocations.

use crate::config::ProcessorSettings;
use crate::registry::MetricRegistry;
use crate::{Metric, MetricContext, MetricInput};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use mce_core::{AggregationLevel, MetricResult, SessionSet};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Execution limits for one compute call
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub max_concurrent: usize,
    pub metric_timeout: Duration,
    /// Deadline for the whole call
    pub deadline: Option<Duration>,
    /// Return completed results when the deadline passes instead of failing
    pub best_effort: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            metric_timeout: Duration::from_secs(120),
            deadline: None,
            best_effort: true,
        }
    }
}

impl From<&ProcessorSettings> for ProcessorConfig {
    fn from(settings: &ProcessorSettings) -> Self {
        Self {
            max_concurrent: settings.max_concurrent,
            metric_timeout: Duration::from_secs(settings.metric_timeout_secs),
            deadline: settings.deadline_secs.map(Duration::from_secs),
            best_effort: settings.best_effort,
        }
    }
}

/// Errors that abort a whole compute call
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("No metrics requested")]
    NoMetrics,

    #[error("Deadline of {deadline:?} exceeded with {completed} of {total} metric invocations finished")]
    DeadlineExceeded {
        deadline: Duration,
        completed: usize,
        total: usize,
    },
}

/// One distinct failure, with every entity it happened on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricErrorSummary {
    pub metric_name: String,
    pub error_message: String,
    pub occurrences: usize,
    pub entities: Vec<String>,
}

/// Results split by aggregation level
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupedResults {
    pub span_metrics: Vec<MetricResult>,
    pub session_metrics: Vec<MetricResult>,
    pub population_metrics: Vec<MetricResult>,
}

/// Outcome of a compute call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsReport {
    /// One result per requested metric and applicable scope, in plan order
    pub results: Vec<MetricResult>,
    /// Failures deduplicated by metric and message
    pub errors: Vec<MetricErrorSummary>,
    /// The deadline passed before every invocation finished
    pub cancelled: bool,
    /// Invocations abandoned at the deadline
    #[serde(default)]
    pub abandoned: usize,
}

impl MetricsReport {
    fn new(results: Vec<MetricResult>, cancelled: bool, abandoned: usize) -> Self {
        let errors = summarize_errors(&results);
        Self {
            results,
            errors,
            cancelled,
            abandoned,
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failure_count(&self) -> usize {
        self.results.len() - self.success_count()
    }

    pub fn at_level(&self, level: AggregationLevel) -> impl Iterator<Item = &MetricResult> {
        self.results.iter().filter(move |r| r.aggregation_level == level)
    }

    pub fn for_metric<'a>(&'a self, metric_name: &'a str) -> impl Iterator<Item = &'a MetricResult> {
        self.results.iter().filter(move |r| r.metric_name == metric_name)
    }

    pub fn grouped(&self) -> GroupedResults {
        let mut grouped = GroupedResults::default();
        for result in &self.results {
            let bucket = match result.aggregation_level {
                AggregationLevel::Span => &mut grouped.span_metrics,
                AggregationLevel::Session => &mut grouped.session_metrics,
                AggregationLevel::Population => &mut grouped.population_metrics,
            };
            bucket.push(result.clone());
        }
        grouped
    }
}

fn summarize_errors(results: &[MetricResult]) -> Vec<MetricErrorSummary> {
    let mut summaries: Vec<MetricErrorSummary> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for result in results.iter().filter(|r| !r.success) {
        let message = result.error_message.clone().unwrap_or_default();
        let entity = result
            .span_id
            .as_deref()
            .or(result.session_id.as_deref())
            .unwrap_or("population")
            .to_string();

        let key = (result.metric_name.clone(), message.clone());
        match index.get(&key) {
            Some(&i) => {
                let summary = &mut summaries[i];
                summary.occurrences += 1;
                if !summary.entities.contains(&entity) {
                    summary.entities.push(entity);
                }
            }
            None => {
                index.insert(key, summaries.len());
                summaries.push(MetricErrorSummary {
                    metric_name: result.metric_name.clone(),
                    error_message: message,
                    occurrences: 1,
                    entities: vec![entity],
                });
            }
        }
    }
    summaries
}

/// A planned unit of work: either a result known up front or an invocation
enum Planned<'a> {
    Ready(MetricResult),
    Run {
        metric: Arc<dyn Metric>,
        input: MetricInput<'a>,
    },
}

/// Runs metrics from a registry over a session set
pub struct MetricsProcessor {
    registry: MetricRegistry,
    config: ProcessorConfig,
    context: MetricContext,
}

impl MetricsProcessor {
    pub fn new(registry: MetricRegistry) -> Self {
        Self {
            registry,
            config: ProcessorConfig::default(),
            context: MetricContext::default(),
        }
    }

    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_context(mut self, context: MetricContext) -> Self {
        self.context = context;
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Compute every requested metric over `sessions`.
    ///
    /// Only an empty metric list or a missed deadline outside best-effort
    /// mode is an error; everything else is reported per result.
    pub async fn compute<S: AsRef<str>>(
        &self,
        sessions: &SessionSet,
        metric_names: &[S],
    ) -> Result<MetricsReport, ProcessorError> {
        if metric_names.is_empty() {
            return Err(ProcessorError::NoMetrics);
        }

        let started = Instant::now();
        let plan = self.plan(sessions, metric_names);
        let total = plan.len();

        let mut slots: Vec<Option<MetricResult>> = Vec::with_capacity(total);
        let mut jobs = Vec::new();
        for (i, planned) in plan.into_iter().enumerate() {
            match planned {
                Planned::Ready(result) => slots.push(Some(result)),
                Planned::Run { metric, input } => {
                    slots.push(None);
                    jobs.push((i, metric, input));
                }
            }
        }
        let job_count = jobs.len();
        debug!(planned = total, invocations = job_count, "Planned metric invocations");

        let mut finished = 0usize;
        let mut running = stream::iter(jobs)
            .map(|(i, metric, input)| async move { (i, self.invoke(metric, input).await) })
            .buffer_unordered(self.config.max_concurrent.max(1));

        let drain = async {
            while let Some((i, result)) = running.next().await {
                slots[i] = Some(result);
                finished += 1;
            }
        };

        let cancelled = match self.config.deadline {
            Some(deadline) => tokio::time::timeout(deadline, drain).await.is_err(),
            None => {
                drain.await;
                false
            }
        };
        drop(running);

        let abandoned = job_count - finished;
        if cancelled {
            let deadline = self.config.deadline.unwrap_or_default();
            if !self.config.best_effort {
                return Err(ProcessorError::DeadlineExceeded {
                    deadline,
                    completed: total - abandoned,
                    total,
                });
            }
            warn!(
                deadline = ?deadline,
                abandoned,
                "Deadline passed; returning completed metric results"
            );
        }

        let report = MetricsReport::new(slots.into_iter().flatten().collect(), cancelled, abandoned);
        info!(
            metrics = metric_names.len(),
            results = report.len(),
            failures = report.failure_count(),
            distinct_errors = report.errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Computed metrics"
        );
        Ok(report)
    }

    fn plan<'a, S: AsRef<str>>(&self, sessions: &'a SessionSet, metric_names: &[S]) -> Vec<Planned<'a>> {
        let mut plan = Vec::new();
        let mut seen = HashSet::new();

        for name in metric_names {
            let name = name.as_ref().trim();
            if !seen.insert(name.to_string()) {
                continue;
            }

            let Some(metric) = self.registry.get(name) else {
                warn!(metric = name, "Unknown metric requested");
                plan.push(Planned::Ready(MetricResult::failure(
                    name,
                    AggregationLevel::Population,
                    format!("Metric not found: {}", name),
                )));
                continue;
            };

            let level = metric.aggregation_level();
            if sessions.is_empty() {
                plan.push(Planned::Ready(MetricResult::failure(
                    metric.name(),
                    level,
                    "No data: there are no sessions to compute over",
                )));
                continue;
            }

            match level {
                AggregationLevel::Span => {
                    let required = metric.required_entity_types();
                    let before = plan.len();
                    for session in sessions.iter() {
                        for span in session.spans.iter().filter(|s| required.contains(&s.entity_type)) {
                            plan.push(Planned::Run {
                                metric: Arc::clone(&metric),
                                input: MetricInput::Span { span, session },
                            });
                        }
                    }
                    if plan.len() == before {
                        let kinds: Vec<&str> = required.iter().map(|k| k.as_str()).collect();
                        plan.push(Planned::Ready(MetricResult::failure(
                            metric.name(),
                            level,
                            format!("No applicable entities: no spans of type {}", kinds.join(", ")),
                        )));
                    }
                }
                AggregationLevel::Session => {
                    for session in sessions.iter() {
                        plan.push(Planned::Run {
                            metric: Arc::clone(&metric),
                            input: MetricInput::Session(session),
                        });
                    }
                }
                AggregationLevel::Population => plan.push(Planned::Run {
                    metric,
                    input: MetricInput::Population(sessions),
                }),
            }
        }
        plan
    }

    async fn invoke(&self, metric: Arc<dyn Metric>, input: MetricInput<'_>) -> MetricResult {
        let name = metric.name().to_string();
        let level = metric.aggregation_level();
        let timeout = self.config.metric_timeout;

        let guarded = AssertUnwindSafe(metric.compute(input, &self.context)).catch_unwind();
        let failure = match tokio::time::timeout(timeout, guarded).await {
            Ok(Ok(Ok(mut result))) => {
                if result.metric_name.is_empty() {
                    result.metric_name = name;
                }
                return result.scoped(input.session_id(), input.span_id());
            }
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(panic)) => format!("Metric panicked: {}", panic_message(panic.as_ref())),
            Err(_) => format!("Metric timed out after {:?}", timeout),
        };

        warn!(
            metric = %name,
            entity = %input.entity_id(),
            error = %failure,
            "Metric invocation failed"
        );
        MetricResult::failure(name, level, failure).scoped(input.session_id(), input.span_id())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
