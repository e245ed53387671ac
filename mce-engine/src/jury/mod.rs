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

//! LLM jury: one or more judge models reduced to a single verdict
//!
//! Every judge gets the same rendered prompt concurrently. A judge that
//! errors, times out or answers with something unparseable is dropped from
//! the pool; the jury only fails when no judge is left.

pub mod cache;
pub mod consensus;
pub mod parse;

pub use cache::{CacheStats, VerdictCache, VerdictKey};
pub use consensus::{ConsensusVerdict, GradingSchema, JudgeFailure, JudgeVerdict};

use crate::config::LLMJudgeConfig;
use crate::llm_client::{JudgeClientFactory, LLMClient, LLMError};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum JuryError {
    #[error("LLM error: {0}")]
    Llm(#[from] LLMError),

    #[error("Judge timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unparseable verdict: {0}")]
    Parse(String),

    #[error("Invalid score {score}, expected {expected}")]
    InvalidScore { score: f64, expected: String },

    #[error("judge unavailable: {0}")]
    Unavailable(String),
}

pub struct Jury {
    judges: Vec<Arc<dyn LLMClient>>,
    timeout: Duration,
    cache: Option<Arc<VerdictCache>>,
}

impl Jury {
    pub fn new(judges: Vec<Arc<dyn LLMClient>>) -> Self {
        Self {
            judges,
            timeout: Duration::from_secs(60),
            cache: None,
        }
    }

    /// Build judges from configuration, skipping models the factory rejects
    pub fn from_configs(configs: &[LLMJudgeConfig], factory: &dyn JudgeClientFactory) -> Result<Self, JuryError> {
        let mut judges = Vec::new();
        for config in configs {
            match factory.create(config) {
                Ok(client) => judges.push(client),
                Err(e) => warn!(model = %config.model_name, error = %e, "Skipping judge model"),
            }
        }

        if judges.is_empty() {
            return Err(JuryError::Unavailable("no usable judge models configured".to_string()));
        }
        Ok(Self::new(judges))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cache(mut self, cache: Arc<VerdictCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn len(&self) -> usize {
        self.judges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.judges.is_empty()
    }

    pub fn models(&self) -> Vec<&str> {
        self.judges.iter().map(|j| j.model_name()).collect()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    /// Ask every judge and reduce the surviving verdicts
    pub async fn judge(&self, prompt: &str, schema: &GradingSchema) -> Result<ConsensusVerdict, JuryError> {
        if self.judges.is_empty() {
            return Err(JuryError::Unavailable("no judge models configured".to_string()));
        }

        let rendered = schema.render(prompt);
        let outcomes = join_all(
            self.judges
                .iter()
                .map(|judge| self.ask(judge.as_ref(), &rendered, schema)),
        )
        .await;

        let mut votes = Vec::new();
        let mut failures = Vec::new();
        for (judge, outcome) in self.judges.iter().zip(outcomes) {
            match outcome {
                Ok(verdict) => votes.push(verdict),
                Err(e) => {
                    warn!(model = judge.model_name(), error = %e, "Judge failed; excluding from consensus");
                    failures.push(JudgeFailure {
                        model: judge.model_name().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let summary = failures
            .iter()
            .map(|f| format!("{}: {}", f.model, f.error))
            .collect::<Vec<_>>()
            .join("; ");

        ConsensusVerdict::from_votes(schema, votes, failures).ok_or(JuryError::Unavailable(summary))
    }

    async fn ask(&self, judge: &dyn LLMClient, prompt: &str, schema: &GradingSchema) -> Result<JudgeVerdict, JuryError> {
        let key = VerdictKey::new(judge.model_name(), judge.endpoint(), prompt, schema);
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(&key).await {
                debug!(model = judge.model_name(), "Verdict cache hit");
                return Ok(cached);
            }
        }

        let response = tokio::time::timeout(self.timeout, judge.evaluate(prompt.to_string()))
            .await
            .map_err(|_| JuryError::Timeout(self.timeout))??;

        let payload = parse::parse_payload(&response.content)?;
        let (score, reasoning) = parse::read_verdict(&payload, schema)?;
        let verdict = JudgeVerdict {
            model: judge.model_name().to_string(),
            score,
            reasoning,
        };

        if let Some(cache) = &self.cache {
            cache.set(key, verdict.clone()).await;
        }
        Ok(verdict)
    }
}
