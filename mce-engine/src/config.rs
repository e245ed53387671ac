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

use crate::llm_client::DEFAULT_BASE_URL;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Placeholder key shipped in example requests
pub const PLACEHOLDER_API_KEY: &str = "sk-...";

pub const ENV_BASE_URL: &str = "LLM_BASE_MODEL_URL";
pub const ENV_MODEL_NAME: &str = "LLM_MODEL_NAME";
pub const ENV_API_KEY: &str = "LLM_API_KEY";
pub const ENV_MAX_CONCURRENT: &str = "MCE_MAX_CONCURRENT";
pub const ENV_METRIC_TIMEOUT: &str = "MCE_METRIC_TIMEOUT_SECS";
pub const ENV_JUDGE_TIMEOUT: &str = "MCE_JUDGE_TIMEOUT_SECS";
pub const ENV_LOG_LEVEL: &str = "MCE_LOG_LEVEL";

/// Process environment as a variable lookup
fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Metrics engine configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub processor: ProcessorSettings,
    #[serde(default)]
    pub judge: JudgeSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorSettings {
    /// Maximum metric invocations in flight
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Timeout per metric invocation in seconds
    #[serde(default = "default_metric_timeout")]
    pub metric_timeout_secs: u64,

    /// Deadline for a whole compute call in seconds
    #[serde(default)]
    pub deadline_secs: Option<u64>,

    /// Return completed results when the deadline passes
    #[serde(default = "default_best_effort")]
    pub best_effort: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JudgeSettings {
    /// Judge models forming the jury
    #[serde(default)]
    pub models: Vec<LLMJudgeConfig>,

    /// Timeout per judge call in seconds
    #[serde(default = "default_judge_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_enable_cache")]
    pub enable_cache: bool,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Connection details for one judge model
///
/// Accepts the upper-case field names used by the REST request payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LLMJudgeConfig {
    #[serde(alias = "LLM_MODEL_NAME", default = "default_model_name")]
    pub model_name: String,

    #[serde(alias = "LLM_BASE_MODEL_URL", default)]
    pub base_url: Option<String>,

    #[serde(alias = "LLM_API_KEY", alias = "OPENAI_API_KEY", alias = "CUSTOM_API_KEY", default)]
    pub api_key: Option<String>,
}

impl Default for LLMJudgeConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            base_url: Some(DEFAULT_BASE_URL.to_string()),
            api_key: Some(PLACEHOLDER_API_KEY.to_string()),
        }
    }
}

impl LLMJudgeConfig {
    /// API key, unless missing, blank or the placeholder
    pub fn usable_api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty() && *k != PLACEHOLDER_API_KEY)
    }

    pub fn is_usable(&self) -> bool {
        self.usable_api_key().is_some() && !self.model_name.trim().is_empty()
    }

    /// Judge model from `LLM_*` environment variables, when a key is set
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(process_env)
    }

    /// Judge model from `LLM_*` variables resolved through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            model_name: lookup(ENV_MODEL_NAME).unwrap_or_else(default_model_name),
            base_url: Some(lookup(ENV_BASE_URL).unwrap_or_else(|| DEFAULT_BASE_URL.to_string())),
            api_key: Some(lookup(ENV_API_KEY)?),
        };
        config.is_usable().then_some(config)
    }
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            metric_timeout_secs: default_metric_timeout(),
            deadline_secs: None,
            best_effort: default_best_effort(),
        }
    }
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            timeout_secs: default_judge_timeout(),
            enable_cache: default_enable_cache(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// Default values
fn default_max_concurrent() -> usize {
    10
}

fn default_metric_timeout() -> u64 {
    120
}

fn default_best_effort() -> bool {
    true
}

fn default_judge_timeout() -> u64 {
    60
}

fn default_enable_cache() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_model_name() -> String {
    "gpt-4-turbo".to_string()
}

impl EngineConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// Supported environment variables:
    /// - LLM_BASE_MODEL_URL: judge endpoint (default: https://api.openai.com/v1)
    /// - LLM_MODEL_NAME: judge model (default: gpt-4-turbo)
    /// - LLM_API_KEY: judge API key; no judge is configured without it
    /// - MCE_MAX_CONCURRENT: metric invocations in flight (default: 10)
    /// - MCE_METRIC_TIMEOUT_SECS: per-metric timeout (default: 120)
    /// - MCE_JUDGE_TIMEOUT_SECS: per judge call timeout (default: 60)
    /// - MCE_LOG_LEVEL: log level (default: info)
    pub fn from_env() -> Self {
        Self::from_lookup(&process_env)
    }

    /// Same as [`EngineConfig::from_env`], resolving variables through `lookup`
    pub fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(model) = LLMJudgeConfig::from_lookup(lookup) {
            config.judge.models = vec![model];
        }

        if let Some(val) = lookup(ENV_MAX_CONCURRENT).and_then(|v| v.parse().ok()) {
            config.processor.max_concurrent = val;
        }

        if let Some(val) = lookup(ENV_METRIC_TIMEOUT).and_then(|v| v.parse().ok()) {
            config.processor.metric_timeout_secs = val;
        }

        if let Some(val) = lookup(ENV_JUDGE_TIMEOUT).and_then(|v| v.parse().ok()) {
            config.judge.timeout_secs = val;
        }

        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            config.logging.level = level;
        }

        config
    }

    /// Load configuration: defaults, then the file, then explicitly set env vars
    pub fn load(config_file: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_file {
            if path.exists() {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            } else {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
        } else {
            Self::default()
        };

        config = Self::merge_with(config, &process_env);
        config.validate()?;

        Ok(config)
    }

    /// Merge config with environment variables (env takes priority).
    ///
    /// The environment judge model only applies when no models are configured.
    fn merge_with<F>(mut config: Self, lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_config = Self::from_lookup(lookup);

        if config.judge.models.is_empty() {
            config.judge.models = env_config.judge.models;
        }

        // Only override if env var was explicitly set
        if lookup(ENV_MAX_CONCURRENT).is_some() {
            config.processor.max_concurrent = env_config.processor.max_concurrent;
        }
        if lookup(ENV_METRIC_TIMEOUT).is_some() {
            config.processor.metric_timeout_secs = env_config.processor.metric_timeout_secs;
        }
        if lookup(ENV_JUDGE_TIMEOUT).is_some() {
            config.judge.timeout_secs = env_config.judge.timeout_secs;
        }
        if lookup(ENV_LOG_LEVEL).is_some() {
            config.logging.level = env_config.logging.level;
        }

        config
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processor.max_concurrent == 0 {
            return Err(ConfigError::Invalid("processor.max_concurrent must be > 0".to_string()));
        }
        if self.processor.metric_timeout_secs == 0 {
            return Err(ConfigError::Invalid("processor.metric_timeout_secs must be > 0".to_string()));
        }
        if self.processor.deadline_secs == Some(0) {
            return Err(ConfigError::Invalid("processor.deadline_secs must be > 0".to_string()));
        }
        if self.judge.timeout_secs == 0 {
            return Err(ConfigError::Invalid("judge.timeout_secs must be > 0".to_string()));
        }
        if let Some(model) = self.judge.models.iter().find(|m| m.model_name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "judge model with base url {:?} has no model_name",
                model.base_url
            )));
        }
        Ok(())
    }

    pub fn metric_timeout(&self) -> Duration {
        Duration::from_secs(self.processor.metric_timeout_secs)
    }

    pub fn judge_timeout(&self) -> Duration {
        Duration::from_secs(self.judge.timeout_secs)
    }

    /// Judge models for a request: a usable request-level config wins,
    /// otherwise the configured models
    pub fn judge_models_for(&self, request: Option<&LLMJudgeConfig>) -> Vec<LLMJudgeConfig> {
        match request {
            Some(config) if config.is_usable() => {
                let mut config = config.clone();
                if config.base_url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                    config.base_url = Some(DEFAULT_BASE_URL.to_string());
                }
                vec![config]
            }
            _ => self.judge.models.iter().filter(|m| m.is_usable()).cloned().collect(),
        }
    }
}
