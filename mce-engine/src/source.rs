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

//! Raw span sources
//!
//! A source hands the engine raw span records for a batch request. Sources
//! may use the batch config to prefilter, but the engine resolves the batch
//! itself afterwards, so returning a superset is always correct.

use async_trait::async_trait;
use mce_core::BatchConfig;
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid trace data: {0}")]
    Parse(String),

    #[error("Trace source unavailable: {0}")]
    Unavailable(String),
}

/// Supplier of raw span records
#[async_trait]
pub trait TraceSource: Send + Sync {
    async fn fetch(&self, batch: &BatchConfig) -> Result<Vec<Value>, SourceError>;
}

/// Records already in memory
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    records: Vec<Value>,
}

impl InMemorySource {
    pub fn new(records: Vec<Value>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl TraceSource for InMemorySource {
    async fn fetch(&self, _batch: &BatchConfig) -> Result<Vec<Value>, SourceError> {
        Ok(self.records.clone())
    }
}

/// Trace export file.
///
/// Accepts a JSON array of span records, an object wrapping the array under
/// `data` or `spans`, or newline-delimited JSON with one record per line.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TraceSource for JsonFileSource {
    async fn fetch(&self, _batch: &BatchConfig) -> Result<Vec<Value>, SourceError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::Io {
                path: self.path.clone(),
                source,
            })?;

        let records = parse_records(&content)?;
        debug!(path = %self.path.display(), records = records.len(), "Loaded trace file");
        Ok(records)
    }
}

/// Parse a JSON document or newline-delimited JSON into span records
pub fn parse_records(content: &str) -> Result<Vec<Value>, SourceError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(records)) => return Ok(records),
        Ok(Value::Object(mut wrapper)) => {
            for key in ["data", "spans"] {
                if let Some(Value::Array(records)) = wrapper.remove(key) {
                    return Ok(records);
                }
            }
            return Ok(vec![Value::Object(wrapper)]);
        }
        Ok(other) => {
            return Err(SourceError::Parse(format!(
                "expected an array of span records, found {}",
                json_kind(&other)
            )))
        }
        // Not a single document; try one record per line
        Err(_) => {}
    }

    let mut records = Vec::new();
    let mut rejected = 0usize;
    for (number, line) in trimmed.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                rejected += 1;
                warn!(line = number + 1, error = %e, "Skipping malformed trace line");
            }
        }
    }

    if records.is_empty() {
        return Err(SourceError::Parse(format!(
            "no parseable records ({} malformed lines)",
            rejected
        )));
    }
    Ok(records)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
