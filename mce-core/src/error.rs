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

//! Error types for trace parsing, enrichment and batch resolution

use thiserror::Error;

/// Errors raised while parsing a single raw span record.
///
/// These never escape [`crate::parser::parse_raw_spans`]; a record that
/// fails is logged and skipped.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Record is not an object")]
    NotAnObject,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Errors raised by a single enrichment stage
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("Stage {stage} failed: {reason}")]
    Stage { stage: &'static str, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while validating or resolving a batch configuration
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Invalid batch config: {0}")]
    InvalidConfig(String),

    #[error("Invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("No sessions found for {0}")]
    NoSessions(String),
}

impl BatchError {
    /// Whether the error is caused by the caller's input rather than the data
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BatchError::InvalidConfig(_) | BatchError::InvalidTimestamp { .. }
        )
    }
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;
pub type BatchResult<T> = std::result::Result<T, BatchError>;
