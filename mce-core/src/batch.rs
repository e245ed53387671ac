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

//! Batch selection of sessions

use crate::error::{BatchError, BatchResult};
use crate::session::{SessionSet, TimeWindow};
use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// Inclusive RFC 3339 time range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

/// Which sessions a metrics request covers; exactly one mode must be set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub num_sessions: Option<usize>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    #[serde(default)]
    pub app_name: Option<String>,
}

/// Validated batch mode
#[derive(Debug, Clone, PartialEq)]
pub enum BatchSelection {
    MostRecent(usize),
    StartedWithin(TimeWindow),
    App(String),
}

impl BatchConfig {
    pub fn most_recent(num_sessions: usize) -> Self {
        Self {
            num_sessions: Some(num_sessions),
            ..Self::default()
        }
    }

    pub fn time_range(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            time_range: Some(TimeRange {
                start: start.into(),
                end: end.into(),
            }),
            ..Self::default()
        }
    }

    pub fn app(app_name: impl Into<String>) -> Self {
        Self {
            app_name: Some(app_name.into()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> BatchResult<BatchSelection> {
        let modes = [
            self.num_sessions.is_some(),
            self.time_range.is_some(),
            self.app_name.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();

        if modes != 1 {
            return Err(BatchError::InvalidConfig(
                "exactly one of num_sessions, time_range or app_name must be set".to_string(),
            ));
        }

        if let Some(n) = self.num_sessions {
            if n == 0 {
                return Err(BatchError::InvalidConfig(
                    "num_sessions must be greater than zero".to_string(),
                ));
            }
            return Ok(BatchSelection::MostRecent(n));
        }

        if let Some(range) = &self.time_range {
            let start = parse_rfc3339_millis(&range.start)?;
            let end = parse_rfc3339_millis(&range.end)?;
            if start > end {
                return Err(BatchError::InvalidConfig(format!(
                    "time_range start {} is after end {}",
                    range.start, range.end
                )));
            }
            return Ok(BatchSelection::StartedWithin(TimeWindow::new(start, end)));
        }

        match self.app_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Ok(BatchSelection::App(name.to_string())),
            _ => Err(BatchError::InvalidConfig("app_name must not be empty".to_string())),
        }
    }

    /// Select sessions, newest first.
    ///
    /// An empty selection is an error so callers can tell "no data" apart
    /// from an empty metric result.
    pub fn resolve(&self, sessions: &SessionSet) -> BatchResult<SessionSet> {
        let selection = self.validate()?;
        let selected = match &selection {
            BatchSelection::MostRecent(n) => sessions.most_recent(*n),
            BatchSelection::StartedWithin(window) => sessions.started_within(*window),
            BatchSelection::App(name) => {
                let matching = sessions.for_app(name);
                let count = matching.len();
                matching.most_recent(count)
            }
        };

        if selected.is_empty() {
            return Err(BatchError::NoSessions(self.describe()));
        }
        Ok(selected)
    }

    pub fn describe(&self) -> String {
        if let Some(n) = self.num_sessions {
            format!("the {} most recent sessions", n)
        } else if let Some(range) = &self.time_range {
            format!("time range {} to {}", range.start, range.end)
        } else if let Some(app) = &self.app_name {
            format!("app '{}'", app)
        } else {
            "an empty batch config".to_string()
        }
    }
}

fn parse_rfc3339_millis(value: &str) -> BatchResult<f64> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.timestamp_micros() as f64 / 1000.0)
        .map_err(|e| BatchError::InvalidTimestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })
}
