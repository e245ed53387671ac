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

//! Session aggregation
//!
//! Groups parsed spans by session id into [`SessionEntity`] values and
//! provides the multi-criteria filtering used to select sessions for
//! metric computation.

use crate::span::{EntityType, SpanEntity};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Session id assigned to spans that carry none
pub const UNKNOWN_SESSION_ID: &str = "unknown";

/// How a session's duration is derived from its spans
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationStrategy {
    /// Latest span end minus earliest span start
    #[default]
    WallClock,
    /// Sum of the durations of root spans; wall clock when there are none
    RootSpan,
}

/// Spans sharing one session id, plus derived attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntity {
    pub session_id: String,
    /// Arrival order, not necessarily chronological
    pub spans: Vec<SpanEntity>,
    /// Epoch milliseconds
    pub start_time: Option<f64>,
    /// Epoch milliseconds
    pub end_time: Option<f64>,
    pub duration_ms: f64,
    /// Written only by enrichment stages, one key per stage
    #[serde(default)]
    pub enriched_attributes: BTreeMap<String, Value>,
}

impl SessionEntity {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            spans: Vec::new(),
            start_time: None,
            end_time: None,
            duration_ms: 0.0,
            enriched_attributes: BTreeMap::new(),
        }
    }

    /// Build a session from spans, stamping them with the session id
    pub fn from_spans(
        session_id: impl Into<String>,
        spans: Vec<SpanEntity>,
        strategy: DurationStrategy,
    ) -> Self {
        let mut session = Self::new(session_id);
        session.spans = spans
            .into_iter()
            .map(|mut span| {
                span.session_id = Some(session.session_id.clone());
                span
            })
            .collect();
        session.recompute_timing(strategy);
        session
    }

    pub fn recompute_timing(&mut self, strategy: DurationStrategy) {
        let start = self
            .spans
            .iter()
            .filter_map(|s| s.start_time)
            .min_by(f64::total_cmp);
        let end = self
            .spans
            .iter()
            .filter_map(|s| s.end_time.or(s.start_time))
            .max_by(f64::total_cmp);

        self.start_time = start;
        self.end_time = end;

        let wall_clock = match (start, end) {
            (Some(start), Some(end)) => (end - start).max(0.0),
            _ => 0.0,
        };

        self.duration_ms = match strategy {
            DurationStrategy::WallClock => wall_clock,
            DurationStrategy::RootSpan => {
                let mut roots = self.spans.iter().filter(|s| s.is_root()).peekable();
                if roots.peek().is_some() {
                    roots.map(|s| s.duration_ms).sum()
                } else {
                    wall_clock
                }
            }
        };
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn span(&self, span_id: &str) -> Option<&SpanEntity> {
        self.spans.iter().find(|s| s.span_id == span_id)
    }

    pub fn spans_of(&self, kind: EntityType) -> impl Iterator<Item = &SpanEntity> {
        self.spans.iter().filter(move |s| s.entity_type == kind)
    }

    pub fn has_entity_type(&self, kind: EntityType) -> bool {
        self.spans.iter().any(|s| s.entity_type == kind)
    }

    pub fn has_error(&self) -> bool {
        self.spans.iter().any(|s| s.contains_error)
    }

    pub fn has_app(&self, app_name: &str) -> bool {
        self.spans.iter().any(|s| s.app_name == app_name)
    }

    pub fn enriched(&self, key: &str) -> Option<&Value> {
        self.enriched_attributes.get(key)
    }

    /// Typed view of an enriched attribute
    pub fn enriched_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.enriched_attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_enriched(&mut self, key: impl Into<String>, value: Value) {
        self.enriched_attributes.insert(key.into(), value);
    }
}

/// Inclusive time window in epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_ms: f64,
    pub end_ms: f64,
}

impl TimeWindow {
    pub fn new(start_ms: f64, end_ms: f64) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn contains(&self, at_ms: f64) -> bool {
        at_ms >= self.start_ms && at_ms <= self.end_ms
    }

    pub fn overlaps(&self, start_ms: f64, end_ms: f64) -> bool {
        start_ms <= self.end_ms && end_ms >= self.start_ms
    }
}

/// Multi-criteria session filter; unset criteria always pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionFilter {
    /// Session contains at least one span of any of these kinds
    #[serde(default)]
    pub entity_types: Option<Vec<EntityType>>,
    #[serde(default)]
    pub has_error: Option<bool>,
    #[serde(default)]
    pub min_spans: Option<usize>,
    /// Session's span time range overlaps the window
    #[serde(default)]
    pub time_range: Option<TimeWindow>,
}

impl SessionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity_types(mut self, kinds: impl IntoIterator<Item = EntityType>) -> Self {
        self.entity_types = Some(kinds.into_iter().collect());
        self
    }

    pub fn with_error(mut self, has_error: bool) -> Self {
        self.has_error = Some(has_error);
        self
    }

    pub fn with_min_spans(mut self, min_spans: usize) -> Self {
        self.min_spans = Some(min_spans);
        self
    }

    pub fn with_time_range(mut self, window: TimeWindow) -> Self {
        self.time_range = Some(window);
        self
    }

    pub fn matches(&self, session: &SessionEntity) -> bool {
        let kinds_ok = self
            .entity_types
            .as_ref()
            .map_or(true, |kinds| kinds.iter().any(|k| session.has_entity_type(*k)));
        let error_ok = self.has_error.map_or(true, |want| session.has_error() == want);
        let size_ok = self.min_spans.map_or(true, |min| session.span_count() >= min);
        let time_ok = self.time_range.map_or(true, |window| {
            match (session.start_time, session.end_time) {
                (Some(start), Some(end)) => window.overlaps(start, end),
                _ => false,
            }
        });

        kinds_ok && error_ok && size_ok && time_ok
    }
}

/// Ordered collection of sessions handed to metric computation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSet {
    sessions: Vec<SessionEntity>,
}

impl SessionSet {
    pub fn new(sessions: Vec<SessionEntity>) -> Self {
        Self { sessions }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn sessions(&self) -> &[SessionEntity] {
        &self.sessions
    }

    pub fn into_sessions(self) -> Vec<SessionEntity> {
        self.sessions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SessionEntity> {
        self.sessions.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, SessionEntity> {
        self.sessions.iter_mut()
    }

    pub fn get(&self, session_id: &str) -> Option<&SessionEntity> {
        self.sessions.iter().find(|s| s.session_id == session_id)
    }

    pub fn session_ids(&self) -> Vec<&str> {
        self.sessions.iter().map(|s| s.session_id.as_str()).collect()
    }

    pub fn span_count(&self) -> usize {
        self.sessions.iter().map(SessionEntity::span_count).sum()
    }

    pub fn spans(&self) -> impl Iterator<Item = &SpanEntity> {
        self.sessions.iter().flat_map(|s| s.spans.iter())
    }

    pub fn filter(&self, criteria: &SessionFilter) -> SessionSet {
        self.sessions
            .iter()
            .filter(|s| criteria.matches(s))
            .cloned()
            .collect()
    }

    /// The `n` most recently started sessions, newest first.
    ///
    /// Sessions without a start time sort last.
    pub fn most_recent(&self, n: usize) -> SessionSet {
        let mut ordered = self.by_start_descending(self.sessions.iter());
        ordered.truncate(n);
        ordered.into_iter().cloned().collect()
    }

    /// Sessions whose start time falls inside the window, newest first
    pub fn started_within(&self, window: TimeWindow) -> SessionSet {
        let matching = self
            .sessions
            .iter()
            .filter(|s| s.start_time.map_or(false, |start| window.contains(start)));
        self.by_start_descending(matching)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Sessions containing at least one span from the application
    pub fn for_app(&self, app_name: &str) -> SessionSet {
        self.sessions
            .iter()
            .filter(|s| s.has_app(app_name))
            .cloned()
            .collect()
    }

    fn by_start_descending<'a, I>(&self, sessions: I) -> Vec<&'a SessionEntity>
    where
        I: IntoIterator<Item = &'a SessionEntity>,
    {
        let mut ordered: Vec<&SessionEntity> = sessions.into_iter().collect();
        ordered.sort_by(|a, b| match (a.start_time, b.start_time) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        ordered
    }
}

impl FromIterator<SessionEntity> for SessionSet {
    fn from_iter<I: IntoIterator<Item = SessionEntity>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl IntoIterator for SessionSet {
    type Item = SessionEntity;
    type IntoIter = std::vec::IntoIter<SessionEntity>;

    fn into_iter(self) -> Self::IntoIter {
        self.sessions.into_iter()
    }
}

impl<'a> IntoIterator for &'a SessionSet {
    type Item = &'a SessionEntity;
    type IntoIter = std::slice::Iter<'a, SessionEntity>;

    fn into_iter(self) -> Self::IntoIter {
        self.sessions.iter()
    }
}

/// Groups spans into sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionAggregator {
    strategy: DurationStrategy,
}

impl SessionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(strategy: DurationStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> DurationStrategy {
        self.strategy
    }

    /// Group spans by session id.
    ///
    /// Sessions appear in order of their first span; spans keep arrival
    /// order within a session. Spans without a session id are collected in
    /// the [`UNKNOWN_SESSION_ID`] session.
    pub fn aggregate(&self, spans: Vec<SpanEntity>) -> SessionSet {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<SpanEntity>> = HashMap::new();

        for span in spans {
            let key = span
                .session_id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_SESSION_ID.to_string());

            groups
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(span);
        }

        let sessions: SessionSet = order
            .into_iter()
            .filter_map(|id| {
                let spans = groups.remove(&id)?;
                Some(SessionEntity::from_spans(id, spans, self.strategy))
            })
            .collect();

        debug!(
            sessions = sessions.len(),
            spans = sessions.span_count(),
            "Aggregated spans into sessions"
        );
        sessions
    }

    pub fn filter(&self, sessions: &SessionSet, criteria: &SessionFilter) -> SessionSet {
        sessions.filter(criteria)
    }

    pub fn get_session<'a>(&self, sessions: &'a SessionSet, session_id: &str) -> Option<&'a SessionEntity> {
        sessions.get(session_id)
    }
}
