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

//! Repeated interaction loops

use super::session_input;
use crate::{Metric, MetricContext, MetricError, MetricInput};
use async_trait::async_trait;
use mce_core::span::chronological;
use mce_core::{AggregationLevel, EntityType, MetricResult};

const MIN_CYCLE_LEN: usize = 2;

/// Counts back-to-back repetitions in the time-ordered sequence of agent and
/// tool names, such as `planner, search, planner, search`.
pub struct CyclesCount;

impl CyclesCount {
    pub const NAME: &'static str = "CyclesCount";

    /// Scan left to right; at each position take the shortest block of at
    /// least two names that is immediately repeated, count it and skip past
    /// its first occurrence.
    pub fn count_contiguous_cycles<T: PartialEq>(seq: &[T]) -> usize {
        let n = seq.len();
        let mut cycles = 0;
        let mut i = 0;
        while i < n {
            let repeated = (MIN_CYCLE_LEN..=(n - i) / 2).find(|&k| seq[i..i + k] == seq[i + k..i + 2 * k]);
            match repeated {
                Some(k) => {
                    cycles += 1;
                    i += k;
                }
                None => i += 1,
            }
        }
        cycles
    }
}

#[async_trait]
impl Metric for CyclesCount {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn aggregation_level(&self) -> AggregationLevel {
        AggregationLevel::Session
    }

    fn description(&self) -> &str {
        "Count of contiguous cycles in agent and tool interactions"
    }

    async fn compute(&self, input: MetricInput<'_>, _ctx: &MetricContext) -> Result<MetricResult, MetricError> {
        let session = session_input(self.name(), &input)?;

        let events: Vec<&str> = chronological(
            session
                .spans
                .iter()
                .filter(|s| matches!(s.entity_type, EntityType::Agent | EntityType::Tool)),
        )
        .into_iter()
        .map(|s| s.entity_name.as_str())
        .collect();

        let cycles = Self::count_contiguous_cycles(&events);
        Ok(MetricResult::success(self.name(), AggregationLevel::Session, cycles)
            .with_description(self.description())
            .with_reasoning(self.description())
            .with_metadata("sequence_length", events.len()))
    }
}
