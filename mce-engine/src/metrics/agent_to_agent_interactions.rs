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

//! Agent hand-off counts

use super::session_input;
use crate::{Metric, MetricContext, MetricError, MetricInput};
use async_trait::async_trait;
use mce_core::enrichment::{attribute_keys, AgentTransition, AgentTransitionTransformer};
use mce_core::{AggregationLevel, MetricResult, MetricValue, SessionEntity};
use std::collections::BTreeMap;

/// Counts `"A -> B"` transitions between agents within a session
pub struct AgentToAgentInteractions;

impl AgentToAgentInteractions {
    pub const NAME: &'static str = "AgentToAgentInteractions";

    /// Enriched transitions, or recomputed ones when the session was not enriched
    fn transitions(session: &SessionEntity) -> Vec<AgentTransition> {
        session
            .enriched_as::<Vec<AgentTransition>>(attribute_keys::AGENT_TRANSITIONS)
            .unwrap_or_else(|| AgentTransitionTransformer::transitions(session))
    }
}

#[async_trait]
impl Metric for AgentToAgentInteractions {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn aggregation_level(&self) -> AggregationLevel {
        AggregationLevel::Session
    }

    fn description(&self) -> &str {
        "Number of times control passed between each pair of agents"
    }

    async fn compute(&self, input: MetricInput<'_>, _ctx: &MetricContext) -> Result<MetricResult, MetricError> {
        let session = session_input(self.name(), &input)?;
        let transitions = Self::transitions(session);

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut agents: Vec<&str> = Vec::new();
        for transition in &transitions {
            *counts.entry(transition.label()).or_default() += 1;
            for agent in [transition.from.as_str(), transition.to.as_str()] {
                if !agents.contains(&agent) {
                    agents.push(agent);
                }
            }
        }

        Ok(
            MetricResult::success(self.name(), AggregationLevel::Session, MetricValue::counts(counts))
                .with_description(self.description())
                .with_entities(agents)
                .with_metadata("total_transitions", transitions.len()),
        )
    }
}
