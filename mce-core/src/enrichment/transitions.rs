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

//! Agent hand-offs

use super::{attribute_keys, to_value, SessionTransformer};
use crate::error::EnrichmentError;
use crate::session::SessionEntity;
use crate::span::{chronological, EntityType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Control passing from one agent to another
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentTransition {
    pub from: String,
    pub to: String,
}

impl AgentTransition {
    /// `"from -> to"` label
    pub fn label(&self) -> String {
        format!("{} -> {}", self.from, self.to)
    }
}

/// Writes `agent_transitions`: every change of active agent, in start order.
///
/// Consecutive spans of the same agent produce no transition.
pub struct AgentTransitionTransformer;

impl AgentTransitionTransformer {
    pub fn transitions(session: &SessionEntity) -> Vec<AgentTransition> {
        let agents = chronological(session.spans_of(EntityType::Agent));

        let mut transitions = Vec::new();
        let mut active: Option<&str> = None;
        for span in agents {
            let name = span.entity_name.as_str();
            if let Some(previous) = active {
                if previous != name {
                    transitions.push(AgentTransition {
                        from: previous.to_string(),
                        to: name.to_string(),
                    });
                }
            }
            active = Some(name);
        }
        transitions
    }
}

impl SessionTransformer for AgentTransitionTransformer {
    fn key(&self) -> &'static str {
        attribute_keys::AGENT_TRANSITIONS
    }

    fn derive(&self, session: &SessionEntity) -> Result<Value, EnrichmentError> {
        to_value(self.key(), &Self::transitions(session))
    }

    fn default_value(&self) -> Value {
        Value::Array(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SpanEntity;

    fn session(agents: &[(&str, f64)]) -> SessionEntity {
        let mut session = SessionEntity::new("s");
        session.spans = agents
            .iter()
            .enumerate()
            .map(|(i, (name, start))| {
                SpanEntity::new(format!("span_{}", i), EntityType::Agent, *name).with_timing(*start, 1.0)
            })
            .collect();
        session
    }

    #[test]
    fn test_same_agent_has_no_transition() {
        let s = session(&[("agent_a", 1.0), ("agent_a", 2.0)]);
        assert!(AgentTransitionTransformer::transitions(&s).is_empty());
    }

    #[test]
    fn test_agent_change_yields_one_transition() {
        let s = session(&[("agent_a", 1.0), ("agent_b", 2.0)]);
        assert_eq!(
            AgentTransitionTransformer::transitions(&s),
            vec![AgentTransition {
                from: "agent_a".to_string(),
                to: "agent_b".to_string()
            }]
        );
    }

    #[test]
    fn test_temporal_order_and_non_agents_ignored() {
        let mut s = session(&[("c", 30.0), ("a", 10.0), ("b", 20.0), ("b", 25.0), ("a", 40.0)]);
        s.spans.push(SpanEntity::new("tool", EntityType::Tool, "search").with_timing(15.0, 1.0));

        let labels: Vec<String> = AgentTransitionTransformer::transitions(&s)
            .iter()
            .map(AgentTransition::label)
            .collect();
        assert_eq!(labels, vec!["a -> b", "b -> c", "c -> a"]);
    }
}
