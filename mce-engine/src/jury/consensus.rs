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

//! Grading schemas and verdict reduction

use super::JuryError;
use serde::{Deserialize, Serialize};

/// Answer format a judge is asked to produce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GradingSchema {
    /// 0 or 1; majority vote, ties resolve to 0
    Binary,
    /// Score in `[min, max]`; mean, disagreement past `tolerance`
    Numeric { min: f64, max: f64, tolerance: f64 },
}

impl GradingSchema {
    pub fn numeric(min: f64, max: f64, tolerance: f64) -> Self {
        GradingSchema::Numeric { min, max, tolerance }
    }

    /// Answer format appended to every judge prompt
    pub fn instructions(&self) -> String {
        match self {
            GradingSchema::Binary => r#"Respond with a JSON object of the form {"metric_score": <0 or 1>, "score_reasoning": "<short explanation>"}."#.to_string(),
            GradingSchema::Numeric { min, max, .. } => format!(
                r#"Respond with a JSON object of the form {{"metric_score": <number from {} to {}>, "score_reasoning": "<short explanation>"}}."#,
                min, max
            ),
        }
    }

    pub fn render(&self, prompt: &str) -> String {
        format!("{}\n\n{}", prompt.trim_end(), self.instructions())
    }

    pub fn check_score(&self, score: f64) -> Result<f64, JuryError> {
        let valid = match self {
            GradingSchema::Binary => score == 0.0 || score == 1.0,
            GradingSchema::Numeric { min, max, .. } => score.is_finite() && score >= *min && score <= *max,
        };
        if valid {
            Ok(score)
        } else {
            Err(JuryError::InvalidScore {
                score,
                expected: self.describe(),
            })
        }
    }

    pub fn describe(&self) -> String {
        match self {
            GradingSchema::Binary => "0 or 1".to_string(),
            GradingSchema::Numeric { min, max, .. } => format!("a number in [{}, {}]", min, max),
        }
    }

    /// Stable identity used in verdict cache keys
    pub fn cache_tag(&self) -> String {
        match self {
            GradingSchema::Binary => "binary".to_string(),
            GradingSchema::Numeric { min, max, tolerance } => format!("numeric:{}:{}:{}", min, max, tolerance),
        }
    }

    /// Consensus score and whether the judges disagreed.
    ///
    /// `votes` must not be empty.
    fn reduce(&self, votes: &[JudgeVerdict]) -> (f64, bool) {
        match self {
            GradingSchema::Binary => {
                let ones = votes.iter().filter(|v| v.score >= 0.5).count();
                let zeros = votes.len() - ones;
                let score = if ones > zeros { 1.0 } else { 0.0 };
                (score, ones > 0 && zeros > 0)
            }
            GradingSchema::Numeric { tolerance, .. } => {
                let mean = votes.iter().map(|v| v.score).sum::<f64>() / votes.len() as f64;
                let lo = votes.iter().map(|v| v.score).fold(f64::INFINITY, f64::min);
                let hi = votes.iter().map(|v| v.score).fold(f64::NEG_INFINITY, f64::max);
                (mean, hi - lo > *tolerance)
            }
        }
    }
}

/// One judge model's answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub model: String,
    pub score: f64,
    pub reasoning: String,
}

/// A judge model that was dropped from the pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeFailure {
    pub model: String,
    pub error: String,
}

/// Reduction of all surviving verdicts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusVerdict {
    pub score: f64,
    pub reasoning: String,
    pub votes: Vec<JudgeVerdict>,
    #[serde(default)]
    pub failures: Vec<JudgeFailure>,
    pub disagreement: bool,
}

impl ConsensusVerdict {
    /// Returns `None` when there are no votes
    pub fn from_votes(
        schema: &GradingSchema,
        votes: Vec<JudgeVerdict>,
        failures: Vec<JudgeFailure>,
    ) -> Option<Self> {
        if votes.is_empty() {
            return None;
        }
        let (score, disagreement) = schema.reduce(&votes);

        let reasoning = if votes.len() == 1 {
            votes[0].reasoning.clone()
        } else {
            votes
                .iter()
                .filter(|v| match schema {
                    GradingSchema::Binary => v.score == score,
                    GradingSchema::Numeric { .. } => true,
                })
                .map(|v| format!("[{}] {}", v.model, v.reasoning))
                .collect::<Vec<_>>()
                .join("\n")
        };

        Some(Self {
            score,
            reasoning,
            votes,
            failures,
            disagreement,
        })
    }

    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }
}
