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

//! Judge prompt templates

pub const JUDGE_SYSTEM_PROMPT: &str =
    "You are a fair judge assistant tasked with grading a response. Respond only with valid JSON.";

/// Labels attached to binary judgments
pub mod labels {
    pub const GROUNDED: &str = "grounded";
    pub const NOT_GROUNDED: &str = "not_grounded";
    pub const TOOL_USAGE_CORRECT: &str = "tool_usage_correct";
    pub const TOOL_USAGE_INCORRECT: &str = "tool_usage_incorrect";

    /// Pick the label for a 0/1 score
    pub fn binary(score: f64, positive: &'static str, negative: &'static str) -> &'static str {
        if score >= 0.5 {
            positive
        } else {
            negative
        }
    }
}

pub fn tool_utilization_accuracy(
    tool_input: &str,
    tool_name: &str,
    tool_definition: &str,
    tool_output: &str,
) -> String {
    format!(
        r#"You are assessing whether an AI agent used a tool accurately for the request it was handling.

Input: {tool_input}

Tool called: {tool_name}

Tool definition: {tool_definition}

Output: {tool_output}

Task: decide whether calling this tool was a reasonable response to the input, and whether the tool output addresses what the input needed.

Scoring rubric:
1: The tool call was reasonable and its output addressed the input.
0: It is unclear why the tool was called, or its output was not useful."#
    )
}

pub fn groundedness(conversation: &str) -> String {
    format!(
        r#"You are evaluating groundedness: how well each response in a conversation is supported by verifiable data rather than speculation or hallucination.

Criteria:
- Responses rely on information from the provided data, knowledge bases or tool outputs.
- Responses avoid speculation, hallucinations and misleading statements.
- Factual accuracy holds for the whole conversation.

Scoring rubric:
1: Every response is grounded in the context available through the tools and the conversation.
0: Some response contains details not supported by that context.

CONVERSATION:
{conversation}"#
    )
}
