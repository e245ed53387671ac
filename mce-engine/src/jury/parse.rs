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

//! Tolerant parsing of judge model output
//!
//! Models answer with plain JSON, JSON inside a markdown code fence, or a
//! Python dict literal (`{'score': 1, 'ok': True}`). Strict JSON is tried
//! first on every candidate, then the literal fallback.

use super::{GradingSchema, JuryError};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

const SCORE_KEYS: [&str; 2] = ["metric_score", "score"];
const REASONING_KEYS: [&str; 3] = ["score_reasoning", "reasoning", "explanation"];

fn fence_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*(.*?)```").ok())
        .as_ref()
}

/// Extract the JSON object a judge answered with
pub fn parse_payload(content: &str) -> Result<Map<String, Value>, JuryError> {
    let candidates = candidates(content);

    for candidate in &candidates {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
            return Ok(map);
        }
    }

    for candidate in &candidates {
        let Some(converted) = python_literal_to_json(candidate) else {
            continue;
        };
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&converted) {
            return Ok(map);
        }
    }

    Err(JuryError::Parse(preview(content)))
}

/// Score and reasoning from a parsed judge answer
pub fn read_verdict(payload: &Map<String, Value>, schema: &GradingSchema) -> Result<(f64, String), JuryError> {
    let raw = SCORE_KEYS
        .iter()
        .find_map(|key| payload.get(*key))
        .ok_or_else(|| JuryError::Parse("answer has no metric_score or score field".to_string()))?;

    let score = coerce_score(raw)
        .ok_or_else(|| JuryError::Parse(format!("score is not numeric: {}", raw)))?;
    let score = schema.check_score(score)?;

    let reasoning = REASONING_KEYS
        .iter()
        .find_map(|key| payload.get(*key))
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default();

    Ok((score, reasoning))
}

fn coerce_score(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(1.0),
            "false" | "no" => Some(0.0),
            other => other.parse::<f64>().ok(),
        },
        _ => None,
    }
    .filter(|score| score.is_finite())
}

fn candidates(content: &str) -> Vec<String> {
    let trimmed = content.trim();
    let mut out = vec![trimmed.to_string()];

    if let Some(pattern) = fence_pattern() {
        for capture in pattern.captures_iter(trimmed) {
            if let Some(inner) = capture.get(1) {
                out.push(inner.as_str().trim().to_string());
            }
        }
    }

    // Outermost braces, for answers with prose around the object
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            out.push(trimmed[start..=end].to_string());
        }
    }

    out.dedup();
    out
}

/// Rewrite a Python literal into JSON.
///
/// Handles single-quoted strings, `True`/`False`/`None` and trailing commas.
/// Returns `None` on an unterminated string.
pub fn python_literal_to_json(src: &str) -> Option<String> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = String::with_capacity(src.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let (text, next) = read_string(&chars, i)?;
                out.push_str(&serde_json::to_string(&text).ok()?);
                i = next;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                });
            }
            ',' => {
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if !matches!(chars.get(j), Some('}') | Some(']')) {
                    out.push(',');
                }
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }

    Some(out)
}

/// Read a quoted string starting at `start`; returns its text and the index after the closing quote
fn read_string(chars: &[char], start: usize) -> Option<(String, usize)> {
    let quote = chars[start];
    let mut text = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        let ch = chars[i];
        if ch == '\\' && i + 1 < chars.len() {
            match chars[i + 1] {
                'n' => text.push('\n'),
                't' => text.push('\t'),
                'r' => text.push('\r'),
                '\\' => text.push('\\'),
                '\'' => text.push('\''),
                '"' => text.push('"'),
                other => {
                    text.push('\\');
                    text.push(other);
                }
            }
            i += 2;
            continue;
        }
        if ch == quote {
            return Some((text, i + 1));
        }
        text.push(ch);
        i += 1;
    }
    None
}

fn preview(content: &str) -> String {
    const MAX: usize = 200;
    let trimmed = content.trim();
    if trimmed.chars().count() <= MAX {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(MAX).collect();
    format!("{}...", cut)
}
