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

//! Parent/child span forest
//!
//! Partial traces are common: a span whose parent is not in the session
//! becomes an additional root. Parent cycles are broken at the earliest
//! unvisited span so every span appears exactly once.
//!
//! The forest is stored flat, nodes in pre-order with children as indices,
//! so parent chains of any length build, serialize and drop without
//! recursion.

use super::{attribute_keys, to_value, SessionTransformer};
use crate::error::EnrichmentError;
use crate::session::SessionEntity;
use crate::span::{EntityType, SpanEntity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionNode {
    pub span_id: String,
    pub entity_type: EntityType,
    pub entity_name: String,
    pub start_time: Option<f64>,
    pub duration_ms: f64,
    pub contains_error: bool,
    /// Index of the parent node, `None` for roots
    pub parent: Option<usize>,
    /// Indices of child nodes in start order
    pub children: Vec<usize>,
    /// 1 for roots
    pub depth: usize,
}

impl ExecutionNode {
    fn new(span: &SpanEntity, parent: Option<usize>, depth: usize) -> Self {
        Self {
            span_id: span.span_id.clone(),
            entity_type: span.entity_type,
            entity_name: span.entity_name.clone(),
            start_time: span.start_time,
            duration_ms: span.duration_ms,
            contains_error: span.contains_error,
            parent,
            children: Vec::new(),
            depth,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTree {
    /// Every node in pre-order
    pub nodes: Vec<ExecutionNode>,
    /// Indices of root nodes
    pub roots: Vec<usize>,
    pub node_count: usize,
    pub depth: usize,
}

impl ExecutionTree {
    pub fn build(spans: &[SpanEntity]) -> Self {
        let order = start_order(spans);

        // First span wins when ids repeat
        let mut index_of: HashMap<&str, usize> = HashMap::new();
        for &i in &order {
            index_of.entry(spans[i].span_id.as_str()).or_insert(i);
        }
        let canonical = |i: usize| index_of.get(spans[i].span_id.as_str()) == Some(&i);

        let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut roots = Vec::new();
        for &i in &order {
            if !canonical(i) {
                continue;
            }
            let parent = spans[i]
                .parent_span_id
                .as_deref()
                .and_then(|p| index_of.get(p).copied())
                .filter(|&p| p != i);
            match parent {
                Some(p) => children.entry(p).or_default().push(i),
                None => roots.push(i),
            }
        }

        let mut tree = Self::default();
        let mut visited = HashSet::new();
        for root in roots {
            tree.walk(spans, root, &children, &mut visited);
        }

        // Spans left unvisited sit on a parent cycle
        for &i in &order {
            if canonical(i) && !visited.contains(&i) {
                tree.walk(spans, i, &children, &mut visited);
            }
        }

        tree.node_count = tree.nodes.len();
        tree
    }

    /// Depth-first from one root with an explicit stack
    fn walk(
        &mut self,
        spans: &[SpanEntity],
        root: usize,
        children: &HashMap<usize, Vec<usize>>,
        visited: &mut HashSet<usize>,
    ) {
        let mut stack: Vec<(usize, Option<usize>, usize)> = vec![(root, None, 1)];
        while let Some((index, parent, depth)) = stack.pop() {
            if !visited.insert(index) {
                continue;
            }

            let node = self.nodes.len();
            self.nodes.push(ExecutionNode::new(&spans[index], parent, depth));
            match parent {
                Some(p) => self.nodes[p].children.push(node),
                None => self.roots.push(node),
            }
            self.depth = self.depth.max(depth);

            if let Some(kids) = children.get(&index) {
                // Reversed so siblings pop in start order
                for &child in kids.iter().rev() {
                    if !visited.contains(&child) {
                        stack.push((child, Some(node), depth + 1));
                    }
                }
            }
        }
    }

    pub fn node(&self, index: usize) -> Option<&ExecutionNode> {
        self.nodes.get(index)
    }

    pub fn root_nodes(&self) -> impl Iterator<Item = &ExecutionNode> {
        self.roots.iter().filter_map(|&i| self.nodes.get(i))
    }

    pub fn children_of<'a>(&'a self, node: &'a ExecutionNode) -> impl Iterator<Item = &'a ExecutionNode> {
        node.children.iter().filter_map(|&i| self.nodes.get(i))
    }

    pub fn find(&self, span_id: &str) -> Option<&ExecutionNode> {
        self.nodes.iter().find(|node| node.span_id == span_id)
    }
}

fn start_order(spans: &[SpanEntity]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..spans.len()).collect();
    order.sort_by(|&a, &b| spans[a].sort_key().total_cmp(&spans[b].sort_key()));
    order
}

/// Ancestors of a span, nearest first
pub fn ancestors<'a>(session: &'a SessionEntity, span_id: &str) -> Vec<&'a SpanEntity> {
    let by_id: HashMap<&str, &SpanEntity> = session
        .spans
        .iter()
        .rev()
        .map(|s| (s.span_id.as_str(), s))
        .collect();

    let mut chain = Vec::new();
    let mut seen: HashSet<&str> = HashSet::from([span_id]);
    let mut current = by_id.get(span_id).and_then(|s| s.parent_span_id.as_deref());

    while let Some(parent_id) = current {
        if !seen.insert(parent_id) {
            break;
        }
        let Some(parent) = by_id.get(parent_id) else {
            break;
        };
        chain.push(*parent);
        current = parent.parent_span_id.as_deref();
    }
    chain
}

/// Writes `execution_tree`
pub struct ExecutionTreeTransformer;

impl SessionTransformer for ExecutionTreeTransformer {
    fn key(&self) -> &'static str {
        attribute_keys::EXECUTION_TREE
    }

    fn derive(&self, session: &SessionEntity) -> Result<Value, EnrichmentError> {
        to_value(self.key(), &ExecutionTree::build(&session.spans))
    }

    fn default_value(&self) -> Value {
        serde_json::json!({"nodes": [], "roots": [], "node_count": 0, "depth": 0})
    }
}
