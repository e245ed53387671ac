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

//! # MCE Core
//!
//! Trace data model and processing for multi-agent telemetry.
//!
//! ## Features
//!
//! - **Trace parsing**: flattened OTel rows and Jaeger rows into typed spans
//! - **Session aggregation**: grouping, filtering and recency selection
//! - **Enrichment**: conversation, transitions, execution tree, workflow and end-to-end attributes
//! - **Batch resolution**: `num_sessions`, `time_range` and `app_name` selection
//!
//! ## Example
//!
//! ```rust,ignore
//! use mce_core::{BatchConfig, TraceProcessor};
//!
//! let raw: Vec<serde_json::Value> = load_rows();
//! let sessions = TraceProcessor::new().process_raw_traces(&raw);
//! let batch = BatchConfig::most_recent(10).resolve(&sessions)?;
//! for session in batch.iter() {
//!     println!("{} spans in {}", session.span_count(), session.session_id);
//! }
//! ```

pub mod batch;
pub mod conventions;
pub mod enrichment;
pub mod error;
pub mod metric_result;
pub mod parser;
pub mod processor;
pub mod session;
pub mod span;

pub use batch::{BatchConfig, BatchSelection, TimeRange};
pub use enrichment::{attribute_keys, DataPipeline, SessionTransformer};
pub use error::{BatchError, EnrichmentError, ParseError};
pub use metric_result::{AggregationLevel, MetricResult, MetricValue};
pub use parser::parse_raw_spans;
pub use processor::TraceProcessor;
pub use session::{
    DurationStrategy, SessionAggregator, SessionEntity, SessionFilter, SessionSet, TimeWindow,
    UNKNOWN_SESSION_ID,
};
pub use span::{EntityType, Payload, SpanEntity, TokenUsage, ToolDefinition};
