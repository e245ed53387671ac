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

//! Attribute keys used by agent instrumentation libraries
//!
//! Covers the OpenTelemetry GenAI conventions, Traceloop/OpenLLMetry entity
//! attributes and the IOA observe SDK attributes, plus the column names of
//! flattened span exports and Jaeger JSON.

/// Span attribute keys
pub mod keys {
    // GenAI (LLM spans)
    pub const PROMPT_PREFIX: &str = "gen_ai.prompt";
    pub const COMPLETION_PREFIX: &str = "gen_ai.completion";
    pub const REQUEST_MODEL: &str = "gen_ai.request.model";
    pub const RESPONSE_MODEL: &str = "gen_ai.response.model";
    pub const TEMPERATURE: &str = "gen_ai.request.temperature";
    pub const PROMPT_TOKENS: &str = "gen_ai.usage.prompt_tokens";
    pub const INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";
    pub const COMPLETION_TOKENS: &str = "gen_ai.usage.completion_tokens";
    pub const OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";
    pub const GEN_AI_TOTAL_TOKENS: &str = "gen_ai.usage.total_tokens";
    pub const LLM_TOTAL_TOKENS: &str = "llm.usage.total_tokens";
    pub const CACHE_READ_TOKENS: &str = "gen_ai.usage.cache_read_input_tokens";
    pub const REQUEST_FUNCTIONS_PREFIX: &str = "llm.request.functions";

    // Traceloop entity attributes (tools, tasks, workflows)
    pub const ENTITY_NAME: &str = "traceloop.entity.name";
    pub const ENTITY_INPUT: &str = "traceloop.entity.input";
    pub const ENTITY_OUTPUT: &str = "traceloop.entity.output";
    pub const ENTITY_ERROR: &str = "traceloop.entity.error";
    pub const ENTITY_MESSAGE: &str = "traceloop.entity.message";
    pub const TRACELOOP_WORKFLOW_NAME: &str = "traceloop.workflow.name";

    // IOA observe attributes (agents, workflows, graphs)
    pub const AGENT_NAME: &str = "ioa_observe.entity.name";
    pub const AGENT_INPUT: &str = "ioa_observe.entity.input";
    pub const AGENT_OUTPUT: &str = "ioa_observe.entity.output";
    pub const WORKFLOW_NAME: &str = "ioa_observe.workflow.name";
    pub const IOA_WORKFLOW_NAME: &str = "ioa_workflow.name";
    pub const START_TIME: &str = "ioa_start_time";
    pub const AGENT_ID: &str = "agent_id";

    // Session and application identity
    pub const SESSION_ID: &str = "session.id";
    pub const EXECUTION_ID: &str = "execution.id";
    pub const APP_NAME: &str = "app.name";
    pub const SERVICE_NAME: &str = "service.name";
    pub const APPLICATION_NAME: &str = "application.name";
}

/// Column names of flattened span exports
pub mod columns {
    pub const SPAN_NAME: &str = "SpanName";
    pub const SPAN_ID: &str = "SpanId";
    pub const PARENT_SPAN_ID: &str = "ParentSpanId";
    pub const TRACE_ID: &str = "TraceId";
    pub const SERVICE_NAME: &str = "ServiceName";
    pub const TIMESTAMP: &str = "Timestamp";
    pub const DURATION: &str = "Duration";
    pub const END_TIMESTAMP: &str = "EndTimestamp";
    pub const SPAN_ATTRIBUTES: &str = "SpanAttributes";
    pub const RESOURCE_ATTRIBUTES: &str = "ResourceAttributes";
    pub const STATUS_CODE: &str = "StatusCode";
}

/// Field names of Jaeger JSON spans
pub mod jaeger {
    pub const OPERATION_NAME: &str = "operationName";
    pub const TAGS: &str = "tags";
    pub const SERVICE_NAME: &str = "serviceName";
    pub const SPAN_ID: &str = "spanId";
    pub const PARENT_ID: &str = "parentId";
    pub const TRACE_ID: &str = "traceId";
    pub const START_TIME: &str = "startTime";
    pub const DURATION_MICROS: &str = "durationMicros";
}

/// Substrings that mark a payload as carrying an error
pub const ERROR_MARKERS: [&str; 3] = ["traceback", "exception", "httperror"];

/// Application name used when no source attribute is present
pub const UNKNOWN_APP: &str = "unknown-app";

/// Entity name used when no name attribute is present
pub const UNKNOWN_ENTITY: &str = "unknown";
