//! Trace events emitted during agent execution.
//!
//! The engine emits a linear, single-writer stream of [`TraceEvent`]s for
//! every run — one event per observable step, in the exact order the
//! engine produced them. Consumers attach an [`EventSink`] on the run
//! config (fire-and-forget, awaited at each suspension point) or consume
//! the same events through [`run_stream`](crate::runner::run_stream).
//!
//! Events serialize as `{"type": ..., "data": ...}` with snake_case tags.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{Message, ToolCall};
use crate::tool::{ClarificationOption, ToolReply};
use crate::usage::Usage;

/// Stage a guardrail runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailStage {
    /// Validating the user's initial message.
    Input,
    /// Validating the model's final content.
    Output,
}

/// An event in the execution trace of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
#[non_exhaustive]
pub enum TraceEvent {
    /// A run began.
    RunStart {
        /// Id of the run.
        run_id: String,
        /// Id of the trace the run belongs to.
        trace_id: String,
        /// Agent in control at start.
        agent: String,
    },

    /// A turn of the main loop began.
    TurnStart {
        /// One-based turn number.
        turn: u32,
        /// Agent in control this turn.
        agent: String,
    },

    /// The engine resolved the current agent and is preparing a step.
    AgentProcessing {
        /// The resolved agent.
        agent: String,
    },

    /// A model call is about to be issued.
    LlmCallStart {
        /// Agent issuing the call.
        agent: String,
        /// Model name, when resolved.
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        /// Number of messages in the request.
        message_count: usize,
    },

    /// A model call completed.
    LlmCallEnd {
        /// Agent that issued the call.
        agent: String,
        /// Token usage reported by the provider.
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    /// Token usage reported for the latest model call.
    TokenUsage {
        /// The usage record.
        usage: Usage,
    },

    /// The model requested tool calls.
    ToolRequests {
        /// The requested calls.
        tool_calls: Vec<ToolCall>,
    },

    /// A tool call is about to be validated and executed.
    ///
    /// This is the only hook whose [`EventSink::on_event`] return value is
    /// consulted: `Some(args)` replaces the call's arguments.
    BeforeToolExecution {
        /// The call being dispatched.
        tool_call: ToolCall,
        /// Parsed arguments about to be used.
        args: Value,
    },

    /// A tool execution began.
    ToolCallStart {
        /// Id of the call.
        tool_call_id: String,
        /// Name of the tool.
        tool_name: String,
        /// The (possibly replaced) arguments.
        args: Value,
    },

    /// A tool call finished with its canonical envelope.
    ///
    /// Halted placeholders are emitted here too so UIs can render pending
    /// approvals; they are never replayed to the model.
    ToolCallEnd {
        /// Id of the call.
        tool_call_id: String,
        /// Name of the tool.
        tool_name: String,
        /// The canonical reply envelope.
        reply: ToolReply,
        /// Execution time in milliseconds.
        duration_ms: u64,
    },

    /// Tool results are being appended for the next model round.
    ToolResultsToLlm {
        /// The tool reply messages.
        messages: Vec<Message>,
    },

    /// The model produced (or is producing) an assistant message.
    AssistantMessage {
        /// The message; a snapshot of the in-flight buffer when `partial`.
        message: Message,
        /// `true` for streaming snapshots, `false` for the final message.
        partial: bool,
    },

    /// Control passed from one agent to another.
    Handoff {
        /// Agent giving up control.
        from: String,
        /// Agent taking control.
        to: String,
    },

    /// A handoff target was not in the allow-list.
    HandoffDenied {
        /// Agent attempting the handoff.
        from: String,
        /// The rejected target.
        to: String,
    },

    /// The model asked the user a clarification question.
    ClarificationRequested {
        /// Identifier to key the answer by.
        clarification_id: String,
        /// The question.
        question: String,
        /// Selectable answers.
        options: Vec<ClarificationOption>,
    },

    /// A clarification answer was applied on resume.
    ClarificationProvided {
        /// The answered clarification.
        clarification_id: String,
        /// The selected option id.
        selected: String,
    },

    /// A guardrail check ran.
    GuardrailCheck {
        /// Stage of the check.
        stage: GuardrailStage,
        /// Name of the guardrail.
        name: String,
        /// Whether the check passed.
        valid: bool,
    },

    /// A guardrail vetoed the run.
    GuardrailViolation {
        /// Stage of the violation.
        stage: GuardrailStage,
        /// The guardrail's stated reason.
        reason: String,
    },

    /// A memory load/store/restore was performed.
    MemoryOperation {
        /// Operation label ("load", "store", "restore").
        operation: String,
        /// Conversation involved.
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        /// Number of messages involved.
        #[serde(skip_serializing_if = "Option::is_none")]
        message_count: Option<usize>,
    },

    /// Final content is being decoded against the agent's output schema.
    OutputParse {
        /// The agent whose schema applies.
        agent: String,
    },

    /// Final content did not conform to the output schema.
    DecodeError {
        /// Individual schema violations.
        issues: Vec<String>,
    },

    /// The run produced its final output.
    FinalOutput {
        /// The output value.
        output: Value,
    },

    /// A turn of the main loop ended.
    TurnEnd {
        /// One-based turn number.
        turn: u32,
    },

    /// The run terminated.
    RunEnd {
        /// Outcome tag: "completed", "error", or "interrupted".
        outcome: String,
    },
}

impl TraceEvent {
    /// The snake_case tag of this event.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RunStart { .. } => "run_start",
            Self::TurnStart { .. } => "turn_start",
            Self::AgentProcessing { .. } => "agent_processing",
            Self::LlmCallStart { .. } => "llm_call_start",
            Self::LlmCallEnd { .. } => "llm_call_end",
            Self::TokenUsage { .. } => "token_usage",
            Self::ToolRequests { .. } => "tool_requests",
            Self::BeforeToolExecution { .. } => "before_tool_execution",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolCallEnd { .. } => "tool_call_end",
            Self::ToolResultsToLlm { .. } => "tool_results_to_llm",
            Self::AssistantMessage { .. } => "assistant_message",
            Self::Handoff { .. } => "handoff",
            Self::HandoffDenied { .. } => "handoff_denied",
            Self::ClarificationRequested { .. } => "clarification_requested",
            Self::ClarificationProvided { .. } => "clarification_provided",
            Self::GuardrailCheck { .. } => "guardrail_check",
            Self::GuardrailViolation { .. } => "guardrail_violation",
            Self::MemoryOperation { .. } => "memory_operation",
            Self::OutputParse { .. } => "output_parse",
            Self::DecodeError { .. } => "decode_error",
            Self::FinalOutput { .. } => "final_output",
            Self::TurnEnd { .. } => "turn_end",
            Self::RunEnd { .. } => "run_end",
        }
    }

    /// Returns `true` for purely informational events a bounded consumer
    /// may drop under pressure. Contract-bearing events (`run_end`,
    /// `tool_call_end`, interruption signals) must never be dropped.
    #[must_use]
    pub const fn is_informational(&self) -> bool {
        matches!(
            self,
            Self::TurnStart { .. } | Self::TokenUsage { .. } | Self::AgentProcessing { .. }
        )
    }
}

/// Observer of trace events.
///
/// All methods have no-op defaults. The return value is consulted only for
/// [`TraceEvent::BeforeToolExecution`], where `Some(value)` replaces the
/// tool call's arguments — every other event ignores it. Do not rely on
/// side-channel control flow: return `None` unless replacing arguments.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Observe an event; optionally return a replacement value.
    async fn on_event(&self, event: &TraceEvent) -> Option<Value>;
}

/// An [`EventSink`] that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {
    async fn on_event(&self, _event: &TraceEvent) -> Option<Value> {
        None
    }
}
