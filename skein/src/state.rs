//! Run state, approvals, interruptions, and run results.
//!
//! [`RunState`] is the per-step snapshot the engine threads through the
//! turn loop. The engine treats it as immutable: each step produces a new
//! state, and a caller-held state is never mutated in place. Interruption
//! and resume work entirely through this type — the caller re-enters
//! [`Runner::run`](crate::runner::Runner::run) with an updated approvals
//! or clarifications map and the engine picks up the pending tool calls.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::ids::{RunId, TraceId};
use crate::message::{Message, ToolCall};
use crate::tool::ClarificationOption;
use crate::usage::Usage;

/// Status of a pending tool-approval decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    /// Decision not made yet; the call still requires approval.
    Pending,
    /// The user approved the call; it executes on next encounter.
    Approved,
    /// The user rejected the call; a synthetic denial reply is produced.
    Rejected,
}

/// A recorded approval decision for one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalValue {
    /// Decision status.
    pub status: ApprovalStatus,
    /// Extra context merged into the run context for the single execution
    /// (approved calls), or carrying the rejection reason (rejected calls).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<Value>,
}

impl ApprovalValue {
    /// A pending decision.
    #[must_use]
    pub const fn pending() -> Self {
        Self {
            status: ApprovalStatus::Pending,
            additional_context: None,
        }
    }

    /// An approval without extra context.
    #[must_use]
    pub const fn approved() -> Self {
        Self {
            status: ApprovalStatus::Approved,
            additional_context: None,
        }
    }

    /// An approval carrying extra context for the execution.
    #[must_use]
    pub const fn approved_with(context: Value) -> Self {
        Self {
            status: ApprovalStatus::Approved,
            additional_context: Some(context),
        }
    }

    /// A rejection, optionally carrying a reason.
    #[must_use]
    pub fn rejected(reason: Option<&str>) -> Self {
        Self {
            status: ApprovalStatus::Rejected,
            additional_context: reason
                .map(|r| serde_json::json!({ "rejectionReason": r })),
        }
    }

    /// The rejection reason, if one was recorded.
    #[must_use]
    pub fn rejection_reason(&self) -> Option<String> {
        let ctx = self.additional_context.as_ref()?;
        ctx.get("rejectionReason")
            .or_else(|| ctx.get("rejection_reason"))
            .and_then(Value::as_str)
            .map(str::to_owned)
    }
}

/// A first-class pause outcome awaiting caller action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Interruption {
    /// A tool call awaits human approval.
    ToolApproval {
        /// The call requiring approval.
        tool_call: ToolCall,
        /// Name of the agent that issued the call.
        agent: String,
        /// The conversation this run belongs to, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// The model asked the user a multiple-choice question.
    ClarificationRequired {
        /// Identifier to key the answer by.
        clarification_id: String,
        /// The question to put to the user.
        question: String,
        /// Selectable answers.
        options: Vec<ClarificationOption>,
        /// Extra context attached by the tool.
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
    },
}

/// Immutable per-step snapshot of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Id of this engine invocation.
    pub run_id: RunId,
    /// Id of the logical trace this run belongs to.
    pub trace_id: TraceId,
    /// Conversation messages accumulated so far.
    pub messages: Vec<Message>,
    /// Name of the agent currently in control.
    pub current_agent: String,
    /// Caller-supplied context value, visible to tools and instructions.
    pub context: Value,
    /// Number of turns taken; monotonically non-decreasing.
    pub turn_count: u32,
    /// Approval decisions keyed by tool call id.
    pub approvals: HashMap<String, ApprovalValue>,
    /// Clarification answers keyed by clarification id.
    pub clarifications: HashMap<String, String>,
}

impl RunState {
    /// Create a fresh state for `agent` with a single user message.
    #[must_use]
    pub fn new(agent: impl Into<String>, user_input: impl Into<String>) -> Self {
        Self {
            run_id: RunId::fresh(),
            trace_id: TraceId::fresh(),
            messages: vec![Message::user(user_input)],
            current_agent: agent.into(),
            context: Value::Null,
            turn_count: 0,
            approvals: HashMap::new(),
            clarifications: HashMap::new(),
        }
    }

    /// Set the run id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    /// Set the trace id.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = trace_id;
        self
    }

    /// Set the context value.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Record an approval decision for a tool call.
    #[must_use]
    pub fn with_approval(mut self, tool_call_id: impl Into<String>, value: ApprovalValue) -> Self {
        self.approvals.insert(tool_call_id.into(), value);
        self
    }

    /// Record the user's answer to a clarification.
    #[must_use]
    pub fn with_clarification(
        mut self,
        clarification_id: impl Into<String>,
        option_id: impl Into<String>,
    ) -> Self {
        self.clarifications
            .insert(clarification_id.into(), option_id.into());
        self
    }

    /// Tool calls on the trailing assistant message that have no
    /// non-halted reply yet.
    ///
    /// Non-empty means the state is resumable: the engine dispatches
    /// exactly these calls without asking the model again.
    #[must_use]
    pub fn pending_tool_calls(&self) -> Vec<ToolCall> {
        let mut answered: Vec<&str> = Vec::new();
        for message in self.messages.iter().rev() {
            match message.role {
                crate::message::Role::Tool => {
                    // Approval halts are re-dispatched (consulting the
                    // approvals map); clarification placeholders are
                    // handled by the rewrite pass instead.
                    let halted = message
                        .tool_reply_status()
                        .is_some_and(|s| s == "halted");
                    if !halted && let Some(id) = message.tool_call_id.as_deref() {
                        answered.push(id);
                    }
                }
                crate::message::Role::Assistant => {
                    let Some(calls) = &message.tool_calls else {
                        return Vec::new();
                    };
                    return calls
                        .iter()
                        .filter(|c| !answered.contains(&c.id.as_str()))
                        .cloned()
                        .collect();
                }
                _ => return Vec::new(),
            }
        }
        Vec::new()
    }

    /// The trailing `awaiting_clarification` placeholder whose answer has
    /// arrived, as `(message_index, clarification_id, selected_option)`.
    #[must_use]
    pub fn answered_clarification(&self) -> Option<(usize, String, String)> {
        for (index, message) in self.messages.iter().enumerate().rev() {
            if !message.role.is_tool() {
                continue;
            }
            if message.tool_reply_status().as_deref() != Some("awaiting_clarification") {
                continue;
            }
            let text = message.text()?;
            let value: Value = serde_json::from_str(&text).ok()?;
            let id = value.get("clarification_id")?.as_str()?;
            if let Some(selected) = self.clarifications.get(id) {
                return Some((index, id.to_owned(), selected.clone()));
            }
        }
        None
    }

    /// Messages safe to send to the model: halted and awaiting
    /// placeholders are storage-only audit markers and are filtered out.
    #[must_use]
    pub fn model_messages(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| {
                !m.tool_reply_status()
                    .is_some_and(|s| s == "halted" || s == "awaiting_clarification")
            })
            .cloned()
            .collect()
    }
}

/// Terminal outcome of a run.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum RunOutcome {
    /// The agent produced a final output (schema-decoded when the agent
    /// declares an output schema, raw text otherwise).
    Completed {
        /// The final output value.
        output: Value,
    },
    /// The run terminated with an error.
    Error {
        /// The terminal error.
        error: Error,
    },
    /// The run paused awaiting caller action.
    Interrupted {
        /// The pending interruptions.
        interruptions: Vec<Interruption>,
    },
}

/// Result of a run: the final state plus the tagged outcome.
///
/// `final_state` reflects every message emitted up to the terminal
/// condition, so downstream UIs can render the partial conversation
/// faithfully regardless of outcome.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// The state at termination.
    pub final_state: RunState,
    /// The tagged outcome.
    pub outcome: RunOutcome,
    /// Cumulative token usage across all LLM calls in the run.
    pub usage: Usage,
}

impl RunResult {
    /// Returns `true` if the run completed with output.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed { .. })
    }

    /// Returns `true` if the run paused on interruptions.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self.outcome, RunOutcome::Interrupted { .. })
    }

    /// The final output, if completed.
    #[must_use]
    pub const fn output(&self) -> Option<&Value> {
        match &self.outcome {
            RunOutcome::Completed { output } => Some(output),
            _ => None,
        }
    }

    /// The pending interruptions, if interrupted.
    #[must_use]
    pub fn interruptions(&self) -> &[Interruption] {
        match &self.outcome {
            RunOutcome::Interrupted { interruptions } => interruptions,
            _ => &[],
        }
    }

    /// The terminal error, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&Error> {
        match &self.outcome {
            RunOutcome::Error { error } => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::tool::ToolReply;

    #[test]
    fn approval_value_rejection_reason() {
        let value = ApprovalValue::rejected(Some("user changed mind"));
        assert_eq!(value.status, ApprovalStatus::Rejected);
        assert_eq!(value.rejection_reason().as_deref(), Some("user changed mind"));

        let snake: ApprovalValue = serde_json::from_str(
            r#"{"status":"rejected","additional_context":{"rejection_reason":"nope"}}"#,
        )
        .unwrap();
        assert_eq!(snake.rejection_reason().as_deref(), Some("nope"));
    }

    mod pending_tool_calls {
        use super::*;

        fn state_with(messages: Vec<Message>) -> RunState {
            let mut state = RunState::new("a", "hi");
            state.messages.extend(messages);
            state
        }

        #[test]
        fn trailing_assistant_with_unanswered_calls() {
            let state = state_with(vec![Message::assistant_tool_calls(
                None,
                vec![
                    ToolCall::new("call_1", "t", "{}"),
                    ToolCall::new("call_2", "t", "{}"),
                ],
            )]);
            let pending = state.pending_tool_calls();
            assert_eq!(pending.len(), 2);
        }

        #[test]
        fn answered_calls_are_skipped() {
            let state = state_with(vec![
                Message::assistant_tool_calls(
                    None,
                    vec![
                        ToolCall::new("call_1", "t", "{}"),
                        ToolCall::new("call_2", "t", "{}"),
                    ],
                ),
                ToolReply::executed("t", "ok").into_message("call_1"),
            ]);
            let pending = state.pending_tool_calls();
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].id, "call_2");
        }

        #[test]
        fn halted_replies_do_not_count_as_answers() {
            let state = state_with(vec![
                Message::assistant_tool_calls(None, vec![ToolCall::new("call_1", "t", "{}")]),
                ToolReply::halted("t").into_message("call_1"),
            ]);
            let pending = state.pending_tool_calls();
            assert_eq!(pending.len(), 1);
        }

        #[test]
        fn plain_assistant_is_not_resumable() {
            let state = state_with(vec![Message::assistant("done")]);
            assert!(state.pending_tool_calls().is_empty());
        }
    }

    #[test]
    fn model_messages_filter_placeholders() {
        let mut state = RunState::new("a", "hi");
        state.messages.push(Message::assistant_tool_calls(
            None,
            vec![ToolCall::new("call_1", "t", "{}")],
        ));
        state
            .messages
            .push(ToolReply::halted("t").into_message("call_1"));

        let filtered = state.model_messages();
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|m| m.tool_reply_status().is_none()));
    }

    #[test]
    fn answered_clarification_found() {
        let mut state = RunState::new("a", "hi");
        state.messages.push(Message::tool(
            "call_1",
            serde_json::json!({
                "status": "awaiting_clarification",
                "clarification_id": "clar_1"
            })
            .to_string(),
        ));
        assert!(state.answered_clarification().is_none());

        let state = state.with_clarification("clar_1", "JFK");
        let (index, id, selected) = state.answered_clarification().unwrap();
        assert_eq!(index, 1);
        assert_eq!(id, "clar_1");
        assert_eq!(selected, "JFK");
    }
}
