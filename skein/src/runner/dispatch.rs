//! Tool call dispatch.
//!
//! All calls in a batch execute concurrently via
//! [`futures::future::join_all`]; outcomes are returned in original call
//! order, and no ordering is guaranteed *between* sibling executions.
//!
//! Per call: parse arguments (leniently), offer the
//! `before_tool_execution` replacement hook, validate against the tool's
//! schema, walk the approval gate, execute, recognize clarification and
//! handoff markers in the result, offer the after-execution replacement
//! hook, and wrap everything in the canonical reply envelope. Tool
//! failures never terminate the run — they become `execution_error`
//! envelopes the model can react to.

use std::time::Instant;

use serde_json::Value;
use tracing::{Instrument, info_span, warn};

use crate::agent::Agent;
use crate::events::TraceEvent;
use crate::message::{Message, ToolCall};
use crate::state::{ApprovalStatus, Interruption, RunState};
use crate::tool::{
    CLARIFICATION_TRIGGER_KEY, DynTool, ToolContext, ToolReply, validate_arguments,
};

use super::RunConfig;

/// Outcome of dispatching one tool call.
#[derive(Debug, Clone)]
pub(crate) struct ToolCallOutcome {
    /// The tool-role reply message.
    pub message: Message,
    /// The canonical envelope (also carried inside `message`).
    pub reply: ToolReply,
    /// Handoff target, when the tool signaled one.
    pub target_agent: Option<String>,
    /// Interruption raised by this call, if any.
    pub interruption: Option<Interruption>,
}

impl ToolCallOutcome {
    fn from_reply(call: &ToolCall, reply: ToolReply) -> Self {
        Self {
            message: reply.clone().into_message(&call.id),
            reply,
            target_agent: None,
            interruption: None,
        }
    }
}

/// Dispatch a batch of tool calls concurrently.
pub(crate) async fn dispatch(
    calls: &[ToolCall],
    tools: &[DynTool],
    agent: &Agent,
    state: &RunState,
    config: &RunConfig,
) -> Vec<ToolCallOutcome> {
    let futs: Vec<_> = calls
        .iter()
        .map(|call| dispatch_one(call, tools, agent, state, config))
        .collect();
    futures::future::join_all(futs).await
}

/// Dispatch a single tool call through the full per-call pipeline.
async fn dispatch_one(
    call: &ToolCall,
    tools: &[DynTool],
    agent: &Agent,
    state: &RunState,
    config: &RunConfig,
) -> ToolCallOutcome {
    let span = info_span!(
        "tool",
        tool.name = %call.name,
        tool.id = %call.id,
    );

    async {
        let mut args = call.arguments_value();

        // The only hook that can mutate inputs.
        if let Some(replacement) = config
            .emit(TraceEvent::BeforeToolExecution {
                tool_call: call.clone(),
                args: args.clone(),
            })
            .await
        {
            args = replacement;
        }

        config
            .emit(TraceEvent::ToolCallStart {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                args: args.clone(),
            })
            .await;

        let started = Instant::now();
        let outcome = run_pipeline(call, args, tools, agent, state, config).await;

        config
            .emit(TraceEvent::ToolCallEnd {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                reply: outcome.reply.clone(),
                duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            })
            .await;

        outcome
    }
    .instrument(span)
    .await
}

/// Lookup, validation, approval gate, execution, and marker recognition.
async fn run_pipeline(
    call: &ToolCall,
    args: Value,
    tools: &[DynTool],
    agent: &Agent,
    state: &RunState,
    config: &RunConfig,
) -> ToolCallOutcome {
    let Some(tool) = tools.iter().find(|t| t.definition().name == call.name) else {
        warn!(tool = %call.name, "Tool not found");
        return ToolCallOutcome::from_reply(call, ToolReply::tool_not_found(&call.name));
    };

    let definition = tool.definition();
    let issues = validate_arguments(&definition.parameters, &args);
    if !issues.is_empty() {
        return ToolCallOutcome::from_reply(call, ToolReply::validation_error(&call.name, issues));
    }

    // Approval gate.
    let approval = state.approvals.get(&call.id);
    let mut approved_gate = false;
    let mut approval_context = None;

    if tool.needs_approval(&state.context, &args) {
        match approval.map(|a| a.status) {
            None | Some(ApprovalStatus::Pending) => {
                return ToolCallOutcome {
                    message: ToolReply::halted(&call.name).into_message(&call.id),
                    reply: ToolReply::halted(&call.name),
                    target_agent: None,
                    interruption: Some(Interruption::ToolApproval {
                        tool_call: call.clone(),
                        agent: agent.name.clone(),
                        session_id: config
                            .memory
                            .as_ref()
                            .and_then(|m| m.config.conversation_id.clone()),
                    }),
                };
            }
            Some(ApprovalStatus::Rejected) => {
                let reason = approval.and_then(crate::state::ApprovalValue::rejection_reason);
                return ToolCallOutcome::from_reply(
                    call,
                    ToolReply::approval_denied(&call.name, reason),
                );
            }
            Some(ApprovalStatus::Approved) => {
                approved_gate = true;
                approval_context = approval.and_then(|a| a.additional_context.clone());
            }
        }
    }

    // Shallow-merge approval context into the run context for this single
    // execution.
    let context = match (&state.context, &approval_context) {
        (Value::Object(base), Some(Value::Object(extra))) => {
            let mut merged = base.clone();
            for (k, v) in extra {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        (_, Some(extra)) if state.context.is_null() => extra.clone(),
        _ => state.context.clone(),
    };

    let ctx = ToolContext {
        context,
        run_id: state.run_id.clone(),
        agent: agent.name.clone(),
    };

    let mut result = match tool.execute(args, &ctx).await {
        Ok(output) => output.into_text(),
        Err(e) => {
            warn!(tool = %call.name, error = %e, "Tool execution failed");
            return ToolCallOutcome::from_reply(
                call,
                ToolReply::execution_error(&call.name, e.to_string()),
            );
        }
    };

    // Recognize clarification and handoff markers in the result.
    let parsed: Option<Value> = serde_json::from_str(&result).ok();

    if let Some(json) = &parsed
        && json.get(CLARIFICATION_TRIGGER_KEY) == Some(&Value::Bool(true))
    {
        let clarification_id = json
            .get("clarification_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let question = json
            .get("question")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let options = json
            .get("options")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        let reply = ToolReply::awaiting_clarification(&clarification_id);
        return ToolCallOutcome {
            message: reply.clone().into_message(&call.id),
            reply,
            target_agent: None,
            interruption: Some(Interruption::ClarificationRequired {
                clarification_id,
                question,
                options,
                context: json.get("context").cloned(),
            }),
        };
    }

    let target_agent = parsed
        .as_ref()
        .and_then(|json| json.get("handoff_to"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    if let Some(hook) = &config.after_tool_execution
        && let Some(replacement) = hook.after_execution(call, &result).await
    {
        result = replacement;
    }

    let reply = if approved_gate {
        ToolReply::approved_and_executed(&call.name, result, approval_context)
    } else {
        ToolReply::executed(&call.name, result)
    };

    ToolCallOutcome {
        message: reply.clone().into_message(&call.id),
        reply,
        target_agent,
        interruption: None,
    }
}
