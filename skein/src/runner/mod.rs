//! Runner — the agent execution engine.
//!
//! [`Runner`] drives a [`RunState`] through the turn loop:
//!
//! 1. Resume pending tool calls (interruption resume) or rewrite answered
//!    clarification placeholders
//! 2. Enforce the turn bound and resolve the current agent
//! 3. Run input guardrails (first turn only, parallel or sequential)
//! 4. Call the model — plain or streaming with aggregation and fallback
//! 5. Branch: dispatch tool calls, apply a handoff, or finalize output
//!    through schema decoding and output guardrails
//!
//! Every observable step emits a [`TraceEvent`]. The engine never raises:
//! all terminal conditions — success, error, or interruption — come back
//! as a [`RunResult`] whose `final_state` reflects everything emitted up
//! to that point.
//!
//! `Runner` owns no state — all per-run state lives in the [`RunState`]
//! threaded through the loop, so concurrent runs share nothing.

mod dispatch;
mod streaming;

pub use streaming::run_stream;

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt as _;
use serde_json::Value;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::agent::{Agent, AgentRegistry};
use crate::approval::{ApprovalStore, ClarificationStore};
use crate::error::Error;
use crate::events::{EventSink, GuardrailStage, TraceEvent};
use crate::guardrail::{
    GuardrailReport, GuardrailSettings, InputGuardrail, OutputGuardrail, evaluate_input,
    evaluate_output,
};
use crate::memory::{MemoryConfig, SharedMemoryStore, broker};
use crate::message::{Message, ToolCall};
use crate::provider::{Completion, CompletionRequest, SharedProvider};
use crate::state::{ApprovalValue, Interruption, RunOutcome, RunResult, RunState};
use crate::stream::ChunkAggregator;
use crate::tool::{CLARIFICATION_TOOL_NAME, ClarificationTool, DynTool, ToolReply, validate_value};
use crate::usage::Usage;

use dispatch::ToolCallOutcome;

/// Default turn bound.
pub const DEFAULT_MAX_TURNS: u32 = 50;

/// A memory store bound to its per-run configuration.
#[derive(Clone)]
pub struct MemoryBinding {
    /// The store.
    pub store: SharedMemoryStore,
    /// Load/store behavior for this run.
    pub config: MemoryConfig,
}

impl std::fmt::Debug for MemoryBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBinding")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Hook consulted after every tool execution; a `Some` return replaces the
/// result string before envelope wrapping.
#[async_trait]
pub trait ToolResultHook: Send + Sync {
    /// Observe a finished execution; optionally replace its result.
    async fn after_execution(&self, call: &ToolCall, result: &str) -> Option<String>;
}

/// Run-level configuration for the engine.
#[derive(Clone)]
pub struct RunConfig {
    /// Registry resolving agent names to records.
    pub registry: AgentRegistry,
    /// The model backend.
    pub provider: SharedProvider,
    /// Model name used when the agent declares none.
    pub model_override: Option<String>,
    /// Turn bound (default 50).
    pub max_turns: u32,
    /// Observer of trace events.
    pub event_sink: Option<Arc<dyn EventSink>>,
    /// Conversation memory, when enabled.
    pub memory: Option<MemoryBinding>,
    /// Out-of-band approval storage.
    pub approval_store: Option<Arc<dyn ApprovalStore>>,
    /// Out-of-band clarification storage.
    pub clarification_store: Option<Arc<dyn ClarificationStore>>,
    /// Inject the `request_user_clarification` tool into every agent.
    pub allow_clarification: bool,
    /// Run-level input guardrails (agents with their own override these).
    pub input_guardrails: Vec<InputGuardrail>,
    /// Run-level output guardrails (agents with their own override these).
    pub output_guardrails: Vec<OutputGuardrail>,
    /// Guardrail scheduling defaults (agents may override).
    pub guardrail_settings: GuardrailSettings,
    /// Post-execution replacement hook for tool results.
    pub after_tool_execution: Option<Arc<dyn ToolResultHook>>,
}

impl RunConfig {
    /// Create a config with defaults for the given registry and provider.
    #[must_use]
    pub fn new(registry: AgentRegistry, provider: SharedProvider) -> Self {
        Self {
            registry,
            provider,
            model_override: None,
            max_turns: DEFAULT_MAX_TURNS,
            event_sink: None,
            memory: None,
            approval_store: None,
            clarification_store: None,
            allow_clarification: false,
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            guardrail_settings: GuardrailSettings::default(),
            after_tool_execution: None,
        }
    }

    /// Set the turn bound.
    #[must_use]
    pub const fn max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Set the fallback model name.
    #[must_use]
    pub fn model_override(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }

    /// Attach an event sink.
    #[must_use]
    pub fn on_event(mut self, sink: impl EventSink + 'static) -> Self {
        self.event_sink = Some(Arc::new(sink));
        self
    }

    /// Attach conversation memory.
    #[must_use]
    pub fn memory(mut self, store: SharedMemoryStore, config: MemoryConfig) -> Self {
        self.memory = Some(MemoryBinding { store, config });
        self
    }

    /// Attach out-of-band approval storage.
    #[must_use]
    pub fn approval_store(mut self, store: Arc<dyn ApprovalStore>) -> Self {
        self.approval_store = Some(store);
        self
    }

    /// Attach out-of-band clarification storage.
    #[must_use]
    pub fn clarification_store(mut self, store: Arc<dyn ClarificationStore>) -> Self {
        self.clarification_store = Some(store);
        self
    }

    /// Enable the synthetic clarification tool.
    #[must_use]
    pub const fn allow_clarification(mut self, enabled: bool) -> Self {
        self.allow_clarification = enabled;
        self
    }

    /// Add a run-level input guardrail.
    #[must_use]
    pub fn input_guardrail(mut self, guardrail: InputGuardrail) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    /// Add a run-level output guardrail.
    #[must_use]
    pub fn output_guardrail(mut self, guardrail: OutputGuardrail) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    /// Set guardrail scheduling defaults.
    #[must_use]
    pub const fn guardrail_settings(mut self, settings: GuardrailSettings) -> Self {
        self.guardrail_settings = settings;
        self
    }

    /// Set the post-execution tool result hook.
    #[must_use]
    pub fn after_tool_execution(mut self, hook: impl ToolResultHook + 'static) -> Self {
        self.after_tool_execution = Some(Arc::new(hook));
        self
    }

    /// Forward an event to the sink; returns its replacement value.
    pub(crate) async fn emit(&self, event: TraceEvent) -> Option<Value> {
        match &self.event_sink {
            Some(sink) => sink.on_event(&event).await,
            None => None,
        }
    }
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("max_turns", &self.max_turns)
            .field("model_override", &self.model_override)
            .field("allow_clarification", &self.allow_clarification)
            .finish_non_exhaustive()
    }
}

/// Control flow of one loop step.
enum StepFlow {
    /// Continue with the next state.
    Continue(RunState),
    /// The run terminated.
    Done(Box<RunState>, RunOutcome),
}

/// One model call's result, with any deferred partial-message events.
struct ModelRound {
    completion: Completion,
    /// Partial `assistant_message` events buffered while guardrails were
    /// still undecided.
    deferred_events: Vec<TraceEvent>,
    /// Whether partial events were already emitted inline.
    partials_emitted: bool,
}

/// Stateless execution engine.
///
/// All per-run state lives in the [`RunState`] passed through, so `run`
/// may be called concurrently for different (or the same) configs.
#[derive(Debug, Clone, Copy)]
pub struct Runner;

impl Runner {
    /// Execute a run to its terminal condition.
    ///
    /// Never returns `Err`: terminal errors are folded into the
    /// [`RunOutcome::Error`] outcome with the partial state attached.
    pub async fn run(initial_state: RunState, config: &RunConfig) -> RunResult {
        let span = info_span!(
            "run",
            run.id = %initial_state.run_id,
            run.agent = %initial_state.current_agent,
            run.max_turns = config.max_turns,
        );
        Self::run_inner(initial_state, config).instrument(span).await
    }

    async fn run_inner(initial_state: RunState, config: &RunConfig) -> RunResult {
        let mut state = initial_state;

        // Load prior messages and approvals.
        if let Some(memory) = &config.memory {
            let (loaded, report) = broker::load_state(
                memory.store.as_ref(),
                &memory.config,
                state,
                config.approval_store.as_deref(),
                config.clarification_store.as_deref(),
            )
            .await;
            state = loaded;
            if let Some(report) = report {
                config
                    .emit(TraceEvent::MemoryOperation {
                        operation: "load".to_owned(),
                        conversation_id: Some(report.conversation_id),
                        message_count: Some(report.message_count),
                    })
                    .await;
            }
        }

        config
            .emit(TraceEvent::RunStart {
                run_id: state.run_id.to_string(),
                trace_id: state.trace_id.to_string(),
                agent: state.current_agent.clone(),
            })
            .await;
        info!(agent = %state.current_agent, "Run started");

        let mut usage = Usage::zero();
        let (mut final_state, outcome) = Self::run_turns(state, config, &mut usage).await;

        // Store on interruption always; on completion per config.
        if let Some(memory) = &config.memory
            && memory.config.auto_store
        {
            let should_store = match &outcome {
                RunOutcome::Interrupted { .. } => true,
                RunOutcome::Completed { .. } => memory.config.store_on_completion,
                RunOutcome::Error { .. } => false,
            };
            if should_store
                && let Some(report) =
                    broker::persist_state(memory.store.as_ref(), &memory.config, &final_state)
                        .await
            {
                config
                    .emit(TraceEvent::MemoryOperation {
                        operation: "store".to_owned(),
                        conversation_id: Some(report.conversation_id),
                        message_count: Some(report.message_count),
                    })
                    .await;
            }
        }

        // Halted placeholders are audit markers for storage; the state
        // handed back to the caller keeps only the non-halted portion.
        if matches!(outcome, RunOutcome::Interrupted { .. }) {
            final_state
                .messages
                .retain(|m| m.tool_reply_status().as_deref() != Some("halted"));
        }

        let label = match &outcome {
            RunOutcome::Completed { .. } => "completed",
            RunOutcome::Error { .. } => "error",
            RunOutcome::Interrupted { .. } => "interrupted",
        };
        config
            .emit(TraceEvent::RunEnd {
                outcome: label.to_owned(),
            })
            .await;

        match &outcome {
            RunOutcome::Completed { .. } => info!(
                turns = final_state.turn_count,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Run completed",
            ),
            RunOutcome::Interrupted { interruptions } => {
                info!(pending = interruptions.len(), "Run interrupted")
            }
            RunOutcome::Error { error: e } => error!(error = %e, "Run failed"),
        }

        RunResult {
            final_state: *final_state,
            outcome,
            usage,
        }
    }

    async fn run_turns(
        state: RunState,
        config: &RunConfig,
        usage: &mut Usage,
    ) -> (Box<RunState>, RunOutcome) {
        let mut state = state;
        loop {
            match Self::step(state, config, usage).await {
                StepFlow::Continue(next) => state = next,
                StepFlow::Done(final_state, outcome) => return (final_state, outcome),
            }
        }
    }

    /// One loop step: at most one model call or one tool-dispatch round.
    async fn step(mut state: RunState, config: &RunConfig, usage: &mut Usage) -> StepFlow {
        // Interruption resume: a trailing assistant message with
        // unanswered tool calls is dispatched directly, no model round.
        let pending = state.pending_tool_calls();
        if !pending.is_empty() {
            let Some(agent) = config.registry.get(&state.current_agent) else {
                let err = Error::agent_not_found(&state.current_agent);
                return Self::fail(state, err);
            };
            debug!(agent = %agent.name, pending = pending.len(), "Resuming pending tool calls");
            let tools = Self::effective_tools(&agent, config);
            state.turn_count += 1;
            let outcomes = dispatch::dispatch(&pending, &tools, &agent, &state, config).await;
            return Self::apply_dispatch(state, &agent, outcomes, config).await;
        }

        // Clarification resume: rewrite the answered placeholder in place.
        if let Some((index, clarification_id, selected)) = state.answered_clarification() {
            let tool_call_id = state.messages[index]
                .tool_call_id
                .clone()
                .unwrap_or_default();
            state.messages[index] = ToolReply::clarification_provided(&clarification_id, &selected)
                .into_message(&tool_call_id);
            config
                .emit(TraceEvent::ClarificationProvided {
                    clarification_id,
                    selected,
                })
                .await;
            return StepFlow::Continue(state);
        }

        if state.turn_count >= config.max_turns {
            let turns = state.turn_count;
            return Self::fail(state, Error::max_turns(turns));
        }

        let Some(agent) = config.registry.get(&state.current_agent) else {
            let err = Error::agent_not_found(&state.current_agent);
            return Self::fail(state, err);
        };
        let tools = Self::effective_tools(&agent, config);

        config
            .emit(TraceEvent::AgentProcessing {
                agent: agent.name.clone(),
            })
            .await;

        // Agent-level model name beats the config override.
        let model = agent
            .model
            .name
            .clone()
            .or_else(|| config.model_override.clone());
        if model.is_none() && !config.provider.model_name_optional() {
            return Self::fail(
                state,
                Error::model_behavior(format!("no model configured for agent '{}'", agent.name)),
            );
        }

        let turn = state.turn_count + 1;
        config
            .emit(TraceEvent::TurnStart {
                turn,
                agent: agent.name.clone(),
            })
            .await;

        let request = Self::build_request(&state, &agent, &tools, model);

        // Input guardrails run on the first turn only.
        let settings = agent
            .guardrail_settings
            .unwrap_or(config.guardrail_settings);
        let input_guardrails: &[InputGuardrail] = if agent.input_guardrails.is_empty() {
            &config.input_guardrails
        } else {
            &agent.input_guardrails
        };

        let round = if state.turn_count == 0 && !input_guardrails.is_empty() {
            match settings.mode {
                crate::guardrail::ExecutionMode::Sequential => {
                    let reports =
                        evaluate_input(input_guardrails, &settings, &request.messages).await;
                    if let Some(violation) = Self::report_input(config, &reports).await {
                        return Self::fail(state, violation);
                    }
                    Self::call_model(&agent, &request, config, false).await
                }
                crate::guardrail::ExecutionMode::Parallel => {
                    // The LLM call launches concurrently; its result is
                    // discarded when a guardrail trips. Partial stream
                    // events are deferred until the verdict is in.
                    let (reports, round) = tokio::join!(
                        evaluate_input(input_guardrails, &settings, &request.messages),
                        Self::call_model(&agent, &request, config, true),
                    );
                    if let Some(violation) = Self::report_input(config, &reports).await {
                        return Self::fail(state, violation);
                    }
                    round
                }
            }
        } else {
            Self::call_model(&agent, &request, config, false).await
        };

        let round = match round {
            Ok(round) => round,
            Err(e) => {
                // Provider failures surface as model behavior errors.
                let error = match e {
                    Error::ModelBehavior { .. } => e,
                    other => Error::model_behavior(other.to_string()),
                };
                return Self::fail(state, error);
            }
        };

        config
            .emit(TraceEvent::LlmCallEnd {
                agent: agent.name.clone(),
                usage: round.completion.usage,
            })
            .await;
        if let Some(call_usage) = round.completion.usage {
            *usage += call_usage;
            config
                .emit(TraceEvent::TokenUsage { usage: call_usage })
                .await;
        }

        let Some(completion_message) = round.completion.message else {
            return Self::fail(
                state,
                Error::model_behavior("provider returned no message"),
            );
        };
        let content = completion_message
            .content
            .filter(|text| !text.is_empty());
        let tool_calls = completion_message.tool_calls;

        let assistant = if tool_calls.is_empty() {
            Message::assistant(content.clone().unwrap_or_default())
        } else {
            Message::assistant_tool_calls(content.clone(), tool_calls.clone())
        };

        // Deferred partials flush once guardrails have passed; a message
        // streamed as partials does not get a final duplicate event.
        let streamed_partially = round.partials_emitted || !round.deferred_events.is_empty();
        for event in round.deferred_events {
            config.emit(event).await;
        }
        if !streamed_partially {
            config
                .emit(TraceEvent::AssistantMessage {
                    message: assistant.clone(),
                    partial: false,
                })
                .await;
        }

        state.messages.push(assistant);
        state.turn_count = turn;

        if !tool_calls.is_empty() {
            config
                .emit(TraceEvent::ToolRequests {
                    tool_calls: tool_calls.clone(),
                })
                .await;
            let outcomes = dispatch::dispatch(&tool_calls, &tools, &agent, &state, config).await;
            return Self::apply_dispatch(state, &agent, outcomes, config).await;
        }

        if let Some(text) = content {
            return Self::finalize_output(state, &agent, &settings, text, turn, config).await;
        }

        config.emit(TraceEvent::TurnEnd { turn }).await;
        Self::fail(
            state,
            Error::model_behavior("model returned neither content nor tool calls"),
        )
    }

    /// Decode, guard, and deliver the final output.
    async fn finalize_output(
        state: RunState,
        agent: &Agent,
        settings: &GuardrailSettings,
        text: String,
        turn: u32,
        config: &RunConfig,
    ) -> StepFlow {
        let output = if let Some(schema) = &agent.output_schema {
            config
                .emit(TraceEvent::OutputParse {
                    agent: agent.name.clone(),
                })
                .await;
            let decoded = match serde_json::from_str::<Value>(&text) {
                Ok(value) => {
                    let issues = validate_value(schema, &value);
                    if issues.is_empty() {
                        Ok(value)
                    } else {
                        Err(issues)
                    }
                }
                Err(e) => Err(vec![e.to_string()]),
            };
            match decoded {
                Ok(value) => value,
                Err(issues) => {
                    config
                        .emit(TraceEvent::DecodeError {
                            issues: issues.clone(),
                        })
                        .await;
                    return Self::fail(state, Error::decode(issues));
                }
            }
        } else {
            Value::String(text)
        };

        let output_guardrails: &[OutputGuardrail] = if agent.output_guardrails.is_empty() {
            &config.output_guardrails
        } else {
            &agent.output_guardrails
        };
        let reports = evaluate_output(output_guardrails, settings, &output).await;
        for report in &reports {
            config
                .emit(TraceEvent::GuardrailCheck {
                    stage: GuardrailStage::Output,
                    name: report.name.clone(),
                    valid: report.verdict.valid,
                })
                .await;
        }
        if let Some(violation) = GuardrailReport::first_violation(&reports) {
            let reason = violation
                .verdict
                .reason
                .clone()
                .unwrap_or_else(|| "output guardrail violation".to_owned());
            config
                .emit(TraceEvent::GuardrailViolation {
                    stage: GuardrailStage::Output,
                    reason: reason.clone(),
                })
                .await;
            return Self::fail(state, Error::output_tripwire(reason));
        }

        config
            .emit(TraceEvent::FinalOutput {
                output: output.clone(),
            })
            .await;
        config.emit(TraceEvent::TurnEnd { turn }).await;
        StepFlow::Done(Box::new(state), RunOutcome::Completed { output })
    }

    /// Append dispatch results and decide what happens next.
    async fn apply_dispatch(
        mut state: RunState,
        agent: &Agent,
        outcomes: Vec<ToolCallOutcome>,
        config: &RunConfig,
    ) -> StepFlow {
        for outcome in &outcomes {
            state.messages.push(outcome.message.clone());
        }

        let interruptions: Vec<Interruption> = outcomes
            .iter()
            .filter_map(|o| o.interruption.clone())
            .collect();

        if !interruptions.is_empty() {
            for interruption in &interruptions {
                match interruption {
                    Interruption::ToolApproval { tool_call, .. } => {
                        state
                            .approvals
                            .entry(tool_call.id.clone())
                            .or_insert_with(ApprovalValue::pending);
                        if let Some(store) = &config.approval_store
                            && let Err(e) = store
                                .store_approval(
                                    state.run_id.as_str(),
                                    &tool_call.id,
                                    &ApprovalValue::pending(),
                                )
                                .await
                        {
                            warn!(error = %e, "Approval storage write failed");
                        }
                    }
                    Interruption::ClarificationRequired {
                        clarification_id,
                        question,
                        options,
                        ..
                    } => {
                        config
                            .emit(TraceEvent::ClarificationRequested {
                                clarification_id: clarification_id.clone(),
                                question: question.clone(),
                                options: options.clone(),
                            })
                            .await;
                    }
                }
            }
            config
                .emit(TraceEvent::TurnEnd {
                    turn: state.turn_count,
                })
                .await;
            return StepFlow::Done(Box::new(state), RunOutcome::Interrupted { interruptions });
        }

        config
            .emit(TraceEvent::ToolResultsToLlm {
                messages: outcomes.iter().map(|o| o.message.clone()).collect(),
            })
            .await;

        if let Some(target) = outcomes.iter().find_map(|o| o.target_agent.clone()) {
            if !agent.can_hand_off(&target) {
                config
                    .emit(TraceEvent::HandoffDenied {
                        from: agent.name.clone(),
                        to: target.clone(),
                    })
                    .await;
                return Self::fail(
                    state,
                    Error::handoff(format!(
                        "agent '{}' may not hand off to '{target}'",
                        agent.name
                    )),
                );
            }
            config
                .emit(TraceEvent::Handoff {
                    from: agent.name.clone(),
                    to: target.clone(),
                })
                .await;
            info!(from = %agent.name, to = %target, "Handoff");
            state.current_agent = target;
        }

        sweep_superseded_halted(&mut state.messages);
        StepFlow::Continue(state)
    }

    /// Issue the model call, aggregating a stream when supported.
    ///
    /// A failing stream falls back to a single non-streaming call; partial
    /// emissions made before the failure are discarded by contract.
    async fn call_model(
        agent: &Agent,
        request: &CompletionRequest,
        config: &RunConfig,
        defer_partials: bool,
    ) -> crate::error::Result<ModelRound> {
        config
            .emit(TraceEvent::LlmCallStart {
                agent: agent.name.clone(),
                model: request.model.clone(),
                message_count: request.messages.len(),
            })
            .await;

        if config.provider.supports_streaming() {
            match config.provider.completion_stream(request).await {
                Ok(mut stream) => {
                    let mut aggregator = ChunkAggregator::new();
                    let mut deferred = Vec::new();
                    let mut emitted = false;
                    let mut failed = false;

                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(chunk) => {
                                aggregator.apply(&chunk);
                                if chunk.advances_message() {
                                    let event = TraceEvent::AssistantMessage {
                                        message: aggregator.snapshot(),
                                        partial: true,
                                    };
                                    if defer_partials {
                                        deferred.push(event);
                                    } else {
                                        config.emit(event).await;
                                        emitted = true;
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "Stream failed; falling back to non-streaming call");
                                failed = true;
                                break;
                            }
                        }
                    }

                    if !failed {
                        return Ok(ModelRound {
                            completion: aggregator.into_completion(),
                            deferred_events: deferred,
                            partials_emitted: emitted,
                        });
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Stream setup failed; falling back to non-streaming call");
                }
            }
        }

        let completion = config.provider.completion(request).await?;
        Ok(ModelRound {
            completion,
            deferred_events: Vec::new(),
            partials_emitted: false,
        })
    }

    /// Assemble the provider request for the current step.
    fn build_request(
        state: &RunState,
        agent: &Agent,
        tools: &[DynTool],
        model: Option<String>,
    ) -> CompletionRequest {
        let mut messages = Vec::with_capacity(state.messages.len() + 1);
        let instructions = agent.instructions.resolve(state);
        if !instructions.is_empty() {
            messages.push(Message::system(instructions));
        }
        messages.extend(state.model_messages());

        CompletionRequest {
            model,
            messages,
            tools: tools.iter().map(|t| t.definition()).collect(),
            output_schema: agent.output_schema.clone(),
        }
    }

    /// The agent's tools plus the injected clarification tool.
    fn effective_tools(agent: &Agent, config: &RunConfig) -> Vec<DynTool> {
        let mut tools = agent.tools.clone();
        if config.allow_clarification
            && !tools
                .iter()
                .any(|t| t.definition().name == CLARIFICATION_TOOL_NAME)
        {
            tools.push(Arc::new(ClarificationTool));
        }
        tools
    }

    /// Emit guardrail check events; return the tripwire error on violation.
    async fn report_input(config: &RunConfig, reports: &[GuardrailReport]) -> Option<Error> {
        for report in reports {
            config
                .emit(TraceEvent::GuardrailCheck {
                    stage: GuardrailStage::Input,
                    name: report.name.clone(),
                    valid: report.verdict.valid,
                })
                .await;
        }
        let violation = GuardrailReport::first_violation(reports)?;
        let reason = violation
            .verdict
            .reason
            .clone()
            .unwrap_or_else(|| "input guardrail violation".to_owned());
        config
            .emit(TraceEvent::GuardrailViolation {
                stage: GuardrailStage::Input,
                reason: reason.clone(),
            })
            .await;
        Some(Error::input_tripwire(reason))
    }

    fn fail(state: RunState, error: Error) -> StepFlow {
        StepFlow::Done(Box::new(state), RunOutcome::Error { error })
    }
}

/// Remove halted placeholders now superseded by a real reply for the same
/// tool call.
fn sweep_superseded_halted(messages: &mut Vec<Message>) {
    let answered: Vec<String> = messages
        .iter()
        .filter(|m| {
            m.role.is_tool() && m.tool_reply_status().as_deref() != Some("halted")
        })
        .filter_map(|m| m.tool_call_id.clone())
        .collect();

    messages.retain(|m| {
        !(m.tool_reply_status().as_deref() == Some("halted")
            && m.tool_call_id.as_ref().is_some_and(|id| answered.contains(id)))
    });
}
