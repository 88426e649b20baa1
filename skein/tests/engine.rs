//! End-to-end engine scenarios against the scripted mock provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use skein::prelude::*;

/// Event sink recording everything it sees.
#[derive(Debug, Default)]
struct Recorder {
    events: std::sync::Mutex<Vec<TraceEvent>>,
}

impl Recorder {
    fn kinds(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(TraceEvent::kind)
            .collect()
    }

    fn count(&self, kind: &str) -> usize {
        self.kinds().iter().filter(|k| **k == kind).count()
    }
}

#[async_trait]
impl EventSink for Recorder {
    async fn on_event(&self, event: &TraceEvent) -> Option<Value> {
        self.events.lock().unwrap().push(event.clone());
        None
    }
}

fn calculator() -> FunctionTool {
    FunctionTool::new(
        "calculator",
        "Evaluate an arithmetic expression",
        json!({
            "type": "object",
            "properties": { "expression": { "type": "string" } },
            "required": ["expression"]
        }),
        |args, _ctx| async move {
            let expression = args["expression"].as_str().unwrap_or_default();
            let sum: i64 = expression
                .split('+')
                .filter_map(|part| part.trim().parse::<i64>().ok())
                .sum();
            Ok(ToolOutput::Text(sum.to_string()))
        },
    )
}

fn config_with(
    agent: Agent,
    completions: Vec<Completion>,
    recorder: &Arc<Recorder>,
) -> RunConfig {
    let mut config = RunConfig::new(
        AgentRegistry::new().with_agent(agent),
        Arc::new(MockProvider::new(completions)),
    );
    config.event_sink = Some(Arc::clone(recorder) as Arc<dyn EventSink>);
    config
}

fn tool_call_completion(id: &str, name: &str, args: Value) -> Completion {
    Completion::from_tool_calls(vec![ToolCall::new(id, name, args.to_string())])
}

// ---------------------------------------------------------------------------
// S1 — calculator, one tool round
// ---------------------------------------------------------------------------

#[tokio::test]
async fn calculator_single_round() {
    let recorder = Arc::new(Recorder::default());
    let agent = Agent::new("math")
        .instructions("You do arithmetic.")
        .model("mock-model")
        .tool(calculator());
    let config = config_with(
        agent,
        vec![
            tool_call_completion("call_1", "calculator", json!({"expression": "15+27"})),
            Completion::from_text("42"),
        ],
        &recorder,
    );

    let result = Runner::run(RunState::new("math", "What is 15 + 27?"), &config).await;

    assert_eq!(result.output(), Some(&Value::String("42".into())));
    assert_eq!(recorder.count("tool_call_start"), 1);
    assert_eq!(recorder.count("tool_call_end"), 1);
    // user, assistant-with-tool-call, tool reply, assistant.
    assert_eq!(result.final_state.messages.len(), 4);

    // Every tool reply pairs with an earlier assistant tool_call id.
    for (index, message) in result.final_state.messages.iter().enumerate() {
        if let Some(reply_id) = &message.tool_call_id {
            let paired = result.final_state.messages[..index].iter().any(|m| {
                m.tool_calls
                    .as_ref()
                    .is_some_and(|calls| calls.iter().any(|c| &c.id == reply_id))
            });
            assert!(paired, "unpaired tool reply {reply_id}");
        }
    }
}

// ---------------------------------------------------------------------------
// S2 / S3 — approval gate
// ---------------------------------------------------------------------------

fn book_flight(executed: Arc<AtomicBool>) -> FunctionTool {
    FunctionTool::new(
        "book_flight",
        "Book a flight",
        json!({
            "type": "object",
            "properties": { "destination": { "type": "string" } },
            "required": ["destination"]
        }),
        move |_args, _ctx| {
            let executed = Arc::clone(&executed);
            async move {
                executed.store(true, Ordering::SeqCst);
                Ok(ToolOutput::from("booked"))
            }
        },
    )
    .requires_approval(true)
}

#[tokio::test]
async fn approval_interrupts_then_resumes() {
    let executed = Arc::new(AtomicBool::new(false));
    let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
    let recorder = Arc::new(Recorder::default());

    let agent = Agent::new("travel")
        .instructions("Book travel.")
        .model("mock-model")
        .tool(book_flight(Arc::clone(&executed)));

    let mut config = config_with(
        agent.clone(),
        vec![tool_call_completion(
            "call_1",
            "book_flight",
            json!({"destination": "Tokyo"}),
        )],
        &recorder,
    );
    config = config.memory(Arc::clone(&store), MemoryConfig::auto("conv-1"));

    let result = Runner::run(RunState::new("travel", "Book me a flight to Tokyo"), &config).await;

    assert!(result.is_interrupted());
    let interruptions = result.interruptions();
    assert_eq!(interruptions.len(), 1);
    let Interruption::ToolApproval { tool_call, agent: by, .. } = &interruptions[0] else {
        panic!("expected a ToolApproval interruption");
    };
    assert_eq!(tool_call.name, "book_flight");
    assert_eq!(by, "travel");
    assert!(!executed.load(Ordering::SeqCst));

    // The approval is recorded pending.
    assert_eq!(
        result.final_state.approvals["call_1"].status,
        ApprovalStatus::Pending
    );

    // Stored log keeps the halted placeholder; the returned state omits it.
    let stored = store.get_conversation("conv-1").await.unwrap().unwrap();
    assert!(stored
        .messages
        .iter()
        .any(|m| m.tool_reply_status().as_deref() == Some("halted")));
    assert!(result
        .final_state
        .messages
        .iter()
        .all(|m| m.tool_reply_status().as_deref() != Some("halted")));

    // Resume with approval: the tool runs, then the model wraps up.
    let resume_state = result
        .final_state
        .clone()
        .with_approval("call_1", ApprovalValue::approved());
    let resume_recorder = Arc::new(Recorder::default());
    let mut resume_config = config_with(
        agent,
        vec![Completion::from_text("Booked!")],
        &resume_recorder,
    );
    resume_config = resume_config.memory(Arc::clone(&store), MemoryConfig::auto("conv-1"));

    let resumed = Runner::run(resume_state, &resume_config).await;

    assert!(executed.load(Ordering::SeqCst));
    assert_eq!(resumed.output(), Some(&Value::String("Booked!".into())));
    // One turn for the tool-resume round, one for the model call.
    assert_eq!(resumed.final_state.turn_count, 3);
    let replies: Vec<_> = resumed
        .final_state
        .messages
        .iter()
        .filter_map(Message::tool_reply_status)
        .collect();
    assert!(replies.contains(&"approved_and_executed".to_owned()));
}

#[tokio::test]
async fn rejection_produces_denial_without_executing() {
    let executed = Arc::new(AtomicBool::new(false));
    let recorder = Arc::new(Recorder::default());
    let agent = Agent::new("travel")
        .instructions("Book travel.")
        .model("mock-model")
        .tool(book_flight(Arc::clone(&executed)));

    let config = config_with(
        agent.clone(),
        vec![tool_call_completion(
            "call_1",
            "book_flight",
            json!({"destination": "Tokyo"}),
        )],
        &recorder,
    );
    let result = Runner::run(RunState::new("travel", "Book a flight"), &config).await;
    assert!(result.is_interrupted());

    let resume_state = result
        .final_state
        .clone()
        .with_approval("call_1", ApprovalValue::rejected(Some("user changed mind")));
    let resume_config = config_with(
        agent,
        vec![Completion::from_text("Understood, how about a train instead?")],
        &recorder,
    );

    let resumed = Runner::run(resume_state, &resume_config).await;

    assert!(!executed.load(Ordering::SeqCst));
    assert!(resumed.is_completed());

    let denial = resumed
        .final_state
        .messages
        .iter()
        .find(|m| m.tool_reply_status().as_deref() == Some("approval_denied"))
        .expect("denial reply present");
    let envelope: Value = serde_json::from_str(&denial.text().unwrap()).unwrap();
    assert_eq!(envelope["rejection_reason"], "user changed mind");
}

// ---------------------------------------------------------------------------
// S4 — handoffs
// ---------------------------------------------------------------------------

fn router(target: &str) -> FunctionTool {
    let target = target.to_owned();
    FunctionTool::new(
        "route",
        "Route the request to a specialist",
        json!({"type": "object"}),
        move |_args, _ctx| {
            let target = target.clone();
            async move { Ok(ToolOutput::handoff(target)) }
        },
    )
}

#[tokio::test]
async fn handoff_switches_agents() {
    let recorder = Arc::new(Recorder::default());
    let registry = AgentRegistry::new()
        .with_agent(
            Agent::new("coordinator")
                .instructions("Route requests.")
                .model("mock-model")
                .tool(router("weather"))
                .handoff("weather"),
        )
        .with_agent(
            Agent::new("weather")
                .instructions("Report the weather.")
                .model("mock-model"),
        );

    let mut config = RunConfig::new(
        registry,
        Arc::new(MockProvider::new(vec![
            tool_call_completion("call_1", "route", json!({})),
            Completion::from_text("Sunny in Tokyo"),
        ])),
    );
    config.event_sink = Some(Arc::clone(&recorder) as Arc<dyn EventSink>);

    let result = Runner::run(RunState::new("coordinator", "What's the weather?"), &config).await;

    assert_eq!(
        result.output(),
        Some(&Value::String("Sunny in Tokyo".into()))
    );
    assert_eq!(result.final_state.current_agent, "weather");
    assert_eq!(recorder.count("handoff"), 1);
    assert!(recorder
        .events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, TraceEvent::Handoff { from, to } if from == "coordinator" && to == "weather")));
}

#[tokio::test]
async fn handoff_outside_allow_list_is_denied() {
    let recorder = Arc::new(Recorder::default());
    let agent = Agent::new("coordinator")
        .instructions("Route requests.")
        .model("mock-model")
        .tool(router("billing"))
        .handoff("weather");
    let config = config_with(
        agent,
        vec![tool_call_completion("call_1", "route", json!({}))],
        &recorder,
    );

    let result = Runner::run(RunState::new("coordinator", "Pay my bill"), &config).await;

    assert!(matches!(result.error(), Some(Error::Handoff { .. })));
    assert_eq!(recorder.count("handoff_denied"), 1);
    assert_eq!(recorder.count("handoff"), 0);
}

// ---------------------------------------------------------------------------
// S5 — input guardrail, parallel mode
// ---------------------------------------------------------------------------

#[tokio::test]
async fn input_guardrail_discards_model_response() {
    let recorder = Arc::new(Recorder::default());
    let agent = Agent::new("assistant")
        .instructions("Help out.")
        .model("mock-model");
    let config = config_with(
        agent,
        vec![Completion::from_text("should never surface")],
        &recorder,
    )
    .input_guardrail(InputGuardrail::from_fn("spam-filter", |messages| {
        let text: String = messages.iter().filter_map(Message::text).collect();
        if text.contains("spam") {
            Verdict::block("spam detected")
        } else {
            Verdict::pass()
        }
    }));

    let result = Runner::run(RunState::new("assistant", "buy cheap spam now"), &config).await;

    assert!(matches!(
        result.error(),
        Some(Error::InputGuardrailTripwire { reason }) if reason == "spam detected"
    ));
    assert_eq!(recorder.count("assistant_message"), 0);
    assert_eq!(recorder.count("guardrail_violation"), 1);
    // The discarded model response never reaches the state.
    assert!(result
        .final_state
        .messages
        .iter()
        .all(|m| !m.role.is_assistant()));
}

// ---------------------------------------------------------------------------
// S6 — clarification round trip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clarification_interrupts_and_resumes() {
    let recorder = Arc::new(Recorder::default());
    let agent = Agent::new("travel")
        .instructions("Book travel.")
        .model("mock-model");
    let config = config_with(
        agent.clone(),
        vec![tool_call_completion(
            "call_1",
            "request_user_clarification",
            json!({
                "question": "Which airport?",
                "options": [
                    {"id": "JFK", "label": "John F. Kennedy"},
                    {"id": "EWR", "label": "Newark"}
                ]
            }),
        )],
        &recorder,
    )
    .allow_clarification(true);

    let result = Runner::run(RunState::new("travel", "Book a flight to New York"), &config).await;

    assert!(result.is_interrupted());
    let Interruption::ClarificationRequired {
        clarification_id,
        question,
        options,
        ..
    } = &result.interruptions()[0]
    else {
        panic!("expected a ClarificationRequired interruption");
    };
    assert_eq!(question, "Which airport?");
    assert_eq!(options.len(), 2);
    assert_eq!(recorder.count("clarification_requested"), 1);

    // Resume with the selected option; the placeholder is rewritten and
    // the loop proceeds straight into the next model round.
    let resume_state = result
        .final_state
        .clone()
        .with_clarification(clarification_id.clone(), "JFK");
    let resume_recorder = Arc::new(Recorder::default());
    let resume_config = config_with(
        agent,
        vec![Completion::from_text("Booked out of JFK")],
        &resume_recorder,
    )
    .allow_clarification(true);

    let resumed = Runner::run(resume_state, &resume_config).await;

    assert_eq!(
        resumed.output(),
        Some(&Value::String("Booked out of JFK".into()))
    );
    assert_eq!(resume_recorder.count("clarification_provided"), 1);
    let statuses: Vec<_> = resumed
        .final_state
        .messages
        .iter()
        .filter_map(Message::tool_reply_status)
        .collect();
    assert!(statuses.contains(&"clarification_provided".to_owned()));
    assert!(!statuses.contains(&"awaiting_clarification".to_owned()));
}

// ---------------------------------------------------------------------------
// S7 — turn bound
// ---------------------------------------------------------------------------

#[tokio::test]
async fn max_turns_bound_is_enforced() {
    let recorder = Arc::new(Recorder::default());
    let agent = Agent::new("loopy")
        .instructions("Loop forever.")
        .model("mock-model")
        .tool(calculator());
    let config = config_with(
        agent,
        vec![tool_call_completion(
            "call_1",
            "calculator",
            json!({"expression": "1+1"}),
        )],
        &recorder,
    )
    .max_turns(2);

    let result = Runner::run(RunState::new("loopy", "count forever"), &config).await;

    assert!(matches!(
        result.error(),
        Some(Error::MaxTurnsExceeded { turns: 2 })
    ));
    assert!(result.final_state.turn_count <= 2);
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

#[tokio::test]
async fn streaming_emits_partials_without_final_duplicate() {
    let recorder = Arc::new(Recorder::default());
    let agent = Agent::new("echo")
        .instructions("Echo.")
        .model("mock-model");
    let provider = MockProvider::new(vec![]).with_stream_scripts(vec![vec![
        Ok(CompletionChunk::text("Hel")),
        Ok(CompletionChunk::text("lo")),
        Ok(CompletionChunk::done(Some("stop".into()))),
    ]]);
    let mut config = RunConfig::new(
        AgentRegistry::new().with_agent(agent),
        Arc::new(provider),
    );
    config.event_sink = Some(Arc::clone(&recorder) as Arc<dyn EventSink>);

    let result = Runner::run(RunState::new("echo", "say hello"), &config).await;

    assert_eq!(result.output(), Some(&Value::String("Hello".into())));
    let events = recorder.events.lock().unwrap();
    let partials = events
        .iter()
        .filter(|e| matches!(e, TraceEvent::AssistantMessage { partial: true, .. }))
        .count();
    let finals = events
        .iter()
        .filter(|e| matches!(e, TraceEvent::AssistantMessage { partial: false, .. }))
        .count();
    assert_eq!(partials, 2);
    assert_eq!(finals, 0);
}

#[tokio::test]
async fn failing_stream_falls_back_to_plain_call() {
    let recorder = Arc::new(Recorder::default());
    let agent = Agent::new("echo")
        .instructions("Echo.")
        .model("mock-model");
    let provider = MockProvider::new(vec![Completion::from_text("recovered")])
        .with_stream_scripts(vec![vec![
            Ok(CompletionChunk::text("par")),
            Err(Error::model_behavior("stream died")),
        ]]);
    let mut config = RunConfig::new(
        AgentRegistry::new().with_agent(agent),
        Arc::new(provider),
    );
    config.event_sink = Some(Arc::clone(&recorder) as Arc<dyn EventSink>);

    let result = Runner::run(RunState::new("echo", "say hello"), &config).await;

    assert_eq!(result.output(), Some(&Value::String("recovered".into())));
}

// ---------------------------------------------------------------------------
// Structured output and misc properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn output_schema_decodes_final_content() {
    let recorder = Arc::new(Recorder::default());
    let agent = Agent::new("extractor")
        .instructions("Extract entities.")
        .model("mock-model")
        .output_schema(json!({
            "type": "object",
            "properties": { "city": { "type": "string" } },
            "required": ["city"]
        }));
    let config = config_with(
        agent,
        vec![Completion::from_text(r#"{"city":"Tokyo"}"#)],
        &recorder,
    );

    let result = Runner::run(RunState::new("extractor", "Where?"), &config).await;
    assert_eq!(result.output(), Some(&json!({"city": "Tokyo"})));
    assert_eq!(recorder.count("output_parse"), 1);
}

#[tokio::test]
async fn output_schema_mismatch_is_a_decode_error() {
    let recorder = Arc::new(Recorder::default());
    let agent = Agent::new("extractor")
        .instructions("Extract entities.")
        .model("mock-model")
        .output_schema(json!({
            "type": "object",
            "properties": { "city": { "type": "string" } },
            "required": ["city"]
        }));
    let config = config_with(agent, vec![Completion::from_text("not json at all")], &recorder);

    let result = Runner::run(RunState::new("extractor", "Where?"), &config).await;
    assert!(matches!(result.error(), Some(Error::Decode { .. })));
    assert_eq!(recorder.count("decode_error"), 1);
}

#[tokio::test]
async fn missing_agent_is_reported() {
    let config = RunConfig::new(
        AgentRegistry::new(),
        Arc::new(MockProvider::text("unused")),
    );

    let result = Runner::run(RunState::new("ghost", "hello?"), &config).await;
    assert!(matches!(
        result.error(),
        Some(Error::AgentNotFound { agent_name }) if agent_name == "ghost"
    ));
}

#[tokio::test]
async fn missing_model_name_errors_unless_provider_tolerates() {
    let agent = Agent::new("nameless").instructions("No model set.");
    let config = RunConfig::new(
        AgentRegistry::new().with_agent(agent.clone()),
        Arc::new(MockProvider::text("hi")),
    );
    let result = Runner::run(RunState::new("nameless", "hello"), &config).await;
    assert!(matches!(result.error(), Some(Error::ModelBehavior { .. })));

    let tolerant = RunConfig::new(
        AgentRegistry::new().with_agent(agent),
        Arc::new(MockProvider::text("hi").with_model_name_optional()),
    );
    let result = Runner::run(RunState::new("nameless", "hello"), &tolerant).await;
    assert!(result.is_completed());
}

#[tokio::test]
async fn identical_runs_emit_identical_event_sequences() {
    let state = RunState::new("math", "What is 1 + 2?");

    let mut sequences = Vec::new();
    for _ in 0..2 {
        let recorder = Arc::new(Recorder::default());
        let agent = Agent::new("math")
            .instructions("You do arithmetic.")
            .model("mock-model")
            .tool(calculator());
        let config = config_with(
            agent,
            vec![
                tool_call_completion("call_1", "calculator", json!({"expression": "1+2"})),
                Completion::from_text("3"),
            ],
            &recorder,
        );
        let _ = Runner::run(state.clone(), &config).await;
        sequences.push(recorder.kinds());
    }

    assert_eq!(sequences[0], sequences[1]);
}

#[tokio::test]
async fn before_tool_execution_can_replace_arguments() {
    struct ArgRewriter;

    #[async_trait]
    impl EventSink for ArgRewriter {
        async fn on_event(&self, event: &TraceEvent) -> Option<Value> {
            match event {
                TraceEvent::BeforeToolExecution { .. } => {
                    Some(json!({"expression": "40+2"}))
                }
                _ => None,
            }
        }
    }

    let agent = Agent::new("math")
        .instructions("You do arithmetic.")
        .model("mock-model")
        .tool(calculator());
    let config = RunConfig::new(
        AgentRegistry::new().with_agent(agent),
        Arc::new(MockProvider::new(vec![
            tool_call_completion("call_1", "calculator", json!({"expression": "1+1"})),
            Completion::from_text("done"),
        ])),
    )
    .on_event(ArgRewriter);

    let result = Runner::run(RunState::new("math", "add"), &config).await;
    let reply = result
        .final_state
        .messages
        .iter()
        .find(|m| m.role.is_tool())
        .unwrap();
    let envelope: Value = serde_json::from_str(&reply.text().unwrap()).unwrap();
    // The rewritten expression, not the model's, was evaluated.
    assert_eq!(envelope["result"], "42");
}
