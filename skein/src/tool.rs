//! Tool trait and utilities for defining agent tools.
//!
//! Tools are the primary way agents interact with the world. Each tool
//! carries a [`ToolDefinition`] (name, description, JSON-schema
//! parameters), an async `execute`, and an optional approval gate. The
//! dispatcher validates arguments against the declared schema *before*
//! execution and reports violations to the model as a
//! `validation_error` reply envelope rather than failing the run.
//!
//! # OpenAI API Alignment
//!
//! [`ToolDefinition`] serializes to the function-calling format
//! `{"type": "function", "function": {...}}` accepted by chat-completion
//! style APIs.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::RunId;

/// A type alias for `Result<T, ToolError>`.
pub type ToolResult<T> = Result<T, ToolError>;

/// A shared, thread-safe tool trait object.
pub type DynTool = Arc<dyn Tool>;

/// Error raised by a tool's `execute`.
///
/// These never terminate a run: the dispatcher converts them into
/// `execution_error` reply envelopes so the model can react.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    /// The tool rejected its arguments at runtime.
    #[error("invalid arguments: {message}")]
    InvalidArguments {
        /// Description of the problem.
        message: String,
    },

    /// The tool failed while executing.
    #[error("{message}")]
    Execution {
        /// Description of the failure.
        message: String,
    },
}

impl ToolError {
    /// Create a new execution error.
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    /// Create a new invalid-arguments error.
    #[must_use]
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: message.into(),
        }
    }
}

/// Definition of a tool for LLM function calling.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDefinition {
    /// Name of the tool (snake_case).
    pub name: String,

    /// Description of what the tool does.
    pub description: String,

    /// JSON schema for the tool's parameters.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Create a definition deriving the parameter schema from a Rust type.
    ///
    /// The type must derive [`schemars::JsonSchema`]. The `$schema` meta
    /// field is stripped — LLM APIs don't need it.
    #[must_use]
    pub fn from_type<T: schemars::JsonSchema>(
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let root = schemars::schema_for!(T);
        let mut schema = serde_json::to_value(&root).unwrap_or_default();
        if let Value::Object(ref mut map) = schema {
            map.remove("$schema");
        }
        Self::new(name, description, schema)
    }

    /// Returns the tool name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Custom serialization to OpenAI function calling format.
impl Serialize for ToolDefinition {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut function = serde_json::Map::new();
        function.insert("name".to_owned(), Value::String(self.name.clone()));
        function.insert(
            "description".to_owned(),
            Value::String(self.description.clone()),
        );
        function.insert("parameters".to_owned(), self.parameters.clone());

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", "function")?;
        map.serialize_entry("function", &function)?;
        map.end()
    }
}

/// Validate `args` against a declarative JSON-schema subset.
///
/// Checks: the arguments are an object, every `required` key is present,
/// and every declared property that is present matches its declared
/// `type`. Returns the list of violations (empty means valid).
#[must_use]
pub fn validate_arguments(schema: &Value, args: &Value) -> Vec<String> {
    let mut issues = Vec::new();

    let Some(args_obj) = args.as_object() else {
        issues.push(format!(
            "arguments must be a JSON object, got {}",
            json_type_name(args)
        ));
        return issues;
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !args_obj.contains_key(key) {
                issues.push(format!("missing required parameter `{key}`"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, value) in args_obj {
            let Some(prop) = properties.get(key) else {
                if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
                    issues.push(format!("unexpected parameter `{key}`"));
                }
                continue;
            };
            if let Some(expected) = prop.get("type").and_then(Value::as_str)
                && !type_matches(expected, value)
            {
                issues.push(format!(
                    "parameter `{key}` expected {expected}, got {}",
                    json_type_name(value)
                ));
            }
        }
    }

    issues
}

/// Validate any JSON value against a schema subset.
///
/// Object schemas delegate to [`validate_arguments`]; scalar and array
/// schemas check the top-level `type` only.
#[must_use]
pub fn validate_value(schema: &Value, value: &Value) -> Vec<String> {
    match schema.get("type").and_then(Value::as_str) {
        Some("object") => validate_arguments(schema, value),
        Some(expected) if !type_matches(expected, value) => {
            vec![format!(
                "expected {expected}, got {}",
                json_type_name(value)
            )]
        }
        _ => Vec::new(),
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Execution context passed to every tool invocation.
///
/// `context` is the run's context value; when an approval carries
/// `additional_context`, the dispatcher shallow-merges it in for that
/// single execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// The run context value.
    pub context: Value,
    /// Id of the current run.
    pub run_id: RunId,
    /// Name of the agent dispatching the call.
    pub agent: String,
}

/// Output of a tool execution.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    /// A plain string result.
    Text(String),
    /// A structured result serialized into the reply envelope.
    Structured(ToolPayload),
}

impl ToolOutput {
    /// Signal a handoff to another agent.
    #[must_use]
    pub fn handoff(target: impl Into<String>) -> Self {
        let target: String = target.into();
        Self::Text(serde_json::json!({ "handoff_to": target }).to_string())
    }

    /// Render the output as the result string the dispatcher inspects.
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Structured(payload) => {
                serde_json::to_string(&payload).unwrap_or_else(|_| payload.status)
            }
        }
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

/// A structured tool result: status plus data plus optional metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPayload {
    /// Status label chosen by the tool.
    pub status: String,
    /// The result data.
    pub data: Value,
    /// Optional metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// The core trait for all tools that agents can use.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool definition for LLM function calling.
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with validated arguments.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput>;

    /// Whether this invocation requires human approval before executing.
    ///
    /// Receives the run context and the (validated) arguments; the default
    /// never asks.
    fn needs_approval(&self, _context: &Value, _args: &Value) -> bool {
        false
    }

    /// Shorthand for the tool's name.
    fn name(&self) -> String {
        self.definition().name
    }
}

type HandlerFn =
    Arc<dyn Fn(Value, ToolContext) -> BoxFuture<'static, ToolResult<ToolOutput>> + Send + Sync>;

/// Approval gate for a [`FunctionTool`].
#[derive(Clone)]
enum ApprovalGate {
    Never,
    Always,
    When(Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>),
}

/// A tool built from a definition and an async closure.
///
/// The ergonomic way to define tools without a dedicated struct:
///
/// ```rust,ignore
/// let calculator = FunctionTool::new(
///     "calculator",
///     "Evaluate an arithmetic expression",
///     serde_json::json!({
///         "type": "object",
///         "properties": { "expression": { "type": "string" } },
///         "required": ["expression"]
///     }),
///     |args, _ctx| async move {
///         Ok(ToolOutput::from(evaluate(&args)?))
///     },
/// );
/// ```
#[derive(Clone)]
pub struct FunctionTool {
    definition: ToolDefinition,
    handler: HandlerFn,
    approval: ApprovalGate,
}

impl FunctionTool {
    /// Create a new tool from a definition and handler closure.
    #[must_use]
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult<ToolOutput>> + Send + 'static,
    {
        Self {
            definition: ToolDefinition::new(name, description, parameters),
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
            approval: ApprovalGate::Never,
        }
    }

    /// Require human approval for every invocation.
    #[must_use]
    pub fn requires_approval(mut self, required: bool) -> Self {
        self.approval = if required {
            ApprovalGate::Always
        } else {
            ApprovalGate::Never
        };
        self
    }

    /// Require approval only when the predicate returns `true`.
    ///
    /// The predicate receives the run context and the call arguments.
    #[must_use]
    pub fn approval_when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.approval = ApprovalGate::When(Arc::new(predicate));
        self
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        (self.handler)(args, ctx.clone()).await
    }

    fn needs_approval(&self, context: &Value, args: &Value) -> bool {
        match &self.approval {
            ApprovalGate::Never => false,
            ApprovalGate::Always => true,
            ApprovalGate::When(predicate) => predicate(context, args),
        }
    }
}

// ---------------------------------------------------------------------------
// Reply envelopes
// ---------------------------------------------------------------------------

/// Canonical status of a tool reply envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// Plain execution succeeded.
    Executed,
    /// Execution after an approval gate passed.
    ApprovedAndExecuted,
    /// Placeholder: the call awaits human approval.
    Halted,
    /// Placeholder: the call awaits a clarification answer.
    AwaitingClarification,
    /// The user rejected the call; the tool did not run.
    ApprovalDenied,
    /// Arguments failed schema validation.
    ValidationError,
    /// The tool raised during execution.
    ExecutionError,
    /// No tool with the requested name exists on the agent.
    ToolNotFound,
    /// A clarification answer was provided on resume.
    ClarificationProvided,
}

impl ToolStatus {
    /// Returns the snake_case string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Executed => "executed",
            Self::ApprovedAndExecuted => "approved_and_executed",
            Self::Halted => "halted",
            Self::AwaitingClarification => "awaiting_clarification",
            Self::ApprovalDenied => "approval_denied",
            Self::ValidationError => "validation_error",
            Self::ExecutionError => "execution_error",
            Self::ToolNotFound => "tool_not_found",
            Self::ClarificationProvided => "clarification_provided",
        }
    }

    /// Returns `true` for placeholder statuses that must never reach the model.
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        matches!(self, Self::Halted)
    }
}

/// The canonical JSON wrapper the dispatcher produces for every tool
/// outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolReply {
    /// Outcome status.
    pub status: ToolStatus,
    /// The result string, when the tool ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Name of the tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Human-readable summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Schema violations, for `validation_error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<Vec<String>>,
    /// Why the user rejected the call, for `approval_denied`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    /// The clarification this call awaits or answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarification_id: Option<String>,
    /// Extra context merged in by an approval.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_context: Option<Value>,
}

impl ToolReply {
    fn base(status: ToolStatus, tool_name: Option<&str>) -> Self {
        Self {
            status,
            result: None,
            tool_name: tool_name.map(str::to_owned),
            message: None,
            validation_errors: None,
            rejection_reason: None,
            clarification_id: None,
            approval_context: None,
        }
    }

    /// Envelope for a plain successful execution.
    #[must_use]
    pub fn executed(tool_name: &str, result: impl Into<String>) -> Self {
        let mut reply = Self::base(ToolStatus::Executed, Some(tool_name));
        reply.result = Some(result.into());
        reply.message = Some(format!("Tool '{tool_name}' executed"));
        reply
    }

    /// Envelope for an execution behind a passed approval gate.
    #[must_use]
    pub fn approved_and_executed(
        tool_name: &str,
        result: impl Into<String>,
        approval_context: Option<Value>,
    ) -> Self {
        let mut reply = Self::base(ToolStatus::ApprovedAndExecuted, Some(tool_name));
        reply.result = Some(result.into());
        reply.message = Some(format!("Tool '{tool_name}' approved and executed"));
        reply.approval_context = approval_context;
        reply
    }

    /// Placeholder for a call awaiting human approval.
    #[must_use]
    pub fn halted(tool_name: &str) -> Self {
        let mut reply = Self::base(ToolStatus::Halted, Some(tool_name));
        reply.message = Some(format!("Tool '{tool_name}' awaits approval"));
        reply
    }

    /// Placeholder for a call awaiting a clarification answer.
    #[must_use]
    pub fn awaiting_clarification(clarification_id: &str) -> Self {
        let mut reply = Self::base(ToolStatus::AwaitingClarification, None);
        reply.clarification_id = Some(clarification_id.to_owned());
        reply.message = Some("Awaiting user clarification".to_owned());
        reply
    }

    /// Envelope for a rejected approval; the tool did not run.
    #[must_use]
    pub fn approval_denied(tool_name: &str, rejection_reason: Option<String>) -> Self {
        let mut reply = Self::base(ToolStatus::ApprovalDenied, Some(tool_name));
        reply.rejection_reason = rejection_reason;
        reply.message = Some(format!("Tool '{tool_name}' was denied by the user"));
        reply
    }

    /// Envelope for arguments that failed schema validation.
    #[must_use]
    pub fn validation_error(tool_name: &str, errors: Vec<String>) -> Self {
        let mut reply = Self::base(ToolStatus::ValidationError, Some(tool_name));
        reply.message = Some(format!("Invalid arguments for tool '{tool_name}'"));
        reply.validation_errors = Some(errors);
        reply
    }

    /// Envelope for a tool that raised during execution.
    #[must_use]
    pub fn execution_error(tool_name: &str, message: impl Into<String>) -> Self {
        let mut reply = Self::base(ToolStatus::ExecutionError, Some(tool_name));
        reply.message = Some(message.into());
        reply
    }

    /// Envelope for an unknown tool name.
    #[must_use]
    pub fn tool_not_found(tool_name: &str) -> Self {
        let mut reply = Self::base(ToolStatus::ToolNotFound, Some(tool_name));
        reply.message = Some(format!("Tool '{tool_name}' not found"));
        reply
    }

    /// Envelope recording the user's clarification answer on resume.
    #[must_use]
    pub fn clarification_provided(clarification_id: &str, selected: &str) -> Self {
        let mut reply = Self::base(ToolStatus::ClarificationProvided, None);
        reply.clarification_id = Some(clarification_id.to_owned());
        reply.result = Some(selected.to_owned());
        reply.message = Some(format!("User selected option '{selected}'"));
        reply
    }

    /// Serialize the envelope to its JSON string form.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"status":"{}"}}"#, self.status.as_str())
        })
    }

    /// Wrap the envelope into a tool-role message answering `tool_call_id`.
    #[must_use]
    pub fn into_message(self, tool_call_id: &str) -> crate::message::Message {
        crate::message::Message::tool(tool_call_id, self.to_json())
    }
}

// ---------------------------------------------------------------------------
// Clarification tool
// ---------------------------------------------------------------------------

/// Name of the synthetic clarification tool injected by the engine.
pub const CLARIFICATION_TOOL_NAME: &str = "request_user_clarification";

/// JSON key whose presence marks a clarification trigger payload.
pub(crate) const CLARIFICATION_TRIGGER_KEY: &str = "_clarification_trigger";

/// One selectable answer to a clarification question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ClarificationOption {
    /// Stable identifier of the option.
    pub id: String,
    /// Human-readable label.
    pub label: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ClarificationArgs {
    /// The question to put to the user.
    question: String,
    /// Selectable answers (at least two).
    options: Vec<ClarificationOption>,
}

/// The synthetic tool the model calls to ask the user a multiple-choice
/// question.
///
/// Its result payload carries `_clarification_trigger: true`, which the
/// dispatcher recognizes and converts into a
/// [`ClarificationRequired`](crate::state::Interruption) interruption.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClarificationTool;

#[async_trait]
impl Tool for ClarificationTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::from_type::<ClarificationArgs>(
            CLARIFICATION_TOOL_NAME,
            "Ask the user a multiple-choice question when their intent is ambiguous. \
             Provide at least two options.",
        )
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let args: ClarificationArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::invalid_arguments(e.to_string()))?;
        if args.options.len() < 2 {
            return Err(ToolError::invalid_arguments(
                "at least two options are required",
            ));
        }
        let payload = serde_json::json!({
            CLARIFICATION_TRIGGER_KEY: true,
            "clarification_id": format!("clar_{}", uuid::Uuid::new_v4().simple()),
            "question": args.question,
            "options": args.options,
        });
        Ok(ToolOutput::Text(payload.to_string()))
    }
}
