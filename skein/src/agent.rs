//! Agent definition and registry.
//!
//! An [`Agent`] is a named unit of behavior: instructions (static or a
//! pure function of the run state), tools, allowed handoff targets, model
//! settings, and guardrails. Agents are plain records — handoffs are a
//! pure state transition on [`RunState`](crate::state::RunState), looked
//! up in an immutable [`AgentRegistry`], never dynamic dispatch.
//!
//! # Example
//!
//! ```rust,ignore
//! let agent = Agent::new("assistant")
//!     .instructions("You are a helpful assistant.")
//!     .model("gpt-4o")
//!     .tool(calculator)
//!     .handoff("weather");
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::guardrail::{GuardrailSettings, InputGuardrail, OutputGuardrail};
use crate::state::RunState;
use crate::tool::{DynTool, Tool};

/// System-prompt source: a fixed string or a pure function of run state.
#[derive(Clone)]
pub enum Instructions {
    /// A fixed instruction string.
    Static(String),
    /// Instructions computed from the current run state.
    Dynamic(Arc<dyn Fn(&RunState) -> String + Send + Sync>),
}

impl Instructions {
    /// Resolve the instructions against the current state.
    #[must_use]
    pub fn resolve(&self, state: &RunState) -> String {
        match self {
            Self::Static(text) => text.clone(),
            Self::Dynamic(f) => f(state),
        }
    }
}

impl std::fmt::Debug for Instructions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(text) => f.debug_tuple("Static").field(text).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Model selection and sampling settings for an agent.
#[derive(Debug, Clone, Default)]
pub struct ModelSettings {
    /// Model name; may be omitted for providers that tolerate it.
    pub name: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Maximum completion tokens.
    pub max_tokens: Option<u32>,
}

/// A named unit of behavior: instructions + tools + handoffs + model.
#[derive(Clone)]
pub struct Agent {
    /// Unique name, the registry key and handoff target.
    pub name: String,
    /// System-prompt source.
    pub instructions: Instructions,
    /// Tools available to this agent.
    pub tools: Vec<DynTool>,
    /// JSON schema the final output must satisfy, when declared.
    pub output_schema: Option<Value>,
    /// Agents this one may hand off to.
    pub handoffs: Vec<String>,
    /// Model settings.
    pub model: ModelSettings,
    /// Guardrail scheduling overrides for this agent.
    pub guardrail_settings: Option<GuardrailSettings>,
    /// Input guardrails applied on this agent's first turn.
    pub input_guardrails: Vec<InputGuardrail>,
    /// Output guardrails applied to this agent's final output.
    pub output_guardrails: Vec<OutputGuardrail>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("tools", &self.tools.len())
            .field("handoffs", &self.handoffs)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Create a new agent with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Instructions::Static(String::new()),
            tools: Vec::new(),
            output_schema: None,
            handoffs: Vec::new(),
            model: ModelSettings::default(),
            guardrail_settings: None,
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
        }
    }

    /// Set static instructions.
    #[must_use]
    pub fn instructions(mut self, text: impl Into<String>) -> Self {
        self.instructions = Instructions::Static(text.into());
        self
    }

    /// Set instructions computed from the run state.
    #[must_use]
    pub fn instructions_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&RunState) -> String + Send + Sync + 'static,
    {
        self.instructions = Instructions::Dynamic(Arc::new(f));
        self
    }

    /// Add a tool.
    #[must_use]
    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    /// Add an already-shared tool.
    #[must_use]
    pub fn shared_tool(mut self, tool: DynTool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Declare the output schema the final content must satisfy.
    #[must_use]
    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Allow a handoff target.
    #[must_use]
    pub fn handoff(mut self, target: impl Into<String>) -> Self {
        self.handoffs.push(target.into());
        self
    }

    /// Set the model name.
    #[must_use]
    pub fn model(mut self, name: impl Into<String>) -> Self {
        self.model.name = Some(name.into());
        self
    }

    /// Set the full model settings.
    #[must_use]
    pub fn model_settings(mut self, settings: ModelSettings) -> Self {
        self.model = settings;
        self
    }

    /// Override guardrail scheduling for this agent.
    #[must_use]
    pub const fn guardrail_settings(mut self, settings: GuardrailSettings) -> Self {
        self.guardrail_settings = Some(settings);
        self
    }

    /// Add an input guardrail.
    #[must_use]
    pub fn input_guardrail(mut self, guardrail: InputGuardrail) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    /// Add an output guardrail.
    #[must_use]
    pub fn output_guardrail(mut self, guardrail: OutputGuardrail) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    /// Whether `target` is in this agent's handoff allow-list.
    #[must_use]
    pub fn can_hand_off(&self, target: &str) -> bool {
        self.handoffs.iter().any(|t| t == target)
    }

    /// Look up one of this agent's tools by name.
    #[must_use]
    pub fn find_tool(&self, name: &str) -> Option<&DynTool> {
        self.tools.iter().find(|t| t.definition().name == name)
    }
}

/// Immutable map from agent name to agent record.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<Agent>>,
}

impl AgentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its name, replacing any previous entry.
    pub fn register(&mut self, agent: Agent) {
        self.agents.insert(agent.name.clone(), Arc::new(agent));
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.register(agent);
        self
    }

    /// Look up an agent by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Agent>> {
        self.agents.get(name).cloned()
    }

    /// Names of all registered agents.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }

    /// Number of registered agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Returns `true` if no agents are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl FromIterator<Agent> for AgentRegistry {
    fn from_iter<I: IntoIterator<Item = Agent>>(iter: I) -> Self {
        let mut registry = Self::new();
        for agent in iter {
            registry.register(agent);
        }
        registry
    }
}
