//! Error types for the skein execution core.
//!
//! Every terminal failure of an agent run is one of the tagged variants of
//! [`Error`]. Tool execution failures are *not* represented here — the
//! dispatcher recovers them locally and reports them to the model as
//! tool-reply envelopes with `status: "execution_error"` so the loop can
//! continue. Memory failures are logged and swallowed by the engine; the
//! [`Error::Memory`] variant exists for callers that talk to a store
//! directly.

use crate::memory::MemoryError;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The terminal error taxonomy for agent runs.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The turn loop hit its configured bound without producing output.
    #[error("maximum turns exceeded ({turns})")]
    MaxTurnsExceeded {
        /// Number of turns taken when the bound was hit.
        turns: u32,
    },

    /// The provider returned neither content nor tool calls, or raised.
    #[error("model behavior error: {detail}")]
    ModelBehavior {
        /// Description of the misbehavior.
        detail: String,
    },

    /// Final content did not conform to the agent's declared output schema.
    #[error("output decode error: {}", .issues.join("; "))]
    Decode {
        /// Individual schema violations.
        issues: Vec<String>,
    },

    /// An input guardrail vetoed the run.
    #[error("input guardrail tripwire: {reason}")]
    InputGuardrailTripwire {
        /// The guardrail's stated reason.
        reason: String,
    },

    /// An output guardrail vetoed the final output.
    #[error("output guardrail tripwire: {reason}")]
    OutputGuardrailTripwire {
        /// The guardrail's stated reason.
        reason: String,
    },

    /// Catastrophic dispatcher failure (not an ordinary tool error).
    #[error("tool call error in '{tool}': {detail}")]
    ToolCall {
        /// Name of the tool being dispatched.
        tool: String,
        /// Description of the failure.
        detail: String,
    },

    /// An agent attempted a handoff to a target not in its allow-list.
    #[error("handoff error: {detail}")]
    Handoff {
        /// Description of the rejected handoff.
        detail: String,
    },

    /// `current_agent` named an agent missing from the registry.
    #[error("agent not found: '{agent_name}'")]
    AgentNotFound {
        /// The missing agent's name.
        agent_name: String,
    },

    /// A memory store operation failed.
    #[error("memory error: {message}")]
    Memory {
        /// The underlying store error message.
        message: String,
    },
}

impl Error {
    /// Create a new model behavior error.
    #[must_use]
    pub fn model_behavior(detail: impl Into<String>) -> Self {
        Self::ModelBehavior {
            detail: detail.into(),
        }
    }

    /// Create a new decode error from a list of schema violations.
    #[must_use]
    pub fn decode(issues: Vec<String>) -> Self {
        Self::Decode { issues }
    }

    /// Create a new max-turns error.
    #[must_use]
    pub const fn max_turns(turns: u32) -> Self {
        Self::MaxTurnsExceeded { turns }
    }

    /// Create a new input guardrail tripwire error.
    #[must_use]
    pub fn input_tripwire(reason: impl Into<String>) -> Self {
        Self::InputGuardrailTripwire {
            reason: reason.into(),
        }
    }

    /// Create a new output guardrail tripwire error.
    #[must_use]
    pub fn output_tripwire(reason: impl Into<String>) -> Self {
        Self::OutputGuardrailTripwire {
            reason: reason.into(),
        }
    }

    /// Create a new handoff error.
    #[must_use]
    pub fn handoff(detail: impl Into<String>) -> Self {
        Self::Handoff {
            detail: detail.into(),
        }
    }

    /// Create a new agent-not-found error.
    #[must_use]
    pub fn agent_not_found(agent_name: impl Into<String>) -> Self {
        Self::AgentNotFound {
            agent_name: agent_name.into(),
        }
    }

    /// The snake_case tag of this variant, as surfaced in trace events.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MaxTurnsExceeded { .. } => "max_turns_exceeded",
            Self::ModelBehavior { .. } => "model_behavior_error",
            Self::Decode { .. } => "decode_error",
            Self::InputGuardrailTripwire { .. } => "input_guardrail_tripwire",
            Self::OutputGuardrailTripwire { .. } => "output_guardrail_tripwire",
            Self::ToolCall { .. } => "tool_call_error",
            Self::Handoff { .. } => "handoff_error",
            Self::AgentNotFound { .. } => "agent_not_found",
            Self::Memory { .. } => "memory_error",
        }
    }
}

impl From<MemoryError> for Error {
    fn from(err: MemoryError) -> Self {
        Self::Memory {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let err = Error::model_behavior("no message");
        assert_eq!(err.to_string(), "model behavior error: no message");
    }

    #[test]
    fn decode_joins_issues() {
        let err = Error::decode(vec!["missing field `a`".into(), "bad type".into()]);
        assert!(err.to_string().contains("missing field `a`; bad type"));
    }

    #[test]
    fn kind_is_snake_case() {
        assert_eq!(Error::max_turns(2).kind(), "max_turns_exceeded");
        assert_eq!(Error::handoff("x").kind(), "handoff_error");
        assert_eq!(
            Error::agent_not_found("weather").kind(),
            "agent_not_found"
        );
    }
}
