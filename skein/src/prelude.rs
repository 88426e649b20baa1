//! Convenience re-exports for common usage.
//!
//! ```rust,ignore
//! use skein::prelude::*;
//! ```

pub use crate::agent::{Agent, AgentRegistry, ModelSettings};
pub use crate::approval::{
    ApprovalStore, ClarificationStore, InMemoryApprovalStore, InMemoryClarificationStore,
};
pub use crate::error::{Error, Result};
pub use crate::events::{EventSink, GuardrailStage, NoopSink, TraceEvent};
pub use crate::guardrail::{
    ExecutionMode, FailSafe, GuardrailSettings, InputGuardrail, OutputGuardrail, Verdict,
};
pub use crate::ids::{RunId, TraceId};
pub use crate::memory::{
    CheckpointCriteria, Conversation, ConversationMetadata, InMemoryStore, MemoryConfig,
    MemoryStore, TextMatchKind,
};
#[cfg(feature = "sqlite")]
pub use crate::memory::SqliteStore;
pub use crate::message::{Attachment, AttachmentKind, Content, Message, Role, ToolCall};
pub use crate::provider::{
    Completion, CompletionRequest, MockProvider, ModelProvider, SharedProvider,
};
pub use crate::runner::{RunConfig, Runner, run_stream};
pub use crate::state::{
    ApprovalStatus, ApprovalValue, Interruption, RunOutcome, RunResult, RunState,
};
pub use crate::stream::{CompletionChunk, ToolCallDelta};
pub use crate::tool::{
    ClarificationOption, ClarificationTool, FunctionTool, Tool, ToolDefinition, ToolOutput,
    ToolReply, ToolStatus,
};
pub use crate::usage::Usage;
