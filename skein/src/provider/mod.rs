//! Model provider abstraction.
//!
//! The engine never speaks a wire protocol itself — it consumes a
//! [`ModelProvider`]: a trait producing either a complete [`Completion`]
//! or a stream of [`CompletionChunk`]s. Concrete HTTP providers live
//! outside the core; [`MockProvider`] ships in-tree for tests and
//! examples.

mod mock;

pub use mock::MockProvider;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::message::{Message, ToolCall};
use crate::stream::CompletionChunk;
use crate::tool::ToolDefinition;
use crate::usage::Usage;

/// A boxed stream of completion chunks.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<CompletionChunk>> + Send>>;

/// A completion request assembled by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model name; absent only for providers that tolerate it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Conversation messages (halted placeholders already filtered).
    pub messages: Vec<Message>,
    /// Tools available to the model.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tools: Vec<ToolDefinition>,
    /// Output schema for structured final output, when declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

/// The message part of a completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionMessage {
    /// Text content, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool calls, if any.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tool_calls: Vec<ToolCall>,
}

/// A complete (non-streaming) model response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Completion {
    /// The generated message; `None` is a provider misbehavior.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<CompletionMessage>,
    /// Token usage statistics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Completion {
    /// A completion with plain text content.
    #[must_use]
    pub fn from_text(content: impl Into<String>) -> Self {
        Self {
            message: Some(CompletionMessage {
                content: Some(content.into()),
                tool_calls: Vec::new(),
            }),
            usage: None,
        }
    }

    /// A completion requesting tool calls.
    #[must_use]
    pub fn from_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            message: Some(CompletionMessage {
                content: None,
                tool_calls,
            }),
            usage: None,
        }
    }

    /// Attach usage statistics.
    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Trait for model backends consumed by the engine.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Produce a complete response for the request.
    async fn completion(&self, request: &CompletionRequest) -> Result<Completion>;

    /// Produce a streaming response for the request.
    ///
    /// The default returns an error; providers that stream override this
    /// together with [`supports_streaming`](Self::supports_streaming).
    async fn completion_stream(&self, request: &CompletionRequest) -> Result<CompletionStream> {
        let _ = request;
        Err(Error::model_behavior(format!(
            "provider '{}' does not support streaming",
            self.name()
        )))
    }

    /// Whether this provider implements [`completion_stream`](Self::completion_stream).
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Whether this provider tolerates requests without a model name
    /// (ai-sdk-style providers that carry the model internally).
    fn model_name_optional(&self) -> bool {
        false
    }

    /// Name of this provider, for error messages and logging.
    fn name(&self) -> &'static str;
}

/// A shared, thread-safe provider trait object.
pub type SharedProvider = std::sync::Arc<dyn ModelProvider>;
