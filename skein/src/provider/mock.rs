//! Mock provider implementation for testing.
//!
//! Returns scripted completions in sequence, cycling when exhausted.
//! Optional scripted chunk streams make the streaming path and its
//! fall-back-to-non-streaming behavior testable without a live backend.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{Completion, CompletionRequest, CompletionStream, ModelProvider};
use crate::error::Result;
use crate::stream::CompletionChunk;

/// A scripted provider for tests and examples.
///
/// # Example
///
/// ```rust,ignore
/// let provider = MockProvider::new(vec![
///     Completion::from_tool_calls(vec![ToolCall::new("call_1", "calculator", r#"{"expression":"15+27"}"#)]),
///     Completion::from_text("42"),
/// ]);
/// ```
#[derive(Debug)]
pub struct MockProvider {
    responses: Vec<Completion>,
    index: AtomicUsize,
    stream_scripts: Vec<Vec<Result<CompletionChunk>>>,
    stream_index: AtomicUsize,
    model_name_optional: bool,
}

impl MockProvider {
    /// Create a provider returning the scripted completions in sequence.
    #[must_use]
    pub fn new(responses: Vec<Completion>) -> Self {
        Self {
            responses,
            index: AtomicUsize::new(0),
            stream_scripts: Vec::new(),
            stream_index: AtomicUsize::new(0),
            model_name_optional: false,
        }
    }

    /// Create a provider that always answers with the given text.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(vec![Completion::from_text(content)])
    }

    /// Script chunk streams; enables `supports_streaming`.
    ///
    /// Each inner vec is one model call's stream. An `Err` item makes the
    /// stream fail at that point, exercising the engine's fallback to the
    /// non-streaming path.
    #[must_use]
    pub fn with_stream_scripts(mut self, scripts: Vec<Vec<Result<CompletionChunk>>>) -> Self {
        self.stream_scripts = scripts;
        self
    }

    /// Mark the provider as tolerating requests without a model name.
    #[must_use]
    pub const fn with_model_name_optional(mut self) -> Self {
        self.model_name_optional = true;
        self
    }

    /// How many completion calls have been made.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn completion(&self, _request: &CompletionRequest) -> Result<Completion> {
        let index = self.index.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .responses
            .get(index % self.responses.len().max(1))
            .cloned()
            .unwrap_or_default())
    }

    async fn completion_stream(&self, request: &CompletionRequest) -> Result<CompletionStream> {
        let index = self.stream_index.fetch_add(1, Ordering::SeqCst);
        let _ = request;
        match self.stream_scripts.get(index % self.stream_scripts.len().max(1)) {
            Some(script) => Ok(Box::pin(futures::stream::iter(script.clone()))),
            // Exhausted scripts fall back to the completion path.
            None => Err(crate::error::Error::model_behavior(
                "mock stream script exhausted",
            )),
        }
    }

    fn supports_streaming(&self) -> bool {
        !self.stream_scripts.is_empty()
    }

    fn model_name_optional(&self) -> bool {
        self.model_name_optional
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
