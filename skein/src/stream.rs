//! Streaming completion chunks and their aggregation.
//!
//! Providers that support streaming yield [`CompletionChunk`]s, each
//! carrying either a text delta or a delta on an indexed tool call.
//! [`ChunkAggregator`] folds the deltas into a running buffer and can be
//! snapshotted after every chunk to emit partial `assistant_message`
//! events consistent with the buffer at that point.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::message::{Message, ToolCall};
use crate::provider::{Completion, CompletionMessage};
use crate::usage::Usage;

/// Incremental update to one indexed tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Index of the tool call in the response.
    pub index: usize,
    /// Tool call id, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Function name, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Fragment of the arguments JSON string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments_delta: Option<String>,
}

/// One chunk of a streaming completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionChunk {
    /// Incremental text content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    /// Incremental tool call update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_delta: Option<ToolCallDelta>,
    /// Token usage (usually only on the final chunk).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Marks the end of the stream.
    #[serde(default)]
    pub is_done: bool,
    /// Stop reason reported by the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl CompletionChunk {
    /// A text delta chunk.
    #[must_use]
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: Some(delta.into()),
            ..Self::default()
        }
    }

    /// A tool call delta chunk.
    #[must_use]
    pub fn tool_delta(delta: ToolCallDelta) -> Self {
        Self {
            tool_call_delta: Some(delta),
            ..Self::default()
        }
    }

    /// A terminal chunk.
    #[must_use]
    pub fn done(finish_reason: Option<String>) -> Self {
        Self {
            is_done: true,
            finish_reason,
            ..Self::default()
        }
    }

    /// Returns `true` if this chunk advances the visible message state.
    #[must_use]
    pub const fn advances_message(&self) -> bool {
        self.delta.is_some() || self.tool_call_delta.is_some()
    }
}

#[derive(Debug, Clone, Default)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

/// Folds [`CompletionChunk`]s into a complete assistant message.
#[derive(Debug, Clone, Default)]
pub struct ChunkAggregator {
    text: String,
    tool_calls: BTreeMap<usize, ToolCallBuilder>,
    usage: Option<Usage>,
}

impl ChunkAggregator {
    /// Creates a new aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a chunk to the running state.
    pub fn apply(&mut self, chunk: &CompletionChunk) {
        if let Some(delta) = &chunk.delta {
            self.text.push_str(delta);
        }
        if let Some(tc) = &chunk.tool_call_delta {
            let entry = self.tool_calls.entry(tc.index).or_default();
            if let Some(id) = &tc.id {
                entry.id.clone_from(id);
            }
            if let Some(name) = &tc.name {
                entry.name.clone_from(name);
            }
            if let Some(fragment) = &tc.arguments_delta {
                entry.arguments.push_str(fragment);
            }
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }
    }

    /// Returns the accumulated usage, if reported.
    #[must_use]
    pub const fn usage(&self) -> Option<Usage> {
        self.usage
    }

    fn build_tool_calls(&self) -> Vec<ToolCall> {
        self.tool_calls
            .values()
            .map(|tc| ToolCall::new(&tc.id, &tc.name, &tc.arguments))
            .collect()
    }

    /// A snapshot of the in-flight assistant message.
    #[must_use]
    pub fn snapshot(&self) -> Message {
        let tool_calls = self.build_tool_calls();
        Message {
            id: None,
            role: crate::message::Role::Assistant,
            content: (!self.text.is_empty()).then(|| crate::message::Content::text(&self.text)),
            attachments: None,
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
        }
    }

    /// Converts the accumulated stream into a [`Completion`].
    #[must_use]
    pub fn into_completion(self) -> Completion {
        let tool_calls = self.build_tool_calls();
        let has_any = !self.text.is_empty() || !tool_calls.is_empty();
        Completion {
            message: has_any.then(|| CompletionMessage {
                content: (!self.text.is_empty()).then(|| self.text.clone()),
                tool_calls,
            }),
            usage: self.usage,
        }
    }
}
