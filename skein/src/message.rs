//! Message types for agent-model communication.
//!
//! This module defines the conversation message format consumed by the
//! engine and the providers, following chat completion API conventions:
//! string-or-parts content, optional attachments, assistant tool calls,
//! and tool-role replies joined to their originating call by
//! `tool_call_id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message providing instructions.
    System,
    /// User message.
    User,
    /// Assistant (model) message.
    Assistant,
    /// Tool reply message.
    Tool,
}

impl Role {
    /// Get the string representation of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    /// Returns `true` if this is the system role.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }

    /// Returns `true` if this is the assistant role.
    #[must_use]
    pub const fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant)
    }

    /// Returns `true` if this is the tool role.
    #[must_use]
    pub const fn is_tool(&self) -> bool {
        matches!(self, Self::Tool)
    }
}

/// A single part of a multi-part message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// Reference to an image by URL.
    ImageRef {
        /// The image URL.
        url: String,
    },
    /// Reference to a file by URL.
    FileRef {
        /// The file URL.
        url: String,
    },
}

/// Message content: either a plain string or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Plain string content.
    Text(String),
    /// Multi-part content.
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Create plain text content.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Concatenated text of this content (parts joined by newline).
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageRef { .. } | ContentPart::FileRef { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Returns `true` if the content carries no text.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_text().is_empty()
    }
}

/// Kind of a message attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    /// An image.
    Image,
    /// A document (e.g. PDF).
    Document,
    /// A generic file.
    File,
    /// An audio clip.
    Audio,
    /// A video clip.
    Video,
}

/// A message attachment, carried either by URL or as base64-encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Kind of attachment.
    pub kind: AttachmentKind,
    /// URL of the attachment, if hosted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Base64-encoded bytes, if inlined.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// MIME type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Format hint (e.g. "png", "wav").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl Attachment {
    /// Create an attachment referencing a URL.
    #[must_use]
    pub fn from_url(kind: AttachmentKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: Some(url.into()),
            data: None,
            mime_type: None,
            name: None,
            format: None,
        }
    }
}

/// A tool call made by the model.
///
/// The `id` is unique within a single assistant message and is the join
/// key for the tool-role reply. `arguments` is the raw JSON string exactly
/// as produced by the model — invalid JSON is preserved so that schema
/// validation can fail with a useful message instead of a parse panic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this call.
    pub id: String,
    /// Name of the tool being called.
    pub name: String,
    /// Arguments as a JSON string.
    pub arguments: String,
}

impl ToolCall {
    /// Create a new tool call.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse the arguments as a JSON value.
    ///
    /// Invalid JSON is kept as a string value so downstream schema
    /// validation fails naturally rather than aborting the dispatch.
    #[must_use]
    pub fn arguments_value(&self) -> Value {
        serde_json::from_str(&self.arguments)
            .unwrap_or_else(|_| Value::String(self.arguments.clone()))
    }

    /// Parse the arguments as a typed value.
    pub fn parse_arguments<T: for<'de> Deserialize<'de>>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.arguments)
    }
}

/// A chat message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Stable identifier, set by persistence layers or callers.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    /// Role of the message sender.
    pub role: Role,
    /// Content of the message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    /// Attachments carried by the message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    /// Tool calls made by the model (assistant messages only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool call ID this message answers (tool messages only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Create a new system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            id: None,
            role: Role::System,
            content: Some(Content::text(content)),
            attachments: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a new user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: None,
            role: Role::User,
            content: Some(Content::text(content)),
            attachments: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a new assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: None,
            role: Role::Assistant,
            content: Some(Content::text(content)),
            attachments: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a new assistant message with tool calls and optional content.
    #[must_use]
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            id: None,
            role: Role::Assistant,
            content: content.map(Content::Text),
            attachments: None,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    /// Create a new tool reply message.
    #[must_use]
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: None,
            role: Role::Tool,
            content: Some(Content::text(content)),
            attachments: None,
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Attach files to this message.
    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = Some(attachments);
        self
    }

    /// Set a stable identifier on this message.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Get the text content of the message.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        self.content.as_ref().map(Content::as_text)
    }

    /// Check if this message has tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// The `status` field of a tool reply's JSON envelope, if any.
    ///
    /// Used to recognize `halted` / `awaiting_clarification` placeholders
    /// when rebuilding state or filtering memory.
    #[must_use]
    pub fn tool_reply_status(&self) -> Option<String> {
        if !self.role.is_tool() {
            return None;
        }
        let text = self.text()?;
        let value: Value = serde_json::from_str(&text).ok()?;
        value
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_owned)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    mod role {
        use super::*;

        #[test]
        fn as_str_matches_serde() {
            for role in [Role::System, Role::User, Role::Assistant, Role::Tool] {
                let json = serde_json::to_string(&role).unwrap();
                assert_eq!(json, format!("\"{}\"", role.as_str()));
            }
        }
    }

    mod content {
        use super::*;

        #[test]
        fn text_roundtrips_as_plain_string() {
            let content = Content::text("hello");
            let json = serde_json::to_string(&content).unwrap();
            assert_eq!(json, r#""hello""#);
            let parsed: Content = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, content);
        }

        #[test]
        fn parts_join_text_only() {
            let content = Content::Parts(vec![
                ContentPart::Text { text: "a".into() },
                ContentPart::ImageRef {
                    url: "https://example.com/x.png".into(),
                },
                ContentPart::Text { text: "b".into() },
            ]);
            assert_eq!(content.as_text(), "a\nb");
        }

        #[test]
        fn image_only_content_is_empty_text() {
            let content = Content::Parts(vec![ContentPart::ImageRef {
                url: "https://example.com/x.png".into(),
            }]);
            assert!(content.is_empty());
        }
    }

    mod tool_call {
        use super::*;

        #[test]
        fn arguments_value_parses_json() {
            let tc = ToolCall::new("call_1", "calculator", r#"{"expression":"1+1"}"#);
            assert_eq!(tc.arguments_value()["expression"], "1+1");
        }

        #[test]
        fn invalid_json_kept_as_string() {
            let tc = ToolCall::new("call_1", "calculator", "{not json");
            assert_eq!(tc.arguments_value(), Value::String("{not json".into()));
        }
    }

    mod message {
        use super::*;

        #[test]
        fn tool_reply_pairs_by_id() {
            let msg = Message::tool("call_1", r#"{"status":"executed","result":"42"}"#);
            assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
            assert_eq!(msg.tool_reply_status().as_deref(), Some("executed"));
        }

        #[test]
        fn tool_reply_status_ignores_non_tool_roles() {
            let msg = Message::assistant(r#"{"status":"executed"}"#);
            assert!(msg.tool_reply_status().is_none());
        }

        #[test]
        fn tool_reply_status_ignores_plain_text() {
            let msg = Message::tool("call_1", "plain text result");
            assert!(msg.tool_reply_status().is_none());
        }

        #[test]
        fn assistant_tool_calls_may_omit_content() {
            let msg = Message::assistant_tool_calls(
                None,
                vec![ToolCall::new("call_1", "search", "{}")],
            );
            assert!(msg.has_tool_calls());
            assert!(msg.content.is_none());
        }

        #[test]
        fn serde_skips_absent_fields() {
            let json = serde_json::to_string(&Message::user("hi")).unwrap();
            assert!(!json.contains("tool_calls"));
            assert!(!json.contains("attachments"));
            assert!(!json.contains("tool_call_id"));
        }
    }
}
