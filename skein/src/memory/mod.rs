//! Conversation memory: the store contract and reference backends.
//!
//! The engine talks to memory exclusively through [`MemoryStore`]. Two
//! backends ship in-tree: [`InMemoryStore`] (testing, short-lived runs)
//! and, behind the `sqlite` feature, [`SqliteStore`] (persistent).
//!
//! Stored conversations keep the *full* message log, including halted
//! placeholders, for audit. The broker filters placeholders out when
//! rebuilding state for the model.

mod in_memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub(crate) mod broker;

pub use in_memory::InMemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{Message, Role};
use crate::state::ApprovalValue;

/// A type alias for `Result<T, MemoryError>`.
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Error raised by a memory store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MemoryError {
    /// The backing storage failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A message or metadata payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A lock was poisoned or unavailable.
    #[error("lock error: {0}")]
    Lock(String),

    /// A blocking task failed to join.
    #[error("task error: {0}")]
    Task(String),
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Current time as f64 Unix seconds.
#[must_use]
pub(crate) fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

/// Metadata persisted alongside a conversation's messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMetadata {
    /// Creation time (Unix seconds).
    pub created_at: f64,
    /// Last update time (Unix seconds).
    pub updated_at: f64,
    /// Number of stored messages.
    pub total_messages: usize,
    /// Last activity time (Unix seconds).
    pub last_activity: f64,
    /// Approval decisions keyed by tool call id.
    #[serde(default)]
    pub approvals: HashMap<String, ApprovalValue>,
    /// Turn count at store time.
    #[serde(default)]
    pub turn_count: u32,
    /// Run that produced the store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Trace the run belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Agent in control at store time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// Caller-defined extra fields.
    #[serde(flatten)]
    pub custom: serde_json::Map<String, Value>,
}

impl Default for ConversationMetadata {
    fn default() -> Self {
        let now = now_secs();
        Self {
            created_at: now,
            updated_at: now,
            total_messages: 0,
            last_activity: now,
            approvals: HashMap::new(),
            turn_count: 0,
            run_id: None,
            trace_id: None,
            agent_name: None,
            custom: serde_json::Map::new(),
        }
    }
}

/// A persisted conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation identifier.
    pub conversation_id: String,
    /// Owning user, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// The full message log (halted placeholders included).
    pub messages: Vec<Message>,
    /// Conversation metadata.
    pub metadata: ConversationMetadata,
}

/// Query for [`MemoryStore::find_conversations`].
#[derive(Debug, Clone, Default)]
pub struct ConversationQuery {
    /// Restrict to conversations owned by this user.
    pub user_id: Option<String>,
    /// Maximum number of conversations to return.
    pub limit: Option<usize>,
}

/// Aggregate statistics of a store.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Number of conversations held.
    pub total_conversations: usize,
    /// Number of messages held across all conversations.
    pub total_messages: usize,
}

/// How a checkpoint target's text must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextMatchKind {
    /// The whole message text equals the query.
    Exact,
    /// The message text starts with the query.
    StartsWith,
    /// The message text contains the query.
    Contains,
}

/// Text-match criterion for checkpoint selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextMatch {
    /// How to compare.
    pub match_type: TextMatchKind,
    /// The query text.
    pub text: String,
}

/// Criteria selecting the user message to restore to.
///
/// Evaluated in precedence order: explicit message id, absolute index,
/// nth user-role message (zero-based), text match. The first present
/// criterion that resolves to a user message wins; a present criterion
/// that matches nothing falls through to the next.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointCriteria {
    /// Explicit message id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Absolute index into the message log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Zero-based ordinal among user-role messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nth_user_message: Option<usize>,
    /// Text match against user messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextMatch>,
}

impl CheckpointCriteria {
    /// Criteria selecting a message by explicit id.
    #[must_use]
    pub fn by_message_id(id: impl Into<String>) -> Self {
        Self {
            message_id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Criteria selecting the nth (zero-based) user message.
    #[must_use]
    pub fn by_nth_user_message(n: usize) -> Self {
        Self {
            nth_user_message: Some(n),
            ..Self::default()
        }
    }

    /// Criteria selecting by text match.
    #[must_use]
    pub fn by_text(match_type: TextMatchKind, text: impl Into<String>) -> Self {
        Self {
            text: Some(TextMatch {
                match_type,
                text: text.into(),
            }),
            ..Self::default()
        }
    }
}

/// Result of a checkpoint restore.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointRestore {
    /// Whether a checkpoint was found and applied.
    pub restored: bool,
    /// Number of messages removed.
    pub removed_count: usize,
    /// Index of the removed user message, when restored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_index: Option<usize>,
    /// Text of the removed user message, when restored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_user_query: Option<String>,
}

/// Find the index of the user message selected by `criteria`.
#[must_use]
pub fn select_checkpoint(messages: &[Message], criteria: &CheckpointCriteria) -> Option<usize> {
    let is_user = |index: &usize| messages[*index].role == Role::User;

    if let Some(id) = &criteria.message_id {
        let found = messages
            .iter()
            .position(|m| m.id.as_deref() == Some(id.as_str()))
            .filter(is_user);
        if found.is_some() {
            return found;
        }
    }

    if let Some(index) = criteria.index {
        let found = (index < messages.len()).then_some(index).filter(is_user);
        if found.is_some() {
            return found;
        }
    }

    if let Some(n) = criteria.nth_user_message {
        let found = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == Role::User)
            .nth(n)
            .map(|(index, _)| index);
        if found.is_some() {
            return found;
        }
    }

    if let Some(text_match) = &criteria.text {
        return messages.iter().position(|m| {
            if m.role != Role::User {
                return false;
            }
            let Some(text) = m.text() else { return false };
            match text_match.match_type {
                TextMatchKind::Exact => text == text_match.text,
                TextMatchKind::StartsWith => text.starts_with(&text_match.text),
                TextMatchKind::Contains => text.contains(&text_match.text),
            }
        });
    }

    None
}

/// Apply `criteria` to a message log: the targeted user message and
/// everything after it are removed, the prefix is preserved.
///
/// Returns the preserved prefix and the restore summary. Backends call
/// this so selection semantics stay identical across stores.
#[must_use]
pub fn apply_checkpoint(
    messages: &[Message],
    criteria: &CheckpointCriteria,
) -> (Vec<Message>, CheckpointRestore) {
    match select_checkpoint(messages, criteria) {
        Some(index) => {
            let removed = messages.len() - index;
            let query = messages[index].text();
            (
                messages[..index].to_vec(),
                CheckpointRestore {
                    restored: true,
                    removed_count: removed,
                    checkpoint_index: Some(index),
                    checkpoint_user_query: query,
                },
            )
        }
        None => (messages.to_vec(), CheckpointRestore::default()),
    }
}

/// Record-style interface every conversation store implements.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Persist the full message log and metadata for a conversation,
    /// replacing any previous contents.
    async fn store_messages(
        &self,
        conversation_id: &str,
        user_id: Option<&str>,
        messages: &[Message],
        metadata: ConversationMetadata,
    ) -> MemoryResult<()>;

    /// Fetch a conversation by id.
    async fn get_conversation(&self, conversation_id: &str) -> MemoryResult<Option<Conversation>>;

    /// Append messages to an existing conversation (creating it if absent).
    async fn append_messages(
        &self,
        conversation_id: &str,
        messages: &[Message],
    ) -> MemoryResult<()>;

    /// Find conversations matching a query.
    async fn find_conversations(&self, query: &ConversationQuery) -> MemoryResult<Vec<Conversation>>;

    /// The most recent `limit` messages of a conversation.
    async fn get_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> MemoryResult<Vec<Message>>;

    /// Delete a conversation; returns whether it existed.
    async fn delete_conversation(&self, conversation_id: &str) -> MemoryResult<bool>;

    /// Delete all conversations owned by a user; returns how many.
    async fn clear_user_conversations(&self, user_id: &str) -> MemoryResult<usize>;

    /// Aggregate statistics.
    async fn get_stats(&self) -> MemoryResult<MemoryStats>;

    /// Verify the store is reachable.
    async fn health_check(&self) -> MemoryResult<()>;

    /// Release any held resources.
    async fn close(&self) -> MemoryResult<()>;

    /// Remove the selected user message and everything after it.
    async fn restore_to_checkpoint(
        &self,
        conversation_id: &str,
        criteria: &CheckpointCriteria,
    ) -> MemoryResult<CheckpointRestore>;
}

/// A shared, thread-safe store trait object.
pub type SharedMemoryStore = std::sync::Arc<dyn MemoryStore>;

/// Memory behavior for a run.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfig {
    /// Load on start and store on interruption automatically.
    pub auto_store: bool,
    /// Conversation to load from and store to.
    pub conversation_id: Option<String>,
    /// Owning user recorded on stores.
    pub user_id: Option<String>,
    /// Keep only the most recent N messages when loading.
    pub max_messages: Option<usize>,
    /// Also store when a run completes (not only on interruption).
    pub store_on_completion: bool,
    /// Compress the log when it exceeds this many messages.
    pub compression_threshold: Option<usize>,
}

impl MemoryConfig {
    /// Auto-storing config bound to a conversation.
    #[must_use]
    pub fn auto(conversation_id: impl Into<String>) -> Self {
        Self {
            auto_store: true,
            conversation_id: Some(conversation_id.into()),
            ..Self::default()
        }
    }

    /// Set the owning user.
    #[must_use]
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Keep only the most recent N messages when loading.
    #[must_use]
    pub const fn max_messages(mut self, n: usize) -> Self {
        self.max_messages = Some(n);
        self
    }

    /// Also store when a run completes.
    #[must_use]
    pub const fn store_on_completion(mut self, enabled: bool) -> Self {
        self.store_on_completion = enabled;
        self
    }

    /// Compress the log when it exceeds this many messages.
    #[must_use]
    pub const fn compression_threshold(mut self, threshold: usize) -> Self {
        self.compression_threshold = Some(threshold);
        self
    }
}
