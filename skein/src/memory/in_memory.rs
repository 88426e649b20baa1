//! In-memory conversation store.
//!
//! [`InMemoryStore`] keeps conversations in a `HashMap` behind a
//! `tokio::sync::RwLock`. Data is lost when the value is dropped — best
//! suited for tests and short-lived runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    CheckpointCriteria, CheckpointRestore, Conversation, ConversationMetadata, ConversationQuery,
    MemoryResult, MemoryStats, MemoryStore, apply_checkpoint, now_secs,
};
use crate::message::Message;

/// In-memory store backed by `RwLock<HashMap<String, Conversation>>`.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn store_messages(
        &self,
        conversation_id: &str,
        user_id: Option<&str>,
        messages: &[Message],
        mut metadata: ConversationMetadata,
    ) -> MemoryResult<()> {
        let mut guard = self.conversations.write().await;
        let now = now_secs();
        metadata.updated_at = now;
        metadata.last_activity = now;
        metadata.total_messages = messages.len();
        if let Some(existing) = guard.get(conversation_id) {
            metadata.created_at = existing.metadata.created_at;
        }
        guard.insert(
            conversation_id.to_owned(),
            Conversation {
                conversation_id: conversation_id.to_owned(),
                user_id: user_id.map(str::to_owned),
                messages: messages.to_vec(),
                metadata,
            },
        );
        Ok(())
    }

    async fn get_conversation(&self, conversation_id: &str) -> MemoryResult<Option<Conversation>> {
        Ok(self.conversations.read().await.get(conversation_id).cloned())
    }

    async fn append_messages(
        &self,
        conversation_id: &str,
        messages: &[Message],
    ) -> MemoryResult<()> {
        let mut guard = self.conversations.write().await;
        let conversation = guard
            .entry(conversation_id.to_owned())
            .or_insert_with(|| Conversation {
                conversation_id: conversation_id.to_owned(),
                user_id: None,
                messages: Vec::new(),
                metadata: ConversationMetadata::default(),
            });
        conversation.messages.extend(messages.iter().cloned());
        conversation.metadata.total_messages = conversation.messages.len();
        let now = now_secs();
        conversation.metadata.updated_at = now;
        conversation.metadata.last_activity = now;
        Ok(())
    }

    async fn find_conversations(
        &self,
        query: &ConversationQuery,
    ) -> MemoryResult<Vec<Conversation>> {
        let guard = self.conversations.read().await;
        let mut found: Vec<Conversation> = guard
            .values()
            .filter(|c| {
                query
                    .user_id
                    .as_deref()
                    .is_none_or(|u| c.user_id.as_deref() == Some(u))
            })
            .cloned()
            .collect();
        // Most recently active first.
        found.sort_by(|a, b| {
            b.metadata
                .last_activity
                .total_cmp(&a.metadata.last_activity)
        });
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn get_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> MemoryResult<Vec<Message>> {
        let guard = self.conversations.read().await;
        Ok(guard.get(conversation_id).map_or_else(Vec::new, |c| {
            let start = c.messages.len().saturating_sub(limit);
            c.messages[start..].to_vec()
        }))
    }

    async fn delete_conversation(&self, conversation_id: &str) -> MemoryResult<bool> {
        Ok(self
            .conversations
            .write()
            .await
            .remove(conversation_id)
            .is_some())
    }

    async fn clear_user_conversations(&self, user_id: &str) -> MemoryResult<usize> {
        let mut guard = self.conversations.write().await;
        let before = guard.len();
        guard.retain(|_, c| c.user_id.as_deref() != Some(user_id));
        Ok(before - guard.len())
    }

    async fn get_stats(&self) -> MemoryResult<MemoryStats> {
        let guard = self.conversations.read().await;
        Ok(MemoryStats {
            total_conversations: guard.len(),
            total_messages: guard.values().map(|c| c.messages.len()).sum(),
        })
    }

    async fn health_check(&self) -> MemoryResult<()> {
        Ok(())
    }

    async fn close(&self) -> MemoryResult<()> {
        Ok(())
    }

    async fn restore_to_checkpoint(
        &self,
        conversation_id: &str,
        criteria: &CheckpointCriteria,
    ) -> MemoryResult<CheckpointRestore> {
        let mut guard = self.conversations.write().await;
        let Some(conversation) = guard.get_mut(conversation_id) else {
            return Ok(CheckpointRestore::default());
        };
        let (kept, restore) = apply_checkpoint(&conversation.messages, criteria);
        if restore.restored {
            conversation.messages = kept;
            conversation.metadata.total_messages = conversation.messages.len();
            conversation.metadata.updated_at = now_secs();
        }
        Ok(restore)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::TextMatchKind;

    fn sample(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| match i % 2 {
                0 => Message::user(format!("user-{i}")),
                _ => Message::assistant(format!("assistant-{i}")),
            })
            .collect()
    }

    #[tokio::test]
    async fn store_and_fetch_roundtrip() {
        let store = InMemoryStore::new();
        store
            .store_messages("c1", Some("u1"), &sample(4), ConversationMetadata::default())
            .await
            .unwrap();

        let conversation = store.get_conversation("c1").await.unwrap().unwrap();
        assert_eq!(conversation.messages.len(), 4);
        assert_eq!(conversation.user_id.as_deref(), Some("u1"));
        assert_eq!(conversation.metadata.total_messages, 4);
    }

    #[tokio::test]
    async fn missing_conversation_is_none() {
        let store = InMemoryStore::new();
        assert!(store.get_conversation("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn append_creates_and_extends() {
        let store = InMemoryStore::new();
        store.append_messages("c1", &sample(2)).await.unwrap();
        store.append_messages("c1", &sample(2)).await.unwrap();
        let conversation = store.get_conversation("c1").await.unwrap().unwrap();
        assert_eq!(conversation.messages.len(), 4);
    }

    #[tokio::test]
    async fn recent_messages_slice_from_end() {
        let store = InMemoryStore::new();
        store.append_messages("c1", &sample(6)).await.unwrap();
        let recent = store.get_recent_messages("c1", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].text().unwrap(), "assistant-5");
    }

    #[tokio::test]
    async fn clear_user_conversations_counts() {
        let store = InMemoryStore::new();
        for (id, user) in [("c1", "alice"), ("c2", "alice"), ("c3", "bob")] {
            store
                .store_messages(id, Some(user), &sample(1), ConversationMetadata::default())
                .await
                .unwrap();
        }
        assert_eq!(store.clear_user_conversations("alice").await.unwrap(), 2);
        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_conversations, 1);
    }

    #[tokio::test]
    async fn restore_truncates_from_checkpoint() {
        let store = InMemoryStore::new();
        store.append_messages("c1", &sample(6)).await.unwrap();

        let restore = store
            .restore_to_checkpoint(
                "c1",
                &CheckpointCriteria::by_text(TextMatchKind::Exact, "user-2"),
            )
            .await
            .unwrap();
        assert!(restore.restored);
        assert_eq!(restore.removed_count, 4);
        assert_eq!(restore.checkpoint_user_query.as_deref(), Some("user-2"));

        let conversation = store.get_conversation("c1").await.unwrap().unwrap();
        assert_eq!(conversation.messages.len(), 2);
    }
}
