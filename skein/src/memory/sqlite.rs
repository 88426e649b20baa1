//! SQLite-backed conversation store.
//!
//! [`SqliteStore`] persists conversations in a SQLite database, surviving
//! process restarts. Uses [`rusqlite`] for synchronous access, bridged to
//! async via [`tokio::task::spawn_blocking`].
//!
//! # Storage model
//!
//! Messages are stored as JSON rows in the `messages` table, ordered by
//! auto-incrementing `id`; conversation metadata lives as one JSON blob
//! per `conversations` row. WAL journal mode and a composite index on
//! `(conversation_id, id)` keep concurrent reads efficient.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, params};

use super::{
    CheckpointCriteria, CheckpointRestore, Conversation, ConversationMetadata, ConversationQuery,
    MemoryError, MemoryResult, MemoryStats, MemoryStore, apply_checkpoint, now_secs,
};
use crate::message::Message;

impl From<rusqlite::Error> for MemoryError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// SQLite-backed store for persistent conversation history.
///
/// Cloneable via `Arc<Mutex<Connection>>` — multiple handles may share a
/// single database. Schema is auto-created on construction; all blocking
/// I/O is offloaded to the tokio blocking thread pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a database at `path` and initializes the schema.
    pub fn open(path: impl AsRef<Path>) -> MemoryResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn)
    }

    /// Opens an ephemeral in-memory database (data lost on drop).
    pub fn in_memory() -> MemoryResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    /// Wraps an existing [`Connection`], applying pragmas and schema setup.
    pub fn from_connection(conn: Connection) -> MemoryResult<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\
             PRAGMA foreign_keys = ON;\
             PRAGMA busy_timeout = 5000;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                conversation_id TEXT PRIMARY KEY,
                user_id         TEXT,
                metadata        TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL
                    REFERENCES conversations(conversation_id) ON DELETE CASCADE,
                message_data    TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages (conversation_id, id);",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Bridges a synchronous closure onto the tokio blocking thread pool.
    async fn blocking<F, T>(&self, f: F) -> MemoryResult<T>
    where
        F: FnOnce(&Connection) -> MemoryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|e| MemoryError::Lock(e.to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| MemoryError::Task(e.to_string()))?
    }

    fn read_messages(conn: &Connection, conversation_id: &str) -> MemoryResult<Vec<Message>> {
        let mut stmt = conn.prepare(
            "SELECT message_data FROM messages WHERE conversation_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| row.get::<_, String>(0))?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(serde_json::from_str(&row?)?);
        }
        Ok(messages)
    }

    fn read_conversation(
        conn: &Connection,
        conversation_id: &str,
    ) -> MemoryResult<Option<Conversation>> {
        let row = conn
            .query_row(
                "SELECT user_id, metadata FROM conversations WHERE conversation_id = ?1",
                params![conversation_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, String>(1)?,
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(MemoryError::from(other)),
            })?;

        let Some((user_id, metadata_json)) = row else {
            return Ok(None);
        };
        Ok(Some(Conversation {
            conversation_id: conversation_id.to_owned(),
            user_id,
            messages: Self::read_messages(conn, conversation_id)?,
            metadata: serde_json::from_str(&metadata_json)?,
        }))
    }

    fn write_messages(
        conn: &Connection,
        conversation_id: &str,
        messages: &[Message],
    ) -> MemoryResult<()> {
        let mut stmt =
            conn.prepare("INSERT INTO messages (conversation_id, message_data) VALUES (?1, ?2)")?;
        for message in messages {
            stmt.execute(params![conversation_id, serde_json::to_string(message)?])?;
        }
        Ok(())
    }

    fn upsert_conversation(
        conn: &Connection,
        conversation_id: &str,
        user_id: Option<&str>,
        metadata: &ConversationMetadata,
    ) -> MemoryResult<()> {
        conn.execute(
            "INSERT INTO conversations (conversation_id, user_id, metadata)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(conversation_id) DO UPDATE
             SET user_id = COALESCE(excluded.user_id, user_id),
                 metadata = excluded.metadata",
            params![conversation_id, user_id, serde_json::to_string(metadata)?],
        )?;
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for SqliteStore {
    async fn store_messages(
        &self,
        conversation_id: &str,
        user_id: Option<&str>,
        messages: &[Message],
        mut metadata: ConversationMetadata,
    ) -> MemoryResult<()> {
        let conversation_id = conversation_id.to_owned();
        let user_id = user_id.map(str::to_owned);
        let messages = messages.to_vec();
        self.blocking(move |conn| {
            if let Some(existing) = Self::read_conversation(conn, &conversation_id)? {
                metadata.created_at = existing.metadata.created_at;
            }
            let now = now_secs();
            metadata.updated_at = now;
            metadata.last_activity = now;
            metadata.total_messages = messages.len();

            Self::upsert_conversation(conn, &conversation_id, user_id.as_deref(), &metadata)?;
            conn.execute(
                "DELETE FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
            )?;
            Self::write_messages(conn, &conversation_id, &messages)
        })
        .await
    }

    async fn get_conversation(&self, conversation_id: &str) -> MemoryResult<Option<Conversation>> {
        let conversation_id = conversation_id.to_owned();
        self.blocking(move |conn| Self::read_conversation(conn, &conversation_id))
            .await
    }

    async fn append_messages(
        &self,
        conversation_id: &str,
        messages: &[Message],
    ) -> MemoryResult<()> {
        let conversation_id = conversation_id.to_owned();
        let messages = messages.to_vec();
        self.blocking(move |conn| {
            let mut metadata = Self::read_conversation(conn, &conversation_id)?
                .map_or_else(ConversationMetadata::default, |c| c.metadata);
            let now = now_secs();
            metadata.updated_at = now;
            metadata.last_activity = now;
            Self::upsert_conversation(conn, &conversation_id, None, &metadata)?;
            Self::write_messages(conn, &conversation_id, &messages)?;
            let count: usize = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )?;
            metadata.total_messages = count;
            Self::upsert_conversation(conn, &conversation_id, None, &metadata)
        })
        .await
    }

    async fn find_conversations(
        &self,
        query: &ConversationQuery,
    ) -> MemoryResult<Vec<Conversation>> {
        let user_id = query.user_id.clone();
        let limit = query.limit;
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT conversation_id FROM conversations
                 WHERE (?1 IS NULL OR user_id = ?1)",
            )?;
            let ids = stmt
                .query_map(params![user_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;

            let mut found = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(conversation) = Self::read_conversation(conn, &id)? {
                    found.push(conversation);
                }
            }
            found.sort_by(|a, b| {
                b.metadata
                    .last_activity
                    .total_cmp(&a.metadata.last_activity)
            });
            if let Some(limit) = limit {
                found.truncate(limit);
            }
            Ok(found)
        })
        .await
    }

    async fn get_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> MemoryResult<Vec<Message>> {
        let conversation_id = conversation_id.to_owned();
        self.blocking(move |conn| {
            let mut messages = Self::read_messages(conn, &conversation_id)?;
            let start = messages.len().saturating_sub(limit);
            Ok(messages.split_off(start))
        })
        .await
    }

    async fn delete_conversation(&self, conversation_id: &str) -> MemoryResult<bool> {
        let conversation_id = conversation_id.to_owned();
        self.blocking(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM conversations WHERE conversation_id = ?1",
                params![conversation_id],
            )?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn clear_user_conversations(&self, user_id: &str) -> MemoryResult<usize> {
        let user_id = user_id.to_owned();
        self.blocking(move |conn| {
            Ok(conn.execute(
                "DELETE FROM conversations WHERE user_id = ?1",
                params![user_id],
            )?)
        })
        .await
    }

    async fn get_stats(&self) -> MemoryResult<MemoryStats> {
        self.blocking(|conn| {
            let total_conversations: usize =
                conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?;
            let total_messages: usize =
                conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
            Ok(MemoryStats {
                total_conversations,
                total_messages,
            })
        })
        .await
    }

    async fn health_check(&self) -> MemoryResult<()> {
        self.blocking(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> MemoryResult<()> {
        // Connections close on drop; flush WAL eagerly.
        self.blocking(|conn| {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
            Ok(())
        })
        .await
    }

    async fn restore_to_checkpoint(
        &self,
        conversation_id: &str,
        criteria: &CheckpointCriteria,
    ) -> MemoryResult<CheckpointRestore> {
        let conversation_id = conversation_id.to_owned();
        let criteria = criteria.clone();
        self.blocking(move |conn| {
            let messages = Self::read_messages(conn, &conversation_id)?;
            if messages.is_empty() {
                return Ok(CheckpointRestore::default());
            }
            let (kept, restore) = apply_checkpoint(&messages, &criteria);
            if restore.restored {
                conn.execute(
                    "DELETE FROM messages WHERE conversation_id = ?1",
                    params![conversation_id],
                )?;
                Self::write_messages(conn, &conversation_id, &kept)?;
                if let Some(mut conversation) = Self::read_conversation(conn, &conversation_id)? {
                    conversation.metadata.total_messages = kept.len();
                    conversation.metadata.updated_at = now_secs();
                    Self::upsert_conversation(
                        conn,
                        &conversation_id,
                        conversation.user_id.as_deref(),
                        &conversation.metadata,
                    )?;
                }
            }
            Ok(restore)
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::TextMatchKind;

    #[tokio::test]
    async fn store_and_fetch_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        let messages = vec![Message::user("hi"), Message::assistant("hello")];
        store
            .store_messages("c1", Some("u1"), &messages, ConversationMetadata::default())
            .await
            .unwrap();

        let conversation = store.get_conversation("c1").await.unwrap().unwrap();
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.user_id.as_deref(), Some("u1"));
        assert_eq!(conversation.messages[0].text().unwrap(), "hi");
    }

    #[tokio::test]
    async fn store_replaces_previous_log() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .store_messages(
                "c1",
                None,
                &[Message::user("a"), Message::user("b")],
                ConversationMetadata::default(),
            )
            .await
            .unwrap();
        store
            .store_messages(
                "c1",
                None,
                &[Message::user("only")],
                ConversationMetadata::default(),
            )
            .await
            .unwrap();

        let conversation = store.get_conversation("c1").await.unwrap().unwrap();
        assert_eq!(conversation.messages.len(), 1);
    }

    #[tokio::test]
    async fn restore_to_checkpoint_rewrites_log() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .append_messages(
                "c1",
                &[
                    Message::user("first"),
                    Message::assistant("one"),
                    Message::user("second"),
                    Message::assistant("two"),
                ],
            )
            .await
            .unwrap();

        let restore = store
            .restore_to_checkpoint(
                "c1",
                &CheckpointCriteria::by_text(TextMatchKind::Exact, "second"),
            )
            .await
            .unwrap();
        assert!(restore.restored);
        assert_eq!(restore.removed_count, 2);

        let conversation = store.get_conversation("c1").await.unwrap().unwrap();
        assert_eq!(conversation.messages.len(), 2);
    }

    #[tokio::test]
    async fn stats_and_health() {
        let store = SqliteStore::in_memory().unwrap();
        store.health_check().await.unwrap();
        store
            .append_messages("c1", &[Message::user("x")])
            .await
            .unwrap();
        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_conversations, 1);
        assert_eq!(stats.total_messages, 1);
    }
}
