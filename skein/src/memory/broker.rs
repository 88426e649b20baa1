//! Memory broker: load and store logic between runs and the store.
//!
//! Loading filters out `halted` placeholders (storage-only audit markers,
//! never replayed to the model), merges history with the incoming state's
//! messages deduplicating by the (role, content, tool_calls) triple, and
//! rehydrates approvals from conversation metadata and the optional
//! out-of-band stores. Storing persists the *full* log — placeholders
//! included — plus run metadata, compressing long logs.
//!
//! Every failure here is logged and swallowed: memory never corrupts
//! outcome semantics.

use tracing::{debug, warn};

use super::{ConversationMetadata, MemoryConfig, MemoryStore};
use crate::approval::{ApprovalStore, ClarificationStore};
use crate::message::Message;
use crate::state::RunState;

/// Outcome summary of a broker operation, for event emission.
#[derive(Debug, Clone)]
pub(crate) struct MemoryOpReport {
    pub conversation_id: String,
    pub message_count: usize,
}

/// Dedup key: the serialized (role, content, tool_calls) triple.
fn dedup_key(message: &Message) -> String {
    serde_json::to_string(&(
        message.role,
        &message.content,
        &message.tool_calls,
    ))
    .unwrap_or_default()
}

/// Merge loaded history with the incoming state's messages, skipping new
/// messages already present in history. Prevents duplication when
/// resuming interruptions.
fn merge_history(history: Vec<Message>, new_messages: &[Message]) -> Vec<Message> {
    let seen: Vec<String> = history.iter().map(dedup_key).collect();
    let mut merged = history;
    for message in new_messages {
        if !seen.contains(&dedup_key(message)) {
            merged.push(message.clone());
        }
    }
    merged
}

/// Compress a log over `threshold` messages: keep the first 20 % and the
/// most recent 80 % of the threshold, dropping the middle.
fn compress(messages: Vec<Message>, threshold: usize) -> Vec<Message> {
    if messages.len() <= threshold || threshold == 0 {
        return messages;
    }
    let head = threshold / 5;
    let tail = threshold - head;
    let mut compressed: Vec<Message> = messages[..head].to_vec();
    compressed.extend_from_slice(&messages[messages.len() - tail..]);
    compressed
}

/// Load conversation history and approvals into `state` per the config.
pub(crate) async fn load_state(
    store: &dyn MemoryStore,
    config: &MemoryConfig,
    mut state: RunState,
    approval_store: Option<&dyn ApprovalStore>,
    clarification_store: Option<&dyn ClarificationStore>,
) -> (RunState, Option<MemoryOpReport>) {
    let mut report = None;

    if config.auto_store && let Some(conversation_id) = &config.conversation_id {
        // Caller-held decisions always win over anything rehydrated.
        let caller_approvals: Vec<String> = state.approvals.keys().cloned().collect();

        match store.get_conversation(conversation_id).await {
            Ok(Some(conversation)) => {
                let mut history = conversation.messages;
                if let Some(max) = config.max_messages {
                    let start = history.len().saturating_sub(max);
                    history.drain(..start);
                }
                history.retain(|m| m.tool_reply_status().as_deref() != Some("halted"));

                let merged = merge_history(history, &state.messages);
                debug!(
                    conversation_id,
                    loaded = merged.len(),
                    "Loaded conversation history"
                );
                report = Some(MemoryOpReport {
                    conversation_id: conversation_id.clone(),
                    message_count: merged.len(),
                });
                state.messages = merged;

                for (id, value) in conversation.metadata.approvals {
                    state.approvals.entry(id).or_insert(value);
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(conversation_id, error = %e, "Memory load failed; continuing without history");
            }
        }

        if let Some(approvals) = approval_store {
            match approvals.get_run_approvals(state.run_id.as_str()).await {
                Ok(stored) => {
                    for (id, value) in stored {
                        if !caller_approvals.contains(&id) {
                            state.approvals.insert(id, value);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Approval storage load failed"),
            }
        }

        if let Some(clarifications) = clarification_store {
            match clarifications
                .get_run_clarifications(state.run_id.as_str())
                .await
            {
                Ok(stored) => {
                    for (id, selected) in stored {
                        state.clarifications.entry(id).or_insert(selected);
                    }
                }
                Err(e) => warn!(error = %e, "Clarification storage load failed"),
            }
        }
    }

    (state, report)
}

/// Persist the full message log plus run metadata. Best-effort.
pub(crate) async fn persist_state(
    store: &dyn MemoryStore,
    config: &MemoryConfig,
    state: &RunState,
) -> Option<MemoryOpReport> {
    let conversation_id = config.conversation_id.as_deref()?;

    let mut messages = state.messages.clone();
    if let Some(threshold) = config.compression_threshold {
        messages = compress(messages, threshold);
    }

    let metadata = ConversationMetadata {
        approvals: state.approvals.clone(),
        turn_count: state.turn_count,
        run_id: Some(state.run_id.to_string()),
        trace_id: Some(state.trace_id.to_string()),
        agent_name: Some(state.current_agent.clone()),
        ..Default::default()
    };

    match store
        .store_messages(
            conversation_id,
            config.user_id.as_deref(),
            &messages,
            metadata,
        )
        .await
    {
        Ok(()) => Some(MemoryOpReport {
            conversation_id: conversation_id.to_owned(),
            message_count: messages.len(),
        }),
        Err(e) => {
            warn!(conversation_id, error = %e, "Memory store failed; outcome unaffected");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryStore, MemoryConfig};
    use crate::state::{ApprovalValue, RunState};
    use crate::tool::ToolReply;

    fn messages(n: usize) -> Vec<Message> {
        (0..n).map(|i| Message::user(format!("m{i}"))).collect()
    }

    #[test]
    fn merge_skips_duplicates() {
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        let incoming = vec![Message::user("hi"), Message::user("next")];
        let merged = merge_history(history, &incoming);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[2].text().unwrap(), "next");
    }

    #[test]
    fn dedup_key_distinguishes_roles() {
        assert_ne!(
            dedup_key(&Message::user("same")),
            dedup_key(&Message::assistant("same"))
        );
    }

    #[test]
    fn compress_keeps_head_and_tail() {
        let compressed = compress(messages(20), 10);
        assert_eq!(compressed.len(), 10);
        assert_eq!(compressed[0].text().unwrap(), "m0");
        assert_eq!(compressed[1].text().unwrap(), "m1");
        // Tail: the last 8 of the original 20.
        assert_eq!(compressed[2].text().unwrap(), "m12");
        assert_eq!(compressed[9].text().unwrap(), "m19");
    }

    #[test]
    fn compress_below_threshold_is_noop() {
        assert_eq!(compress(messages(5), 10).len(), 5);
    }

    #[tokio::test]
    async fn load_filters_halted_placeholders() {
        let store = InMemoryStore::new();
        let stored = vec![
            Message::user("book a flight"),
            Message::assistant_tool_calls(
                None,
                vec![crate::message::ToolCall::new("call_1", "book_flight", "{}")],
            ),
            ToolReply::halted("book_flight").into_message("call_1"),
        ];
        store
            .store_messages("c1", None, &stored, ConversationMetadata::default())
            .await
            .unwrap();

        let state = RunState::new("agent", "book a flight");
        let config = MemoryConfig::auto("c1");
        let (loaded, report) = load_state(&store, &config, state, None, None).await;

        // The halted placeholder is gone, the user message deduplicated.
        assert_eq!(loaded.messages.len(), 2);
        assert!(loaded
            .messages
            .iter()
            .all(|m| m.tool_reply_status().as_deref() != Some("halted")));
        assert_eq!(report.unwrap().message_count, 2);
    }

    #[tokio::test]
    async fn load_rehydrates_approvals_without_clobbering_caller() {
        let store = InMemoryStore::new();
        let metadata = ConversationMetadata {
            approvals: [
                ("call_1".to_owned(), ApprovalValue::pending()),
                ("call_2".to_owned(), ApprovalValue::pending()),
            ]
            .into(),
            ..Default::default()
        };
        store
            .store_messages("c1", None, &[Message::user("hi")], metadata)
            .await
            .unwrap();

        let state = RunState::new("agent", "hi")
            .with_approval("call_1", ApprovalValue::approved());
        let config = MemoryConfig::auto("c1");
        let (loaded, _) = load_state(&store, &config, state, None, None).await;

        assert_eq!(loaded.approvals["call_1"], ApprovalValue::approved());
        assert_eq!(loaded.approvals["call_2"], ApprovalValue::pending());
    }

    #[tokio::test]
    async fn persist_stores_full_log_with_metadata() {
        let store = InMemoryStore::new();
        let mut state = RunState::new("agent", "hi");
        state
            .messages
            .push(ToolReply::halted("t").into_message("call_1"));
        state.turn_count = 3;

        let config = MemoryConfig::auto("c1").user("u1");
        let report = persist_state(&store, &config, &state).await.unwrap();
        assert_eq!(report.message_count, 2);

        let conversation = store.get_conversation("c1").await.unwrap().unwrap();
        // Halted placeholders are persisted for audit.
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.metadata.turn_count, 3);
        assert_eq!(conversation.metadata.agent_name.as_deref(), Some("agent"));
        assert_eq!(conversation.user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn round_trip_modulo_halted_filtering() {
        let store = InMemoryStore::new();
        let mut state = RunState::new("agent", "hi");
        state.messages.push(Message::assistant("hello"));
        state
            .messages
            .push(ToolReply::halted("t").into_message("call_1"));

        let config = MemoryConfig::auto("c1");
        persist_state(&store, &config, &state).await.unwrap();

        let fresh = RunState::new("agent", "hi");
        let (loaded, _) = load_state(&store, &config, fresh, None, None).await;
        let non_halted: Vec<_> = state
            .messages
            .iter()
            .filter(|m| m.tool_reply_status().as_deref() != Some("halted"))
            .collect();
        assert_eq!(loaded.messages.len(), non_halted.len());
    }
}
