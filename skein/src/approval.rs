//! Optional out-of-band storage for approvals and clarifications.
//!
//! When a run interrupts, the decision often arrives through another
//! channel (a UI, an API endpoint) while the run state lives elsewhere.
//! [`ApprovalStore`] and [`ClarificationStore`] let that channel record
//! decisions keyed by run id; the engine rehydrates them into the state
//! on the next entry.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::memory::MemoryResult;
use crate::state::ApprovalValue;

/// Storage for tool-approval decisions, keyed by run and tool call id.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Record a decision.
    async fn store_approval(
        &self,
        run_id: &str,
        tool_call_id: &str,
        value: &ApprovalValue,
    ) -> MemoryResult<()>;

    /// Fetch a decision.
    async fn get_approval(
        &self,
        run_id: &str,
        tool_call_id: &str,
    ) -> MemoryResult<Option<ApprovalValue>>;

    /// All decisions recorded for a run.
    async fn get_run_approvals(&self, run_id: &str)
        -> MemoryResult<HashMap<String, ApprovalValue>>;

    /// Replace a decision.
    async fn update_approval(
        &self,
        run_id: &str,
        tool_call_id: &str,
        value: &ApprovalValue,
    ) -> MemoryResult<()> {
        self.store_approval(run_id, tool_call_id, value).await
    }

    /// Remove a decision; returns whether it existed.
    async fn delete_approval(&self, run_id: &str, tool_call_id: &str) -> MemoryResult<bool>;

    /// Remove every decision for a run; returns how many.
    async fn clear_run_approvals(&self, run_id: &str) -> MemoryResult<usize>;
}

/// Storage for clarification answers, keyed by run and clarification id.
#[async_trait]
pub trait ClarificationStore: Send + Sync {
    /// Record the selected option for a clarification.
    async fn store_clarification(
        &self,
        run_id: &str,
        clarification_id: &str,
        selected_option: &str,
    ) -> MemoryResult<()>;

    /// Fetch the selected option for a clarification.
    async fn get_clarification(
        &self,
        run_id: &str,
        clarification_id: &str,
    ) -> MemoryResult<Option<String>>;

    /// All answers recorded for a run.
    async fn get_run_clarifications(&self, run_id: &str) -> MemoryResult<HashMap<String, String>>;

    /// Remove an answer; returns whether it existed.
    async fn delete_clarification(
        &self,
        run_id: &str,
        clarification_id: &str,
    ) -> MemoryResult<bool>;

    /// Remove every answer for a run; returns how many.
    async fn clear_run_clarifications(&self, run_id: &str) -> MemoryResult<usize>;
}

/// In-memory [`ApprovalStore`].
#[derive(Debug, Default)]
pub struct InMemoryApprovalStore {
    entries: RwLock<HashMap<String, HashMap<String, ApprovalValue>>>,
}

impl InMemoryApprovalStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn store_approval(
        &self,
        run_id: &str,
        tool_call_id: &str,
        value: &ApprovalValue,
    ) -> MemoryResult<()> {
        self.entries
            .write()
            .await
            .entry(run_id.to_owned())
            .or_default()
            .insert(tool_call_id.to_owned(), value.clone());
        Ok(())
    }

    async fn get_approval(
        &self,
        run_id: &str,
        tool_call_id: &str,
    ) -> MemoryResult<Option<ApprovalValue>> {
        Ok(self
            .entries
            .read()
            .await
            .get(run_id)
            .and_then(|m| m.get(tool_call_id))
            .cloned())
    }

    async fn get_run_approvals(
        &self,
        run_id: &str,
    ) -> MemoryResult<HashMap<String, ApprovalValue>> {
        Ok(self.entries.read().await.get(run_id).cloned().unwrap_or_default())
    }

    async fn delete_approval(&self, run_id: &str, tool_call_id: &str) -> MemoryResult<bool> {
        Ok(self
            .entries
            .write()
            .await
            .get_mut(run_id)
            .is_some_and(|m| m.remove(tool_call_id).is_some()))
    }

    async fn clear_run_approvals(&self, run_id: &str) -> MemoryResult<usize> {
        Ok(self
            .entries
            .write()
            .await
            .remove(run_id)
            .map_or(0, |m| m.len()))
    }
}

/// In-memory [`ClarificationStore`].
#[derive(Debug, Default)]
pub struct InMemoryClarificationStore {
    entries: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl InMemoryClarificationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClarificationStore for InMemoryClarificationStore {
    async fn store_clarification(
        &self,
        run_id: &str,
        clarification_id: &str,
        selected_option: &str,
    ) -> MemoryResult<()> {
        self.entries
            .write()
            .await
            .entry(run_id.to_owned())
            .or_default()
            .insert(clarification_id.to_owned(), selected_option.to_owned());
        Ok(())
    }

    async fn get_clarification(
        &self,
        run_id: &str,
        clarification_id: &str,
    ) -> MemoryResult<Option<String>> {
        Ok(self
            .entries
            .read()
            .await
            .get(run_id)
            .and_then(|m| m.get(clarification_id))
            .cloned())
    }

    async fn get_run_clarifications(
        &self,
        run_id: &str,
    ) -> MemoryResult<HashMap<String, String>> {
        Ok(self.entries.read().await.get(run_id).cloned().unwrap_or_default())
    }

    async fn delete_clarification(
        &self,
        run_id: &str,
        clarification_id: &str,
    ) -> MemoryResult<bool> {
        Ok(self
            .entries
            .write()
            .await
            .get_mut(run_id)
            .is_some_and(|m| m.remove(clarification_id).is_some()))
    }

    async fn clear_run_clarifications(&self, run_id: &str) -> MemoryResult<usize> {
        Ok(self
            .entries
            .write()
            .await
            .remove(run_id)
            .map_or(0, |m| m.len()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn approval_store_roundtrip() {
        let store = InMemoryApprovalStore::new();
        store
            .store_approval("run_1", "call_1", &ApprovalValue::approved())
            .await
            .unwrap();

        let value = store.get_approval("run_1", "call_1").await.unwrap().unwrap();
        assert_eq!(value, ApprovalValue::approved());
        assert!(store.get_approval("run_2", "call_1").await.unwrap().is_none());

        let all = store.get_run_approvals("run_1").await.unwrap();
        assert_eq!(all.len(), 1);

        assert!(store.delete_approval("run_1", "call_1").await.unwrap());
        assert!(!store.delete_approval("run_1", "call_1").await.unwrap());
    }

    #[tokio::test]
    async fn clear_run_approvals_counts() {
        let store = InMemoryApprovalStore::new();
        for id in ["call_1", "call_2"] {
            store
                .store_approval("run_1", id, &ApprovalValue::pending())
                .await
                .unwrap();
        }
        assert_eq!(store.clear_run_approvals("run_1").await.unwrap(), 2);
        assert_eq!(store.clear_run_approvals("run_1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clarification_store_roundtrip() {
        let store = InMemoryClarificationStore::new();
        store
            .store_clarification("run_1", "clar_1", "JFK")
            .await
            .unwrap();
        assert_eq!(
            store
                .get_clarification("run_1", "clar_1")
                .await
                .unwrap()
                .as_deref(),
            Some("JFK")
        );
        assert_eq!(store.clear_run_clarifications("run_1").await.unwrap(), 1);
    }
}
