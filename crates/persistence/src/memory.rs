use async_trait::async_trait;
use sim_core::{ActionRecord, ReputationChange, SessionId, SessionSnapshot};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use crate::{SessionSummary, Store, StoreError};

#[derive(Debug, Default)]
struct Inner {
    sessions: BTreeMap<SessionId, SessionSnapshot>,
    actions: Vec<ActionRecord>,
    changes: BTreeMap<SessionId, Vec<ReputationChange>>,
}

/// Process-local store. Used by tests and the demo CLI when no database URL
/// is given.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_session(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .sessions
            .insert(snapshot.session.id, snapshot.clone());
        Ok(())
    }

    async fn load_session(&self, id: SessionId) -> Result<Option<SessionSnapshot>, StoreError> {
        Ok(self.inner.lock().await.sessions.get(&id).cloned())
    }

    async fn append_actions(&self, records: &[ActionRecord]) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .actions
            .extend(records.iter().cloned());
        Ok(())
    }

    async fn load_actions(&self, id: SessionId) -> Result<Vec<ActionRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .actions
            .iter()
            .filter(|r| r.session == id)
            .cloned()
            .collect())
    }

    async fn append_reputation_changes(
        &self,
        id: SessionId,
        changes: &[ReputationChange],
    ) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }
        self.inner
            .lock()
            .await
            .changes
            .entry(id)
            .or_default()
            .extend(changes.iter().cloned());
        Ok(())
    }

    async fn load_reputation_changes(
        &self,
        id: SessionId,
    ) -> Result<Vec<ReputationChange>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .changes
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .sessions
            .values()
            .map(SessionSummary::of)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{change, record, snapshot};
    use sim_core::ActionKind;

    #[tokio::test]
    async fn last_save_wins() {
        let store = MemoryStore::new();
        store.save_session(&snapshot(1, 2)).await.unwrap();
        store.save_session(&snapshot(1, 3)).await.unwrap();
        let loaded = store.load_session(SessionId(1)).await.unwrap().unwrap();
        assert_eq!(loaded.session.current_turn, 3);
        assert!(store.load_session(SessionId(9)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn actions_are_scoped_by_session() {
        let store = MemoryStore::new();
        store
            .append_actions(&[
                record(1, 2, 1, ActionKind::Endorse),
                record(2, 2, 1, ActionKind::Campaign),
            ])
            .await
            .unwrap();
        let actions = store.load_actions(SessionId(1)).await.unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Endorse);
    }

    #[tokio::test]
    async fn reputation_changes_append_per_session() {
        let store = MemoryStore::new();
        store
            .append_reputation_changes(SessionId(1), &[change(2, 10, 1, 1.5)])
            .await
            .unwrap();
        store
            .append_reputation_changes(SessionId(2), &[change(3, 10, 1, -1.0)])
            .await
            .unwrap();
        store
            .append_reputation_changes(SessionId(1), &[change(2, 11, 2, 0.5)])
            .await
            .unwrap();
        let got = store.load_reputation_changes(SessionId(1)).await.unwrap();
        assert_eq!(got, vec![change(2, 10, 1, 1.5), change(2, 11, 2, 0.5)]);
        assert!(store.load_reputation_changes(SessionId(7)).await.unwrap().is_empty());
    }
}
