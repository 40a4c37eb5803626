//! Live sessions by id: creation, lookup, restore from the store, archival.

use persistence::Store;
use sim_ai::TextAnalyzer;
use sim_core::{PlayerId, SessionId, SessionStatus, SimError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::session::SessionHandle;
use crate::state::{SessionSetup, SessionState};

pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    store: Arc<dyn Store>,
    analyzer: Arc<dyn TextAnalyzer>,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("store", &self.store)
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn Store>,
        analyzer: Arc<dyn TextAnalyzer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            analyzer,
            clock,
            next_id: AtomicU64::new(1),
        }
    }

    /// Like [`Self::new`], but continues id allocation after the sessions
    /// already saved in `store`.
    pub async fn open(
        store: Arc<dyn Store>,
        analyzer: Arc<dyn TextAnalyzer>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SimError> {
        let saved = store.list_sessions().await?;
        let registry = Self::new(store, analyzer, clock);
        let next = saved.iter().map(|s| s.id.0).max().unwrap_or(0) + 1;
        registry.next_id.store(next, Ordering::Release);
        Ok(registry)
    }

    /// Create a session in `Uninitialized` state and save it.
    pub async fn create(&self, setup: SessionSetup) -> Result<SessionHandle, SimError> {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::AcqRel));
        let state = SessionState::new(id, setup, self.clock.clone())?;
        let handle = SessionHandle::new(state, self.store.clone(), self.analyzer.clone());
        self.sessions.write().await.insert(id, handle.clone());
        if let Err(e) = handle.flush().await {
            warn!(session = %id, error = %e, "new session not saved");
        }
        info!(session = %id, "session created");
        Ok(handle)
    }

    pub async fn get(&self, id: SessionId) -> Result<SessionHandle, SimError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| SimError::not_found("session", id.0))
    }

    /// Load a saved session back into memory. Its auto-advance timer is
    /// re-armed if it was running.
    pub async fn restore(&self, id: SessionId) -> Result<SessionHandle, SimError> {
        if let Ok(live) = self.get(id).await {
            return Ok(live);
        }
        let snapshot = self
            .store
            .load_session(id)
            .await?
            .ok_or_else(|| SimError::not_found("session", id.0))?;
        let actions = self.store.load_actions(id).await?;
        let changes = self.store.load_reputation_changes(id).await?;
        let state = SessionState::from_snapshot(snapshot, actions, changes, self.clock.clone())?;
        let rearm = state.session().status == SessionStatus::Running && state.session().auto_advance;
        let turn = state.current_turn();
        let handle = SessionHandle::new(state, self.store.clone(), self.analyzer.clone());
        if rearm {
            handle.start_timer().await;
        }
        self.next_id.fetch_max(id.0 + 1, Ordering::AcqRel);
        self.sessions.write().await.insert(id, handle.clone());
        info!(session = %id, turn, "session restored");
        Ok(handle)
    }

    /// Archive and unload a session. The archived snapshot stays in the store.
    pub async fn archive(&self, caller: PlayerId, id: SessionId) -> Result<(), SimError> {
        let handle = self.get(id).await?;
        handle.archive(caller).await?;
        self.sessions.write().await.remove(&id);
        Ok(())
    }

    pub async fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().await.keys().copied().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::fixtures::*;
    use persistence::MemoryStore;
    use sim_ai::KeywordAnalyzer;
    use sim_core::{ActionKind, ErrorKind, SliceId};

    fn registry(store: Arc<MemoryStore>) -> SessionRegistry {
        SessionRegistry::new(store, Arc::new(KeywordAnalyzer::default()), clock())
    }

    #[tokio::test]
    async fn ids_are_unique_and_lookup_fails_cleanly() {
        let reg = registry(Arc::new(MemoryStore::new()));
        let a = reg.create(setup()).await.unwrap();
        let b = reg.create(setup()).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(reg.session_ids().await, vec![a.id(), b.id()]);
        let err = reg.get(SessionId(99)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn restore_picks_up_where_the_store_left_off() {
        let store = Arc::new(MemoryStore::new());
        let reg = registry(store.clone());
        let h = reg.create(setup()).await.unwrap();
        h.initialize(GM, None).await.unwrap();
        h.apply(|s| s.consume(ALICE, ActionKind::Endorse)).await.unwrap();
        h.apply(|s| s.start_campaign_with(ALICE, SliceId(10), 1, 3.0))
            .await
            .unwrap();
        h.advance(GM).await.unwrap();
        h.advance(GM).await.unwrap();
        let id = h.id();

        let fresh = SessionRegistry::open(store.clone(), Arc::new(KeywordAnalyzer::default()), clock())
            .await
            .unwrap();
        let back = fresh.restore(id).await.unwrap();
        assert_eq!(back.read(|s| s.current_turn()).await, 2);
        assert_eq!(back.read(|s| s.action_log().len()).await, 2);
        assert_eq!(back.read(|s| s.reputation().score(ALICE, SliceId(10))).await, 3.0);
        assert_eq!(back.read(|s| s.reputation().log().len()).await, 1);

        // Only entries made after the restore are appended.
        back.apply(|s| s.start_campaign_with(BOB, SliceId(11), 1, 2.0))
            .await
            .unwrap();
        back.advance(GM).await.unwrap();
        back.advance(GM).await.unwrap();
        assert_eq!(store.load_actions(id).await.unwrap().len(), 3);
        let changes = store.load_reputation_changes(id).await.unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(back.read(|s| s.reputation().log().to_vec()).await, changes);

        let next = fresh.create(setup()).await.unwrap();
        assert!(next.id() > id);
    }

    #[tokio::test]
    async fn archive_unloads_but_keeps_the_save() {
        let store = Arc::new(MemoryStore::new());
        let reg = registry(store.clone());
        let h = reg.create(setup()).await.unwrap();
        h.initialize(GM, None).await.unwrap();
        assert_eq!(
            reg.archive(ALICE, h.id()).await.unwrap_err().kind(),
            ErrorKind::Unauthorized
        );
        reg.archive(GM, h.id()).await.unwrap();
        assert!(reg.get(h.id()).await.is_err());
        let saved = store.load_session(h.id()).await.unwrap().unwrap();
        assert_eq!(saved.session.status, SessionStatus::Archived);
    }
}
