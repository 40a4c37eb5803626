//! Session actor: one handle per session serializes every mutation, owns the
//! auto-advance timer and writes through to the store.

use chrono::NaiveDate;
use persistence::{Store, StoreError};
use sim_ai::{analyze_with_timeout, reputation_impacts, TextAnalyzer};
use sim_core::{ActionKind, ArticleId, PlayerId, PolicyId, SessionId, SessionStatus, SimError};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::actions::ANALYSIS_REPUTATION_SCALE;
use crate::policy::PolicyDraft;
use crate::state::SessionState;
use crate::timer::TimerTask;
use crate::turn::TurnReport;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AdvanceOrigin {
    Manual,
    Timer,
}

#[derive(Debug, Default)]
struct PersistCursor {
    /// Action records already appended to the store.
    actions: usize,
    /// Reputation changes already appended to the store.
    changes: usize,
    last_error: Option<String>,
}

/// Clears the busy flag when the boundary ends, however it ends.
struct AdvanceGuard<'a>(&'a AtomicBool);

impl<'a> AdvanceGuard<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for AdvanceGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn timer_cadence(state: &SessionState) -> Duration {
    Duration::from_secs(state.config().turn_cadence_secs)
}

/// Lock order: `timer`, then `persisted`, then `state`. Nothing waits on
/// `timer` while holding one of the other two.
pub(crate) struct SessionInner {
    id: SessionId,
    me: Weak<SessionInner>,
    state: Mutex<SessionState>,
    advancing: AtomicBool,
    /// Last known turn, readable without the state lock.
    turn: AtomicU64,
    timer: Mutex<Option<TimerTask>>,
    persisted: Mutex<PersistCursor>,
    store: Arc<dyn Store>,
    analyzer: Arc<dyn TextAnalyzer>,
}

impl SessionInner {
    /// Run one turn boundary. A boundary already in progress makes this fail
    /// with `TurnInProgress` instead of queueing. Timer-driven boundaries
    /// only run while the session is `Running`; a manual one restarts an
    /// armed timer so the next tick is a full cadence after it.
    pub(crate) async fn advance(&self, origin: AdvanceOrigin) -> Result<TurnReport, SimError> {
        let _busy = AdvanceGuard::claim(&self.advancing).ok_or(SimError::TurnInProgress {
            turn: self.turn.load(Ordering::Acquire),
        })?;
        let (report, cadence) = {
            let mut state = self.state.lock().await;
            if origin == AdvanceOrigin::Timer && state.session().status != SessionStatus::Running {
                return Err(SimError::invalid_state("session is not running"));
            }
            let report = state.advance_turn()?;
            self.turn.store(report.to_turn, Ordering::Release);
            (report, timer_cadence(&state))
        };
        if origin == AdvanceOrigin::Manual {
            // A tick landing meanwhile sees the busy flag and is skipped.
            let mut slot = self.timer.lock().await;
            if slot.is_some() {
                self.arm(&mut slot, cadence).await;
                debug!(session = %self.id, turn = report.to_turn, "timer realigned to manual boundary");
            }
        }
        // The turn stands even if the write fails; the error is kept on the handle.
        let _ = self.flush().await;
        Ok(report)
    }

    /// Replace whatever timer `slot` holds with one first firing a full
    /// `cadence` from now. `slot` must be this session's locked timer.
    async fn arm(&self, slot: &mut Option<TimerTask>, cadence: Duration) {
        if let Some(old) = slot.take() {
            old.stop().await;
        }
        *slot = Some(TimerTask::spawn(self.me.clone(), cadence));
    }

    async fn disarm(slot: &mut Option<TimerTask>) {
        if let Some(task) = slot.take() {
            task.stop().await;
        }
    }

    async fn flush(&self) -> Result<(), SimError> {
        let mut cursor = self.persisted.lock().await;
        let (snapshot, actions, changes) = {
            let state = self.state.lock().await;
            let actions = state
                .action_log()
                .get(cursor.actions..)
                .map(<[_]>::to_vec)
                .unwrap_or_default();
            let changes = state
                .reputation()
                .log()
                .get(cursor.changes..)
                .map(<[_]>::to_vec)
                .unwrap_or_default();
            (state.snapshot(), actions, changes)
        };
        // Each log advances its cursor as soon as its append lands, so a
        // retry after a later failure never writes a row twice.
        let written: Result<(), StoreError> = async {
            self.store.append_actions(&actions).await?;
            cursor.actions += actions.len();
            self.store
                .append_reputation_changes(self.id, &changes)
                .await?;
            cursor.changes += changes.len();
            self.store.save_session(&snapshot).await
        }
        .await;
        match written {
            Ok(()) => {
                cursor.last_error = None;
                Ok(())
            }
            Err(e) => {
                warn!(session = %self.id, error = %e, "session persistence failed");
                cursor.last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }
}

/// Cheap, cloneable handle to one session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.inner.id)
            .finish()
    }
}

impl SessionHandle {
    /// Everything already in `state`'s logs is taken as stored: a fresh
    /// session has empty logs, a restored one was loaded from the store.
    pub(crate) fn new(
        state: SessionState,
        store: Arc<dyn Store>,
        analyzer: Arc<dyn TextAnalyzer>,
    ) -> Self {
        let cursor = PersistCursor {
            actions: state.action_log().len(),
            changes: state.reputation().log().len(),
            last_error: None,
        };
        Self {
            inner: Arc::new_cyclic(|me| SessionInner {
                id: state.session().id,
                me: me.clone(),
                turn: AtomicU64::new(state.current_turn()),
                state: Mutex::new(state),
                advancing: AtomicBool::new(false),
                timer: Mutex::new(None),
                persisted: Mutex::new(cursor),
                store,
                analyzer,
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Run `f` with exclusive access to the session. Every check it makes and
    /// every change it applies happen with no other access in between.
    pub async fn apply<R, F>(&self, f: F) -> Result<R, SimError>
    where
        F: FnOnce(&mut SessionState) -> Result<R, SimError>,
    {
        let mut state = self.inner.state.lock().await;
        f(&mut state)
    }

    pub async fn read<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&SessionState) -> R,
    {
        let state = self.inner.state.lock().await;
        f(&state)
    }

    /// Persist the current snapshot and any new log entries.
    pub async fn flush(&self) -> Result<(), SimError> {
        self.inner.flush().await
    }

    pub async fn last_persistence_error(&self) -> Option<String> {
        self.inner.persisted.lock().await.last_error.clone()
    }

    pub async fn timer_running(&self) -> bool {
        self.inner.timer.lock().await.is_some()
    }

    async fn persist_quietly(&self) {
        let _ = self.inner.flush().await;
    }

    /// Arm the timer unless one is already running.
    pub(crate) async fn start_timer(&self) {
        let mut slot = self.inner.timer.lock().await;
        if slot.is_none() {
            let cadence = self.read(timer_cadence).await;
            self.inner.arm(&mut slot, cadence).await;
        }
    }

    /// Gamemaster only. Starts turn 0, and the timer when auto-advance is on.
    pub async fn initialize(
        &self,
        caller: PlayerId,
        in_game_start: Option<NaiveDate>,
    ) -> Result<(), SimError> {
        let mut slot = self.inner.timer.lock().await;
        let (auto, cadence) = self
            .apply(|s| {
                s.require_gamemaster(caller)?;
                s.initialize(in_game_start)?;
                Ok((s.session().auto_advance, timer_cadence(s)))
            })
            .await?;
        if auto {
            self.inner.arm(&mut slot, cadence).await;
        }
        drop(slot);
        self.persist_quietly().await;
        Ok(())
    }

    /// Gamemaster override: run the turn boundary now. Collides with a
    /// timer-fired boundary as `TurnInProgress`, never runs twice.
    pub async fn advance(&self, caller: PlayerId) -> Result<TurnReport, SimError> {
        self.read(|s| s.require_gamemaster(caller)).await?;
        self.inner.advance(AdvanceOrigin::Manual).await
    }

    /// Stop the timer. Once this returns no further boundary fires until
    /// `resume`; a boundary already running completes first.
    pub async fn pause(&self, caller: PlayerId) -> Result<(), SimError> {
        let mut slot = self.inner.timer.lock().await;
        self.apply(|s| {
            s.require_gamemaster(caller)?;
            s.set_paused()
        })
        .await?;
        SessionInner::disarm(&mut slot).await;
        drop(slot);
        self.persist_quietly().await;
        info!(session = %self.id(), "session paused");
        Ok(())
    }

    /// Re-arm the timer a full cadence from now. The turn number is unchanged.
    pub async fn resume(&self, caller: PlayerId) -> Result<(), SimError> {
        let mut slot = self.inner.timer.lock().await;
        let (auto, cadence) = self
            .apply(|s| {
                s.require_gamemaster(caller)?;
                s.set_resumed()?;
                Ok((s.session().auto_advance, timer_cadence(s)))
            })
            .await?;
        if auto {
            self.inner.arm(&mut slot, cadence).await;
        }
        drop(slot);
        self.persist_quietly().await;
        info!(session = %self.id(), "session resumed");
        Ok(())
    }

    pub async fn set_auto_advance(&self, caller: PlayerId, enabled: bool) -> Result<(), SimError> {
        let mut slot = self.inner.timer.lock().await;
        let (status, cadence) = self
            .apply(|s| {
                s.require_gamemaster(caller)?;
                if s.session().status == SessionStatus::Archived {
                    return Err(SimError::invalid_state("session is archived"));
                }
                s.session.auto_advance = enabled;
                Ok((s.session().status, timer_cadence(s)))
            })
            .await?;
        if !enabled {
            SessionInner::disarm(&mut slot).await;
        } else if status == SessionStatus::Running && slot.is_none() {
            self.inner.arm(&mut slot, cadence).await;
        }
        drop(slot);
        self.persist_quietly().await;
        Ok(())
    }

    /// Terminal. Stops the timer; every later mutation fails.
    pub async fn archive(&self, caller: PlayerId) -> Result<(), SimError> {
        let mut slot = self.inner.timer.lock().await;
        self.apply(|s| {
            s.require_gamemaster(caller)?;
            s.set_archived()
        })
        .await?;
        SessionInner::disarm(&mut slot).await;
        drop(slot);
        self.persist_quietly().await;
        info!(session = %self.id(), "session archived");
        Ok(())
    }

    /// Submit a policy. Without explicit impacts the text analyzer derives
    /// them; it runs outside the session lock, and its failure rejects the
    /// submission.
    pub async fn submit_policy(
        &self,
        proposer: PlayerId,
        draft: PolicyDraft,
    ) -> Result<PolicyId, SimError> {
        if !draft.impacts.is_empty() {
            return self.apply(|s| s.submit_policy(proposer, draft)).await;
        }
        let timeout = self
            .read(|s| {
                s.ensure_active()?;
                s.check_action_points(proposer, ActionKind::SubmitPolicy)?;
                Ok::<_, SimError>(Duration::from_millis(s.config().analysis_timeout_ms))
            })
            .await?;
        let analysis = analyze_with_timeout(
            self.inner.analyzer.as_ref(),
            &draft.title,
            &draft.description,
            timeout,
        )
        .await?;
        self.apply(|s| {
            let mut draft = draft;
            if draft.category.trim().is_empty() {
                draft.category = analysis.category.clone();
            }
            draft.impacts = reputation_impacts(&analysis, s.slices(), ANALYSIS_REPUTATION_SCALE);
            draft.impacts.extend(analysis.impacts);
            s.submit_policy(proposer, draft)
        })
        .await
    }

    /// Publish a news story about `subject`. The analyzer runs outside the
    /// session lock; if it fails the article is still recorded, flagged and
    /// without effect.
    pub async fn publish_news(
        &self,
        author: PlayerId,
        subject: PlayerId,
        headline: &str,
        body: &str,
    ) -> Result<ArticleId, SimError> {
        let timeout = self
            .read(|s| {
                s.check_news(author, subject)?;
                Ok::<_, SimError>(Duration::from_millis(s.config().analysis_timeout_ms))
            })
            .await?;
        let analysis =
            analyze_with_timeout(self.inner.analyzer.as_ref(), headline, body, timeout).await;
        self.apply(|s| s.record_article(author, subject, headline, analysis))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::fixtures::*;
    use async_trait::async_trait;
    use persistence::MemoryStore;
    use sim_ai::{Analysis, AnalysisError, KeywordAnalyzer};
    use sim_core::{ErrorKind, Impact, SliceId};

    fn handle_with(analyzer: Arc<dyn TextAnalyzer>) -> (SessionHandle, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let state = SessionState::new(SessionId(1), setup(), clock()).unwrap();
        (SessionHandle::new(state, store.clone(), analyzer), store)
    }

    fn handle() -> (SessionHandle, Arc<MemoryStore>) {
        handle_with(Arc::new(KeywordAnalyzer::with_vocabulary(["farmer", "avel"])))
    }

    struct Broken;

    #[async_trait]
    impl TextAnalyzer for Broken {
        async fn analyze(&self, _: &str, _: &str) -> Result<Analysis, AnalysisError> {
            Err(AnalysisError::Failed("offline".into()))
        }
    }

    #[tokio::test]
    async fn lifecycle_requires_gamemaster() {
        let (h, _) = handle();
        assert_eq!(
            h.initialize(ALICE, None).await.unwrap_err().kind(),
            ErrorKind::Unauthorized
        );
        h.initialize(GM, None).await.unwrap();
        assert_eq!(h.advance(ALICE).await.unwrap_err().kind(), ErrorKind::Unauthorized);
        assert_eq!(h.pause(BOB).await.unwrap_err().kind(), ErrorKind::Unauthorized);
        let r = h.advance(GM).await.unwrap();
        assert_eq!(r.to_turn, 1);
    }

    #[tokio::test]
    async fn advance_persists_snapshot_and_new_actions_once() {
        let (h, store) = handle();
        h.initialize(GM, None).await.unwrap();
        h.apply(|s| s.consume(ALICE, ActionKind::Endorse)).await.unwrap();
        h.advance(GM).await.unwrap();
        h.apply(|s| s.consume(BOB, ActionKind::Prospect)).await.unwrap();
        h.advance(GM).await.unwrap();

        let saved = store.load_session(SessionId(1)).await.unwrap().unwrap();
        assert_eq!(saved.session.current_turn, 2);
        let actions = store.load_actions(SessionId(1)).await.unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[1].player, BOB);
        assert!(h.last_persistence_error().await.is_none());
    }

    #[tokio::test]
    async fn analyzer_fills_missing_policy_impacts() {
        let (h, _) = handle();
        h.initialize(GM, None).await.unwrap();
        let draft = PolicyDraft {
            description: "Major support for every farmer in Avel".into(),
            ..PolicyDraft::new("Harvest reform", "")
        };
        let id = h.submit_policy(ALICE, draft).await.unwrap();
        let policy = h.read(|s| s.policy(id).cloned()).await.unwrap();
        assert_eq!(policy.category, "agriculture");
        assert!(policy
            .impacts
            .iter()
            .any(|i| matches!(i, Impact::Reputation { slice: SliceId(10), delta } if *delta > 0.0)));
    }

    #[tokio::test]
    async fn analyzer_failure_rejects_policy_but_not_news() {
        let (h, _) = handle_with(Arc::new(Broken));
        h.initialize(GM, None).await.unwrap();
        let err = h
            .submit_policy(ALICE, PolicyDraft::new("Levy", "taxation"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalDependencyFailure);
        assert_eq!(h.read(|s| s.remaining(ALICE)).await.unwrap(), 5);

        h.apply(|s| {
            s.player_mut(BOB)?.newspaper = Some("Courier".into());
            Ok(())
        })
        .await
        .unwrap();
        let article = h.publish_news(BOB, ALICE, "Quiet week", "").await.unwrap();
        let stored = h.read(|s| s.articles()[0].clone()).await;
        assert_eq!(stored.id, article);
        assert!(stored.analysis_failed);
    }

    #[tokio::test]
    async fn archive_is_terminal() {
        let (h, _) = handle();
        h.initialize(GM, None).await.unwrap();
        h.archive(GM).await.unwrap();
        assert_eq!(h.advance(GM).await.unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(h.resume(GM).await.unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(
            h.set_auto_advance(GM, true).await.unwrap_err().kind(),
            ErrorKind::InvalidState
        );
    }
}
