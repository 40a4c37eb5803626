//! Scheduler state transitions and the end-of-turn pipeline.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sim_core::{
    Campaign, CampaignId, Economy, Election, ElectionId, IdAllocator, Office, OfficeId, Party,
    PartyId, Player, PlayerId, Policy, PolicyId, Session, SessionId, SessionStatus, SimError,
    Turn,
};
use sim_reputation::Savepoint;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::state::SessionState;

/// What one turn boundary did.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnReport {
    pub session: SessionId,
    pub from_turn: Turn,
    pub to_turn: Turn,
    pub completed_campaigns: Vec<CampaignId>,
    pub enacted_policies: Vec<PolicyId>,
    pub rejected_policies: Vec<PolicyId>,
    pub superseded_policies: Vec<PolicyId>,
    pub completed_elections: Vec<ElectionId>,
    pub players_reset: usize,
    pub turn_started_at: DateTime<Utc>,
    pub turn_ends_at: DateTime<Utc>,
}

/// What the end-of-turn pipeline may touch. The append-only logs are kept
/// by length only, so taking one costs nothing per past turn.
struct Checkpoint {
    session: Session,
    players: BTreeMap<PlayerId, Player>,
    parties: BTreeMap<PartyId, Party>,
    campaigns: BTreeMap<CampaignId, Campaign>,
    policies: BTreeMap<PolicyId, Policy>,
    elections: BTreeMap<ElectionId, Election>,
    offices: BTreeMap<OfficeId, Office>,
    economy: Economy,
    ids: IdAllocator,
    rng: ChaCha8Rng,
    reputation: Savepoint,
    actions: usize,
    endorsements: usize,
    articles: usize,
    discoveries: usize,
}

impl SessionState {
    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            session: self.session.clone(),
            players: self.players.clone(),
            parties: self.parties.clone(),
            campaigns: self.campaigns.clone(),
            policies: self.policies.clone(),
            elections: self.elections.clone(),
            offices: self.offices.clone(),
            economy: self.economy.clone(),
            ids: self.ids.clone(),
            rng: self.rng.clone(),
            reputation: self.reputation.savepoint(),
            actions: self.action_log.len(),
            endorsements: self.endorsements.len(),
            articles: self.articles.len(),
            discoveries: self.discoveries.len(),
        }
    }

    fn rollback(&mut self, c: Checkpoint) {
        self.session = c.session;
        self.players = c.players;
        self.parties = c.parties;
        self.campaigns = c.campaigns;
        self.policies = c.policies;
        self.elections = c.elections;
        self.offices = c.offices;
        self.economy = c.economy;
        self.ids = c.ids;
        self.rng = c.rng;
        self.reputation.rollback(c.reputation);
        self.action_log.truncate(c.actions);
        self.endorsements.truncate(c.endorsements);
        self.articles.truncate(c.articles);
        self.discoveries.truncate(c.discoveries);
    }

    fn cadence(&self) -> Result<Duration, SimError> {
        Duration::from_std(std::time::Duration::from_secs(self.config.turn_cadence_secs))
            .map_err(|_| SimError::invalid_state("turn cadence out of range"))
    }

    /// Stamp the current turn as starting now and ending one cadence later.
    pub(crate) fn stamp_turn(&mut self) -> Result<(DateTime<Utc>, DateTime<Utc>), SimError> {
        let start = self.now();
        let end = start
            .checked_add_signed(self.cadence()?)
            .ok_or_else(|| SimError::invalid_state("turn end out of range"))?;
        self.session.turn_started_at = Some(start);
        self.session.turn_ends_at = Some(end);
        Ok((start, end))
    }

    /// `Uninitialized -> Running` at turn 0 with fresh AP for everyone.
    pub fn initialize(&mut self, in_game_start: Option<NaiveDate>) -> Result<(), SimError> {
        if self.session.status != SessionStatus::Uninitialized {
            return Err(SimError::invalid_state(format!(
                "session {} is already {:?}",
                self.session.id, self.session.status
            )));
        }
        self.stamp_turn()?;
        self.session.current_turn = 0;
        self.session.in_game_start = in_game_start;
        self.session.status = SessionStatus::Running;
        self.reset_all();
        info!(session = %self.session.id, "session initialized");
        Ok(())
    }

    pub(crate) fn set_paused(&mut self) -> Result<(), SimError> {
        if self.session.status != SessionStatus::Running {
            return Err(SimError::invalid_state(format!(
                "cannot pause a {:?} session",
                self.session.status
            )));
        }
        self.session.status = SessionStatus::Paused;
        Ok(())
    }

    /// `Paused -> Running`. The current turn gets a full cadence from now.
    pub(crate) fn set_resumed(&mut self) -> Result<(), SimError> {
        if self.session.status != SessionStatus::Paused {
            return Err(SimError::invalid_state(format!(
                "cannot resume a {:?} session",
                self.session.status
            )));
        }
        let end = self
            .now()
            .checked_add_signed(self.cadence()?)
            .ok_or_else(|| SimError::invalid_state("turn end out of range"))?;
        self.session.turn_ends_at = Some(end);
        self.session.status = SessionStatus::Running;
        Ok(())
    }

    pub(crate) fn set_archived(&mut self) -> Result<(), SimError> {
        if self.session.status == SessionStatus::Archived {
            return Err(SimError::invalid_state("session is already archived"));
        }
        self.session.status = SessionStatus::Archived;
        Ok(())
    }

    /// Run the end-of-turn pipeline as one step: either every stage applies
    /// or, on error, the state is left exactly as it was.
    pub fn advance_turn(&mut self) -> Result<TurnReport, SimError> {
        match self.session.status {
            SessionStatus::Running | SessionStatus::Paused => {}
            other => {
                return Err(SimError::invalid_state(format!(
                    "cannot advance a {other:?} session"
                )))
            }
        }
        let checkpoint = self.checkpoint();
        match self.run_pipeline() {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!(session = %self.session.id, error = %e, "turn pipeline failed, rolling back");
                self.rollback(checkpoint);
                Err(e)
            }
        }
    }

    fn run_pipeline(&mut self) -> Result<TurnReport, SimError> {
        let from_turn = self.session.current_turn;
        let completed_campaigns = self.resolve_campaigns()?;
        let policies = self.close_due_policies()?;
        let completed_elections = self.close_due_elections()?;
        let players_reset = self.reset_all();
        self.session.current_turn = from_turn + 1;
        let (turn_started_at, turn_ends_at) = self.stamp_turn()?;

        let report = TurnReport {
            session: self.session.id,
            from_turn,
            to_turn: self.session.current_turn,
            completed_campaigns,
            enacted_policies: policies.enacted,
            rejected_policies: policies.rejected,
            superseded_policies: policies.superseded,
            completed_elections,
            players_reset,
            turn_started_at,
            turn_ends_at,
        };
        info!(
            session = %report.session,
            turn = report.to_turn,
            campaigns = report.completed_campaigns.len(),
            enacted = report.enacted_policies.len(),
            rejected = report.rejected_policies.len(),
            elections = report.completed_elections.len(),
            "turn advanced"
        );
        Ok(report)
    }
}
