//! Per-session state. Every lifecycle lives in an `impl SessionState` block
//! of its own module; this file holds construction, snapshots and the
//! shared lookups.

use chrono::{DateTime, Utc};
use rand_chacha::ChaCha8Rng;
use sim_core::{
    validate_config, validate_player, validate_registry, ActionRecord, Campaign, CampaignId,
    DemographicSlice, Discovery, Economy, Election, ElectionId, Endorsement, GameConfig,
    IdAllocator, NewsArticle, Office, OfficeId, Party, PartyId, Player, PlayerId, Policy,
    PolicyId, ReputationChange, ReputationScore, Session, SessionId, SessionSnapshot,
    SessionStatus, SimError, SliceId, Source, SourceKind, ValidationError, REPUTATION_MAX,
    REPUTATION_MIN,
};
use sim_reputation::{PropagationEngine, ReputationStore};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::clock::Clock;
use crate::legislature::Legislature;

/// Everything needed to create a session.
#[derive(Clone, Debug)]
pub struct SessionSetup {
    pub name: String,
    pub gamemaster: PlayerId,
    pub config: GameConfig,
    /// Whether the wall-clock timer drives turn boundaries once initialized.
    pub auto_advance: bool,
    pub players: Vec<Player>,
    pub slices: Vec<DemographicSlice>,
    pub parties: Vec<Party>,
    pub offices: Vec<Office>,
    /// Starting standings; everything else starts neutral.
    pub reputations: Vec<ReputationScore>,
}

impl SessionSetup {
    pub fn new(name: impl Into<String>, gamemaster: PlayerId) -> Self {
        Self {
            name: name.into(),
            gamemaster,
            config: GameConfig::default(),
            auto_advance: false,
            players: Vec::new(),
            slices: Vec::new(),
            parties: Vec::new(),
            offices: Vec::new(),
            reputations: Vec::new(),
        }
    }
}

/// The mutable state of one session. Owned by its [`crate::SessionHandle`],
/// which serializes every access.
#[derive(Clone, Debug)]
pub struct SessionState {
    pub(crate) session: Session,
    pub(crate) config: GameConfig,
    pub(crate) players: BTreeMap<PlayerId, Player>,
    pub(crate) parties: BTreeMap<PartyId, Party>,
    pub(crate) slices: Vec<DemographicSlice>,
    pub(crate) reputation: ReputationStore,
    pub(crate) engine: PropagationEngine,
    pub(crate) action_log: Vec<ActionRecord>,
    pub(crate) campaigns: BTreeMap<CampaignId, Campaign>,
    pub(crate) policies: BTreeMap<PolicyId, Policy>,
    pub(crate) elections: BTreeMap<ElectionId, Election>,
    pub(crate) offices: BTreeMap<OfficeId, Office>,
    pub(crate) endorsements: Vec<Endorsement>,
    pub(crate) articles: Vec<NewsArticle>,
    pub(crate) discoveries: Vec<Discovery>,
    pub(crate) economy: Economy,
    pub(crate) legislature: Legislature,
    pub(crate) ids: IdAllocator,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) clock: Arc<dyn Clock>,
}

fn index_unique<K: Ord + Copy + Into<u64>, V>(
    kind: &'static str,
    items: Vec<V>,
    key: impl Fn(&V) -> K,
) -> Result<BTreeMap<K, V>, ValidationError> {
    let mut out = BTreeMap::new();
    for item in items {
        let k = key(&item);
        if out.insert(k, item).is_some() {
            return Err(ValidationError::DuplicateId {
                kind,
                id: k.into(),
            });
        }
    }
    Ok(out)
}

fn dangling(kind: &'static str, id: impl Into<u64>) -> ValidationError {
    ValidationError::DanglingReference {
        kind,
        id: id.into(),
    }
}

impl SessionState {
    /// Validate a setup and build the initial (uninitialized) state.
    pub fn new(id: SessionId, setup: SessionSetup, clock: Arc<dyn Clock>) -> Result<Self, SimError> {
        let SessionSetup {
            name,
            gamemaster,
            config,
            auto_advance,
            players,
            slices,
            parties,
            offices,
            reputations,
        } = setup;

        if name.trim().is_empty() {
            return Err(ValidationError::EmptyField("session.name").into());
        }
        validate_config(&config)?;
        validate_registry(&slices)?;
        for p in &players {
            validate_player(p, &config)?;
        }
        let players = index_unique("player", players, |p| p.id)?;
        let parties = index_unique("party", parties, |p| p.id)?;
        let offices = index_unique("office", offices, |o| o.id)?;
        if !players.contains_key(&gamemaster) {
            return Err(dangling("player", gamemaster).into());
        }

        for p in players.values() {
            if let Some(office) = p.office {
                if !offices.contains_key(&office) {
                    return Err(dangling("office", office).into());
                }
            }
            if let Some(party) = p.party {
                let member = parties.get(&party).map_or(false, |pt| pt.members.contains(&p.id));
                if !member {
                    return Err(dangling("party", party).into());
                }
            }
        }
        for party in parties.values() {
            if party.name.trim().is_empty() {
                return Err(ValidationError::EmptyField("party.name").into());
            }
            if party.treasury < rust_decimal::Decimal::ZERO {
                return Err(ValidationError::NegativeMoney.into());
            }
            for m in party.members.iter().chain(party.leader.iter()) {
                if players.get(m).and_then(|p| p.party) != Some(party.id) {
                    return Err(dangling("player", *m).into());
                }
            }
        }
        for o in offices.values() {
            if let Some(holder) = o.holder {
                if players.get(&holder).and_then(|p| p.office) != Some(o.id) {
                    return Err(dangling("player", holder).into());
                }
            }
        }

        let slice_ids: BTreeSet<SliceId> = slices.iter().map(|s| s.id).collect();
        for r in &reputations {
            if !players.contains_key(&r.player) {
                return Err(dangling("player", r.player).into());
            }
            if !slice_ids.contains(&r.slice) {
                return Err(dangling("slice", r.slice).into());
            }
            if !r.score.is_finite() || !(REPUTATION_MIN..=REPUTATION_MAX).contains(&r.score) {
                return Err(ValidationError::InvalidRange("reputation.score").into());
            }
        }

        let floor = players
            .keys()
            .map(|k| k.0)
            .chain(parties.keys().map(|k| k.0))
            .chain(offices.keys().map(|k| k.0))
            .chain(slice_ids.iter().map(|k| k.0))
            .max()
            .unwrap_or(0);

        let legislature = Legislature::apportion(&slices, &config.legislature);
        let engine = PropagationEngine::from_config(&config);
        let rng = sim_ai::session_rng(config.rng_seed);
        Ok(Self {
            session: Session {
                id,
                name,
                gamemaster,
                status: SessionStatus::Uninitialized,
                current_turn: 0,
                auto_advance,
                in_game_start: None,
                turn_started_at: None,
                turn_ends_at: None,
            },
            config,
            players,
            parties,
            slices,
            reputation: ReputationStore::from_parts(reputations, Vec::new()),
            engine,
            action_log: Vec::new(),
            campaigns: BTreeMap::new(),
            policies: BTreeMap::new(),
            elections: BTreeMap::new(),
            offices,
            endorsements: Vec::new(),
            articles: Vec::new(),
            discoveries: Vec::new(),
            economy: Economy::default(),
            legislature,
            ids: IdAllocator::starting_after(floor),
            rng,
            clock,
        })
    }

    /// Rebuild from a stored snapshot and its two append-only logs. The RNG
    /// is reseeded from the configured seed and the restored turn.
    pub fn from_snapshot(
        snapshot: SessionSnapshot,
        action_log: Vec<ActionRecord>,
        reputation_log: Vec<ReputationChange>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SimError> {
        validate_config(&snapshot.config)?;
        let config = snapshot.config;
        let seed = config.rng_seed ^ snapshot.session.current_turn.rotate_left(32);
        Ok(Self {
            legislature: Legislature::apportion(&snapshot.slices, &config.legislature),
            engine: PropagationEngine::from_config(&config),
            rng: sim_ai::session_rng(seed),
            session: snapshot.session,
            players: index_unique("player", snapshot.players, |p| p.id)?,
            parties: index_unique("party", snapshot.parties, |p| p.id)?,
            slices: snapshot.slices,
            reputation: ReputationStore::from_parts(snapshot.reputations, reputation_log),
            action_log,
            campaigns: index_unique("campaign", snapshot.campaigns, |c| c.id)?,
            policies: index_unique("policy", snapshot.policies, |p| p.id)?,
            elections: index_unique("election", snapshot.elections, |e| e.id)?,
            offices: index_unique("office", snapshot.offices, |o| o.id)?,
            endorsements: snapshot.endorsements,
            articles: snapshot.articles,
            discoveries: snapshot.discoveries,
            economy: snapshot.economy,
            ids: snapshot.ids,
            config,
            clock,
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session: self.session.clone(),
            config: self.config.clone(),
            players: self.players.values().cloned().collect(),
            parties: self.parties.values().cloned().collect(),
            slices: self.slices.clone(),
            reputations: self.reputation.score_rows(),
            campaigns: self.campaigns.values().cloned().collect(),
            policies: self.policies.values().cloned().collect(),
            elections: self.elections.values().cloned().collect(),
            offices: self.offices.values().cloned().collect(),
            endorsements: self.endorsements.clone(),
            articles: self.articles.clone(),
            discoveries: self.discoveries.clone(),
            economy: self.economy.clone(),
            ids: self.ids.clone(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn current_turn(&self) -> u64 {
        self.session.current_turn
    }

    pub fn player(&self, id: PlayerId) -> Result<&Player, SimError> {
        self.players
            .get(&id)
            .ok_or_else(|| SimError::not_found("player", id))
    }

    pub(crate) fn player_mut(&mut self, id: PlayerId) -> Result<&mut Player, SimError> {
        self.players
            .get_mut(&id)
            .ok_or_else(|| SimError::not_found("player", id))
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> + '_ {
        self.players.values()
    }

    pub fn slices(&self) -> &[DemographicSlice] {
        &self.slices
    }

    pub fn reputation(&self) -> &ReputationStore {
        &self.reputation
    }

    pub fn action_log(&self) -> &[ActionRecord] {
        &self.action_log
    }

    pub fn campaign(&self, id: CampaignId) -> Result<&Campaign, SimError> {
        self.campaigns
            .get(&id)
            .ok_or_else(|| SimError::not_found("campaign", id))
    }

    pub fn campaigns(&self) -> impl Iterator<Item = &Campaign> + '_ {
        self.campaigns.values()
    }

    pub fn policy(&self, id: PolicyId) -> Result<&Policy, SimError> {
        self.policies
            .get(&id)
            .ok_or_else(|| SimError::not_found("policy", id))
    }

    pub fn election(&self, id: ElectionId) -> Result<&Election, SimError> {
        self.elections
            .get(&id)
            .ok_or_else(|| SimError::not_found("election", id))
    }

    pub fn office(&self, id: OfficeId) -> Result<&Office, SimError> {
        self.offices
            .get(&id)
            .ok_or_else(|| SimError::not_found("office", id))
    }

    pub fn offices(&self) -> impl Iterator<Item = &Office> + '_ {
        self.offices.values()
    }

    pub fn party(&self, id: PartyId) -> Result<&Party, SimError> {
        self.parties
            .get(&id)
            .ok_or_else(|| SimError::not_found("party", id))
    }

    pub fn endorsements(&self) -> &[Endorsement] {
        &self.endorsements
    }

    pub fn articles(&self) -> &[NewsArticle] {
        &self.articles
    }

    pub fn discoveries(&self) -> &[Discovery] {
        &self.discoveries
    }

    pub fn economy(&self) -> &Economy {
        &self.economy
    }

    pub fn legislature(&self) -> &Legislature {
        &self.legislature
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn next_id(&mut self) -> u64 {
        self.ids.next_raw()
    }

    pub(crate) fn source(&self, kind: SourceKind, id: impl Into<u64>) -> Source {
        Source::new(kind, id, self.session.current_turn)
    }

    /// Player actions are accepted while the session is running or paused.
    pub(crate) fn ensure_active(&self) -> Result<(), SimError> {
        match self.session.status {
            SessionStatus::Running | SessionStatus::Paused => Ok(()),
            SessionStatus::Uninitialized => {
                Err(SimError::invalid_state("session has not been initialized"))
            }
            SessionStatus::Archived => Err(SimError::invalid_state("session is archived")),
        }
    }

    pub(crate) fn require_gamemaster(&self, caller: PlayerId) -> Result<(), SimError> {
        if caller == self.session.gamemaster {
            Ok(())
        } else {
            Err(SimError::unauthorized(format!(
                "player {caller} is not the gamemaster"
            )))
        }
    }

    pub(crate) fn require_province(&self, province: &str) -> Result<(), SimError> {
        if self.slices.iter().any(|s| s.province == province) {
            Ok(())
        } else {
            Err(SimError::invalid_state(format!("unknown province {province}")))
        }
    }

    pub(crate) fn require_slice(&self, slice: SliceId) -> Result<&DemographicSlice, SimError> {
        self.slices
            .iter()
            .find(|s| s.id == slice)
            .ok_or_else(|| SimError::not_found("slice", slice))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    pub const GM: PlayerId = PlayerId(1);
    pub const ALICE: PlayerId = PlayerId(2);
    pub const BOB: PlayerId = PlayerId(3);
    pub const CARA: PlayerId = PlayerId(4);

    pub fn slice(id: u64, province: &str, occupation: &str, population: u64) -> DemographicSlice {
        DemographicSlice {
            id: SliceId(id),
            occupation: occupation.into(),
            class: "working".into(),
            ethnicity: "plains".into(),
            religion: "none".into(),
            province: province.into(),
            settlement: "rural".into(),
            can_vote: true,
            population,
        }
    }

    pub fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        ))
    }

    pub fn setup() -> SessionSetup {
        let mut setup = SessionSetup::new("test", GM);
        for (id, name) in [(GM, "gm"), (ALICE, "alice"), (BOB, "bob"), (CARA, "cara")] {
            setup
                .players
                .push(Player::new(id, name, Decimal::new(5_000, 0)));
        }
        setup.slices = vec![
            slice(10, "Avel", "farmer", 1_000),
            slice(11, "Avel", "miner", 500),
            slice(12, "Brem", "farmer", 2_000),
        ];
        setup
    }

    /// Initialized state at turn 0 with every player holding base AP.
    pub fn running(setup: SessionSetup) -> SessionState {
        let mut state = SessionState::new(SessionId(1), setup, clock()).unwrap();
        state.initialize(None).unwrap();
        state
    }
}
