#![deny(warnings)]

//! Reputation propagation: the per-(player, slice) score store and the pure
//! transfer functions that turn actions into score deltas.
//!
//! This module provides validated utilities for:
//! - Translating an actor's standing with a slice into a transfer magnitude
//! - Endorsement transfers across the full demographic registry
//! - Policy impacts weighted by the player's role (proposer or voter)
//! - Population-weighted impact previews
//!
//! All computation is deterministic, so preview and apply paths agree.

use serde::{Deserialize, Serialize};
use sim_core::{
    DemographicSlice, GameConfig, Impact, PlayerId, ReputationChange, ReputationScore, SimError,
    SliceId, SliceTransfer, Source, ValidationError, REPUTATION_MAX, REPUTATION_MIN,
};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Errors produced by the propagation engine.
#[derive(Debug, Error, PartialEq)]
pub enum PropagationError {
    /// Deltas must be finite.
    #[error("non-finite reputation delta: {0}")]
    NonFinite(f64),
}

impl From<PropagationError> for SimError {
    fn from(e: PropagationError) -> Self {
        match e {
            PropagationError::NonFinite(_) => SimError::Validation(ValidationError::NonFinite),
        }
    }
}

/// Free-form key/value context stored with a change.
pub type Metadata = BTreeMap<String, String>;

/// Scores keyed by (player, slice) plus the provenance log of every change.
#[derive(Clone, Debug, Default)]
pub struct ReputationStore {
    scores: BTreeMap<(PlayerId, SliceId), ReputationScore>,
    log: Vec<ReputationChange>,
}

/// Restore point taken by [`ReputationStore::savepoint`]. The log is
/// append-only, so only its length is kept.
#[derive(Clone, Debug)]
pub struct Savepoint {
    scores: BTreeMap<(PlayerId, SliceId), ReputationScore>,
    log_len: usize,
}

impl ReputationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted rows.
    pub fn from_parts(scores: Vec<ReputationScore>, log: Vec<ReputationChange>) -> Self {
        let scores = scores
            .into_iter()
            .map(|s| ((s.player, s.slice), s))
            .collect();
        Self { scores, log }
    }

    /// Score rows, in key order. The change log is persisted separately,
    /// see [`ReputationStore::log`].
    pub fn score_rows(&self) -> Vec<ReputationScore> {
        self.scores.values().cloned().collect()
    }

    /// Capture the scores and the current log length.
    pub fn savepoint(&self) -> Savepoint {
        Savepoint {
            scores: self.scores.clone(),
            log_len: self.log.len(),
        }
    }

    /// Return to `savepoint`, dropping every change logged since.
    pub fn rollback(&mut self, savepoint: Savepoint) {
        self.scores = savepoint.scores;
        self.log.truncate(savepoint.log_len);
    }

    /// Current score; a missing entry is neutral (0).
    pub fn score(&self, player: PlayerId, slice: SliceId) -> f64 {
        self.scores
            .get(&(player, slice))
            .map(|s| s.score)
            .unwrap_or(0.0)
    }

    pub fn get(&self, player: PlayerId, slice: SliceId) -> Option<&ReputationScore> {
        self.scores.get(&(player, slice))
    }

    /// Create or update a score and record its provenance.
    ///
    /// A zero delta is a no-op and returns `Ok(None)`: nothing is created and
    /// nothing is logged. Scores are clamped to the reputation bounds.
    pub fn apply_change(
        &mut self,
        player: PlayerId,
        slice: SliceId,
        delta: f64,
        source: Source,
        metadata: Metadata,
    ) -> Result<Option<ReputationChange>, PropagationError> {
        if !delta.is_finite() {
            return Err(PropagationError::NonFinite(delta));
        }
        if delta == 0.0 {
            return Ok(None);
        }
        let entry = self
            .scores
            .entry((player, slice))
            .or_insert_with(|| ReputationScore {
                player,
                slice,
                score: 0.0,
                updated_turn: source.turn,
            });
        let previous = entry.score;
        entry.score = (previous + delta).clamp(REPUTATION_MIN, REPUTATION_MAX);
        entry.updated_turn = source.turn;
        let change = ReputationChange {
            player,
            slice,
            delta,
            previous,
            current: entry.score,
            source,
            metadata,
        };
        self.log.push(change.clone());
        Ok(Some(change))
    }

    pub fn log(&self) -> &[ReputationChange] {
        &self.log
    }

    /// Changes received by one player, oldest first.
    pub fn history(&self, player: PlayerId) -> Vec<&ReputationChange> {
        self.log.iter().filter(|c| c.player == player).collect()
    }

    /// Changes traced to one source.
    pub fn changes_from(&self, source: Source) -> Vec<&ReputationChange> {
        self.log.iter().filter(|c| c.source == source).collect()
    }
}

/// Role of a player relative to a policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyRole {
    Proposer,
    YesVoter,
    NoVoter,
    Abstainer,
}

/// One row of a population-weighted preview.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImpactPreview {
    pub slice: SliceId,
    pub province: String,
    pub population: u64,
    pub delta: f64,
    /// `population * delta`.
    pub weighted: f64,
}

/// Transfer parameters, taken from the game config.
#[derive(Clone, Debug, PartialEq)]
pub struct PropagationEngine {
    max_transfer: f64,
    yes_weight: f64,
    no_weight: f64,
}

impl PropagationEngine {
    pub fn new(max_transfer: f64, yes_weight: f64, no_weight: f64) -> Self {
        Self {
            max_transfer,
            yes_weight,
            no_weight,
        }
    }

    pub fn from_config(cfg: &GameConfig) -> Self {
        Self::new(
            cfg.endorsement.max_transfer,
            cfg.policy.yes_vote_weight,
            cfg.policy.no_vote_weight,
        )
    }

    /// Magnitude conferred by an actor holding `source_reputation` with a slice.
    ///
    /// Odd and strictly increasing on [-100, 100]:
    /// `max * x * (0.5 + 0.5 * |x|)` with `x = r / 100`. Neutral standing
    /// transfers nothing, the top of the scale transfers `max`, and disliked
    /// actors pass on a negative transfer. Non-finite input yields 0.
    pub fn transfer_rate(&self, source_reputation: f64) -> f64 {
        if !source_reputation.is_finite() {
            return 0.0;
        }
        let x = source_reputation.clamp(REPUTATION_MIN, REPUTATION_MAX) / REPUTATION_MAX;
        self.max_transfer * x * (0.5 + 0.5 * x.abs())
    }

    /// Transfers an endorsement from `endorser` would confer, one per slice in
    /// registry order, zero-magnitude entries included.
    pub fn endorsement_transfers(
        &self,
        store: &ReputationStore,
        slices: &[DemographicSlice],
        endorser: PlayerId,
    ) -> Vec<SliceTransfer> {
        slices
            .iter()
            .map(|s| SliceTransfer {
                slice: s.id,
                delta: self.transfer_rate(store.score(endorser, s.id)),
            })
            .collect()
    }

    /// Reputation transfers a policy confers on a player in `role`.
    ///
    /// Proposers receive the full impact, yes voters a share, no voters the
    /// inverted share; abstainers and non-reputation impacts yield nothing.
    pub fn policy_transfers(&self, impacts: &[Impact], role: PolicyRole) -> Vec<SliceTransfer> {
        let weight = match role {
            PolicyRole::Proposer => 1.0,
            PolicyRole::YesVoter => self.yes_weight,
            PolicyRole::NoVoter => -self.no_weight,
            PolicyRole::Abstainer => return Vec::new(),
        };
        let mut out = Vec::new();
        for impact in impacts {
            match impact {
                Impact::Reputation { slice, delta } => out.push(SliceTransfer {
                    slice: *slice,
                    delta: delta * weight,
                }),
                Impact::Gdp { .. } | Impact::ResourcePrice { .. } => {}
            }
        }
        out
    }

    /// Apply transfers to `target`, skipping zero deltas, and return the
    /// persisted changes.
    pub fn apply_transfers(
        &self,
        store: &mut ReputationStore,
        target: PlayerId,
        transfers: &[SliceTransfer],
        source: Source,
        metadata: &Metadata,
    ) -> Result<Vec<ReputationChange>, PropagationError> {
        let mut applied = Vec::with_capacity(transfers.len());
        for t in transfers {
            if let Some(change) =
                store.apply_change(target, t.slice, t.delta, source, metadata.clone())?
            {
                applied.push(change);
            }
        }
        debug!(
            player = %target,
            kind = ?source.kind,
            source_id = source.id,
            applied = applied.len(),
            skipped = transfers.len() - applied.len(),
            "reputation transfers applied"
        );
        Ok(applied)
    }

    /// Population-weighted preview sorted by `|population * delta|`, largest
    /// first; ties keep slice id order. Transfers naming unknown slices are
    /// dropped.
    pub fn impact_preview(
        &self,
        slices: &[DemographicSlice],
        transfers: &[SliceTransfer],
    ) -> Vec<ImpactPreview> {
        let by_id: BTreeMap<SliceId, &DemographicSlice> =
            slices.iter().map(|s| (s.id, s)).collect();
        let mut rows: Vec<ImpactPreview> = transfers
            .iter()
            .filter_map(|t| {
                by_id.get(&t.slice).map(|s| ImpactPreview {
                    slice: s.id,
                    province: s.province.clone(),
                    population: s.population,
                    delta: t.delta,
                    weighted: s.population as f64 * t.delta,
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            b.weighted
                .abs()
                .total_cmp(&a.weighted.abs())
                .then(a.slice.cmp(&b.slice))
        });
        rows
    }
}

/// Sum of population-weighted deltas across a preview.
pub fn population_weighted_total(rows: &[ImpactPreview]) -> f64 {
    rows.iter().map(|r| r.weighted).sum()
}
