//! Tunable game parameters. Every field has a default so partial YAML files
//! deserialize cleanly.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ValidationError;

/// Top-level configuration consumed by a session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GameConfig {
    /// Action points every player receives at each turn boundary.
    pub base_action_points: u32,
    /// Hard ceiling on a balance; grants saturate here.
    pub max_action_points: u32,
    /// Wall-clock length of one turn in seconds.
    pub turn_cadence_secs: u64,
    /// Seed for the session RNG (electorate variance, party campaigns, discovery).
    pub rng_seed: u64,
    /// Upper bound on a text-analysis call.
    pub analysis_timeout_ms: u64,
    pub costs: ActionCosts,
    pub policy: PolicyConfig,
    pub legislature: LegislatureConfig,
    pub campaign: CampaignConfig,
    pub election: ElectionConfig,
    pub endorsement: EndorsementConfig,
    pub discovery: DiscoveryConfig,
    pub party: PartyConfig,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            base_action_points: 5,
            max_action_points: 10,
            turn_cadence_secs: 24 * 60 * 60,
            rng_seed: 42,
            analysis_timeout_ms: 5_000,
            costs: ActionCosts::default(),
            policy: PolicyConfig::default(),
            legislature: LegislatureConfig::default(),
            campaign: CampaignConfig::default(),
            election: ElectionConfig::default(),
            endorsement: EndorsementConfig::default(),
            discovery: DiscoveryConfig::default(),
            party: PartyConfig::default(),
        }
    }
}

/// AP cost per action. Zero marks a free action that bypasses the ledger.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ActionCosts {
    pub endorse: u32,
    pub campaign: u32,
    pub party_campaign: u32,
    pub submit_policy: u32,
    pub vote_policy: u32,
    pub declare_candidacy: u32,
    pub fund_candidate: u32,
    pub vote_election: u32,
    pub publish_news: u32,
    pub prospect: u32,
    pub create_party: u32,
    pub join_party: u32,
    pub leave_party: u32,
    pub fundraise: u32,
}

impl Default for ActionCosts {
    fn default() -> Self {
        Self {
            endorse: 1,
            campaign: 1,
            party_campaign: 1,
            submit_policy: 1,
            vote_policy: 0,
            declare_candidacy: 1,
            fund_candidate: 1,
            vote_election: 0,
            publish_news: 1,
            prospect: 1,
            create_party: 1,
            join_party: 0,
            leave_party: 0,
            fundraise: 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    /// When false, submission is free and `costs.submit_policy` is ignored.
    pub charge_submission: bool,
    /// Turns a proposal stays open before the boundary decides it.
    pub voting_turns: u64,
    /// Fraction of the policy's reputation impact a yes voter receives.
    pub yes_vote_weight: f64,
    /// Fraction of the inverted impact a no voter receives.
    pub no_vote_weight: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            charge_submission: true,
            voting_turns: 3,
            yes_vote_weight: 0.5,
            no_vote_weight: 0.5,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LegislatureConfig {
    pub lower_house_seats: u32,
    pub population_per_lower_seat: u64,
    pub upper_seats_per_province: u32,
}

impl Default for LegislatureConfig {
    fn default() -> Self {
        Self {
            lower_house_seats: 35,
            population_per_lower_seat: 815,
            upper_seats_per_province: 2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CampaignConfig {
    /// Cash cost per campaign turn.
    pub base_cost: Decimal,
    /// Inclusive turn range for campaign length.
    pub duration_range: (u64, u64),
    /// Inclusive reputation boost range.
    pub boost_range: (f64, f64),
    /// Slices targeted by one party campaign.
    pub party_slices: usize,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            base_cost: Decimal::new(500, 0),
            duration_range: (1, 3),
            boost_range: (2.0, 6.0),
            party_slices: 3,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ElectionConfig {
    pub voting_turns: u64,
    /// Share of the eligible province population that turns out as simulated voters.
    pub turnout: f64,
    /// Per-candidate multiplicative variance on simulated votes, in [0, 1).
    pub variance: f64,
    pub term_turns: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            voting_turns: 2,
            turnout: 0.6,
            variance: 0.2,
            term_turns: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndorsementConfig {
    /// Transfer conferred by an endorser at the top of the reputation scale.
    pub max_transfer: f64,
}

impl Default for EndorsementConfig {
    fn default() -> Self {
        Self { max_transfer: 5.0 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub base_probability: f64,
    /// Multipliers keyed by technology name; unknown technologies count as 1.0.
    pub technology_modifiers: BTreeMap<String, f64>,
    pub reward: Decimal,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let mut technology_modifiers = BTreeMap::new();
        technology_modifiers.insert("survey".to_string(), 1.5);
        technology_modifiers.insert("seismic".to_string(), 2.5);
        Self {
            base_probability: 0.1,
            technology_modifiers,
            reward: Decimal::new(2_000, 0),
        }
    }
}

impl DiscoveryConfig {
    /// Success probability for a prospect with the given technology.
    pub fn probability(&self, technology: Option<&str>) -> f64 {
        let modifier = technology
            .and_then(|t| self.technology_modifiers.get(t).copied())
            .unwrap_or(1.0);
        (self.base_probability * modifier).clamp(0.0, 1.0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PartyConfig {
    pub fundraising_amount: Decimal,
    pub leader_bonus_ap: u32,
}

impl Default for PartyConfig {
    fn default() -> Self {
        Self {
            fundraising_amount: Decimal::new(1_000, 0),
            leader_bonus_ap: 2,
        }
    }
}

/// Validate configuration ranges and cross-field consistency.
pub fn validate_config(cfg: &GameConfig) -> Result<(), ValidationError> {
    if cfg.base_action_points > cfg.max_action_points {
        return Err(ValidationError::ActionPointCeiling {
            base: cfg.base_action_points,
            max: cfg.max_action_points,
        });
    }
    if cfg.turn_cadence_secs == 0 {
        return Err(ValidationError::ZeroCadence);
    }
    let (dmin, dmax) = cfg.campaign.duration_range;
    if dmin == 0 || dmin > dmax {
        return Err(ValidationError::InvalidRange("campaign.duration_range"));
    }
    let (bmin, bmax) = cfg.campaign.boost_range;
    if !(bmin.is_finite() && bmax.is_finite()) || bmin > bmax {
        return Err(ValidationError::InvalidRange("campaign.boost_range"));
    }
    if cfg.campaign.base_cost < Decimal::ZERO
        || cfg.discovery.reward < Decimal::ZERO
        || cfg.party.fundraising_amount < Decimal::ZERO
    {
        return Err(ValidationError::NegativeMoney);
    }
    if !(0.0..1.0).contains(&cfg.election.variance) {
        return Err(ValidationError::InvalidRange("election.variance"));
    }
    if !(0.0..=1.0).contains(&cfg.election.turnout) {
        return Err(ValidationError::InvalidRange("election.turnout"));
    }
    if !(0.0..=1.0).contains(&cfg.discovery.base_probability)
        || cfg.discovery.technology_modifiers.values().any(|m| !m.is_finite() || *m < 0.0)
    {
        return Err(ValidationError::InvalidRange("discovery"));
    }
    for w in [cfg.policy.yes_vote_weight, cfg.policy.no_vote_weight] {
        if !w.is_finite() || w < 0.0 {
            return Err(ValidationError::NonFinite);
        }
    }
    if !cfg.endorsement.max_transfer.is_finite() || cfg.endorsement.max_transfer < 0.0 {
        return Err(ValidationError::NonFinite);
    }
    if cfg.legislature.population_per_lower_seat == 0 {
        return Err(ValidationError::InvalidRange("legislature.population_per_lower_seat"));
    }
    Ok(())
}
