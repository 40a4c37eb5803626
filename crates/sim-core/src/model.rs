//! Serializable entities of one session.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{ActionCosts, GameConfig};
use crate::ids::*;

/// A human participant.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    /// Personal cash (>= 0).
    pub cash: Decimal,
    /// Action points left this turn, within `[0, max_action_points]`.
    pub actions_remaining: u32,
    /// Free-form profession label, e.g. "journalist".
    pub profession: Option<String>,
    /// Office currently held, if any.
    pub office: Option<OfficeId>,
    /// Set while standing in an election.
    pub is_candidate: bool,
    pub party: Option<PartyId>,
    /// Name of an owned company.
    pub company: Option<String>,
    /// Name of an owned newspaper; required to publish news.
    pub newspaper: Option<String>,
    /// One entry per election stood in.
    pub election_history: Vec<ElectionRecord>,
}

impl Player {
    pub fn new(id: PlayerId, name: impl Into<String>, cash: Decimal) -> Self {
        Self {
            id,
            name: name.into(),
            cash,
            actions_remaining: 0,
            profession: None,
            office: None,
            is_candidate: false,
            party: None,
            company: None,
            newspaper: None,
            election_history: Vec::new(),
        }
    }
}

/// Outcome of one election for one candidate.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ElectionRecord {
    pub election: ElectionId,
    pub office: OfficeId,
    pub turn: Turn,
    pub won: bool,
    pub votes: u64,
}

/// Scheduler state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Uninitialized,
    Running,
    Paused,
    /// Terminal.
    Archived,
}

/// One game instance.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub gamemaster: PlayerId,
    pub status: SessionStatus,
    /// Strictly non-decreasing.
    pub current_turn: Turn,
    /// Whether the wall-clock timer drives turn boundaries.
    pub auto_advance: bool,
    pub in_game_start: Option<NaiveDate>,
    pub turn_started_at: Option<DateTime<Utc>>,
    pub turn_ends_at: Option<DateTime<Utc>>,
}

/// An immutable population segment; the unit reputation is tracked over.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DemographicSlice {
    pub id: SliceId,
    pub occupation: String,
    pub class: String,
    pub ethnicity: String,
    pub religion: String,
    pub province: String,
    pub settlement: String,
    /// Whether the slice counts toward the simulated electorate.
    pub can_vote: bool,
    pub population: u64,
}

/// What caused a reputation change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Endorsement,
    Campaign,
    PolicyVote,
    PolicyEnactment,
    News,
}

/// Provenance triple attached to every reputation change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Source {
    pub kind: SourceKind,
    pub id: u64,
    pub turn: Turn,
}

impl Source {
    pub fn new(kind: SourceKind, id: impl Into<u64>, turn: Turn) -> Self {
        Self {
            kind,
            id: id.into(),
            turn,
        }
    }
}

/// A player's standing with one slice.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReputationScore {
    pub player: PlayerId,
    pub slice: SliceId,
    pub score: f64,
    pub updated_turn: Turn,
}

/// Audit entry for one persisted reputation change.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReputationChange {
    pub player: PlayerId,
    pub slice: SliceId,
    /// Requested delta before clamping.
    pub delta: f64,
    pub previous: f64,
    pub current: f64,
    pub source: Source,
    pub metadata: BTreeMap<String, String>,
}

/// A per-slice delta computed by the propagation engine.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct SliceTransfer {
    pub slice: SliceId,
    pub delta: f64,
}

/// Actions that go through the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    Endorse,
    Campaign,
    PartyCampaign,
    SubmitPolicy,
    VotePolicy,
    DeclareCandidacy,
    FundCandidate,
    VoteElection,
    PublishNews,
    Prospect,
    CreateParty,
    JoinParty,
    LeaveParty,
    Fundraise,
}

impl ActionKind {
    /// Configured AP cost; policy submission honors the charge toggle.
    pub fn cost(self, cfg: &GameConfig) -> u32 {
        let c: &ActionCosts = &cfg.costs;
        match self {
            ActionKind::Endorse => c.endorse,
            ActionKind::Campaign => c.campaign,
            ActionKind::PartyCampaign => c.party_campaign,
            ActionKind::SubmitPolicy if !cfg.policy.charge_submission => 0,
            ActionKind::SubmitPolicy => c.submit_policy,
            ActionKind::VotePolicy => c.vote_policy,
            ActionKind::DeclareCandidacy => c.declare_candidacy,
            ActionKind::FundCandidate => c.fund_candidate,
            ActionKind::VoteElection => c.vote_election,
            ActionKind::PublishNews => c.publish_news,
            ActionKind::Prospect => c.prospect,
            ActionKind::CreateParty => c.create_party,
            ActionKind::JoinParty => c.join_party,
            ActionKind::LeaveParty => c.leave_party,
            ActionKind::Fundraise => c.fundraise,
        }
    }
}

/// Append-only AP consumption log entry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ActionRecord {
    pub session: SessionId,
    pub player: PlayerId,
    pub turn: Turn,
    pub kind: ActionKind,
    pub cost: u32,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CampaignStatus {
    Active,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    pub fn can_transition_to(self, next: CampaignStatus) -> bool {
        matches!(
            (self, next),
            (CampaignStatus::Active, CampaignStatus::Completed)
                | (CampaignStatus::Active, CampaignStatus::Cancelled)
        )
    }
}

/// A delayed reputation boost on one slice.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    pub id: CampaignId,
    pub session: SessionId,
    pub player: PlayerId,
    pub target_slice: SliceId,
    pub start_turn: Turn,
    /// Resolved at the boundary that closes this turn.
    pub end_turn: Turn,
    pub boost: f64,
    pub cost: Decimal,
    /// Set when paid from a party treasury.
    pub party: Option<PartyId>,
    pub status: CampaignStatus,
}

/// Structured effect of a policy or analyzed event.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum Impact {
    Gdp { percent: f64 },
    Reputation { slice: SliceId, delta: f64 },
    ResourcePrice { resource: String, multiplier: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyStatus {
    Proposed,
    Rejected,
    Active,
    Repealed,
    Superseded,
}

impl PolicyStatus {
    pub fn can_transition_to(self, next: PolicyStatus) -> bool {
        use PolicyStatus::*;
        matches!(
            (self, next),
            (Proposed, Rejected) | (Proposed, Active) | (Active, Repealed) | (Active, Superseded)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PolicyStatus::Rejected | PolicyStatus::Repealed | PolicyStatus::Superseded
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Chamber {
    Unicameral,
    Bicameral,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum House {
    Lower,
    Upper,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteChoice {
    Yes,
    No,
    Abstain,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Ballot {
    pub voter: PlayerId,
    pub choice: VoteChoice,
    pub house: Option<House>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteTally {
    pub yes: u32,
    pub no: u32,
    pub abstain: u32,
}

impl VoteTally {
    pub fn record(&mut self, choice: VoteChoice) {
        match choice {
            VoteChoice::Yes => self.yes += 1,
            VoteChoice::No => self.no += 1,
            VoteChoice::Abstain => self.abstain += 1,
        }
    }

    pub fn cast(&self) -> u32 {
        self.yes + self.no + self.abstain
    }

    /// Strict majority of decisive votes.
    pub fn has_majority(&self) -> bool {
        self.yes * 2 > self.yes + self.no
    }
}

/// A legislative proposal and its lifecycle.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    pub id: PolicyId,
    pub session: SessionId,
    pub proposer: PlayerId,
    pub title: String,
    pub description: String,
    /// Supersession matches on category and target.
    pub category: String,
    pub target: Option<String>,
    pub impacts: Vec<Impact>,
    pub chamber: Chamber,
    pub status: PolicyStatus,
    pub ballots: Vec<Ballot>,
    pub tally: VoteTally,
    pub lower: VoteTally,
    pub upper: VoteTally,
    pub proposed_turn: Turn,
    pub voting_closes_turn: Turn,
    pub decided_turn: Option<Turn>,
    pub enacted_turn: Option<Turn>,
    pub supersedes: Option<PolicyId>,
    pub superseded_by: Option<PolicyId>,
    /// Impact as enacted, kept once the policy is superseded.
    pub original_impacts: Option<Vec<Impact>>,
    pub archived: bool,
}

impl Policy {
    pub fn has_voted(&self, player: PlayerId) -> bool {
        self.ballots.iter().any(|b| b.voter == player)
    }

    pub fn same_subject(&self, other: &Policy) -> bool {
        self.category == other.category && self.target == other.target
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionStatus {
    Announced,
    Campaigning,
    Voting,
    Completed,
}

impl ElectionStatus {
    pub fn can_transition_to(self, next: ElectionStatus) -> bool {
        use ElectionStatus::*;
        matches!(
            (self, next),
            (Announced, Campaigning) | (Campaigning, Voting) | (Voting, Completed)
        )
    }

    pub fn accepts_candidates(self) -> bool {
        matches!(self, ElectionStatus::Announced | ElectionStatus::Campaigning)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub player: PlayerId,
    pub funding: Decimal,
    pub endorsements: Vec<PlayerId>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ElectionBallot {
    pub voter: PlayerId,
    pub candidate: PlayerId,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CandidateTally {
    pub player: PlayerId,
    pub player_votes: u64,
    pub simulated_votes: u64,
    pub total: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ElectionResult {
    pub winner: Option<PlayerId>,
    pub breakdown: Vec<CandidateTally>,
    pub turnout: u64,
    /// True when the winner shares the top total with another candidate.
    pub tied: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Election {
    pub id: ElectionId,
    pub session: SessionId,
    pub office: OfficeId,
    /// Province whose population drives the simulated electorate; all provinces when None.
    pub province: Option<String>,
    pub status: ElectionStatus,
    pub candidates: Vec<Candidate>,
    pub ballots: Vec<ElectionBallot>,
    pub announced_turn: Turn,
    pub voting_closes_turn: Option<Turn>,
    pub result: Option<ElectionResult>,
}

impl Election {
    pub fn candidate(&self, player: PlayerId) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.player == player)
    }

    pub fn has_voted(&self, voter: PlayerId) -> bool {
        self.ballots.iter().any(|b| b.voter == voter)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Office {
    pub id: OfficeId,
    pub title: String,
    /// Legislative seat in this house, if any.
    pub chamber: Option<House>,
    pub province: Option<String>,
    pub holder: Option<PlayerId>,
    pub term_started: Option<Turn>,
    pub term_ends: Option<Turn>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Party {
    pub id: PartyId,
    pub name: String,
    pub leader: Option<PlayerId>,
    pub members: Vec<PlayerId>,
    pub treasury: Decimal,
}

/// One per (endorser, turn); immutable once created.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Endorsement {
    pub id: EndorsementId,
    pub session: SessionId,
    pub endorser: PlayerId,
    pub endorsed: PlayerId,
    pub turn: Turn,
    /// Every slice's transfer, zero-magnitude ones included.
    pub transfers: Vec<SliceTransfer>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NewsArticle {
    pub id: ArticleId,
    pub session: SessionId,
    pub author: PlayerId,
    pub subject: PlayerId,
    pub headline: String,
    pub turn: Turn,
    pub category: Option<String>,
    pub applied: Vec<SliceTransfer>,
    pub analysis_failed: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Discovery {
    pub player: PlayerId,
    pub province: String,
    pub technology: Option<String>,
    pub turn: Turn,
    pub reward: Decimal,
}

/// Macro indicators moved by non-reputation impacts.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Economy {
    /// 100.0 at session start.
    pub gdp_index: f64,
    pub resource_prices: BTreeMap<String, f64>,
}

impl Default for Economy {
    fn default() -> Self {
        Self {
            gdp_index: 100.0,
            resource_prices: BTreeMap::new(),
        }
    }
}

/// Everything needed to restore a session, minus the action log and the
/// reputation change log, which are persisted incrementally.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    pub session: Session,
    pub config: GameConfig,
    pub players: Vec<Player>,
    pub parties: Vec<Party>,
    pub slices: Vec<DemographicSlice>,
    pub reputations: Vec<ReputationScore>,
    pub campaigns: Vec<Campaign>,
    pub policies: Vec<Policy>,
    pub elections: Vec<Election>,
    pub offices: Vec<Office>,
    pub endorsements: Vec<Endorsement>,
    pub articles: Vec<NewsArticle>,
    pub discoveries: Vec<Discovery>,
    pub economy: Economy,
    pub ids: IdAllocator,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_requires_strict_majority() {
        let mut t = VoteTally::default();
        assert!(!t.has_majority());
        t.yes = 2;
        t.no = 2;
        assert!(!t.has_majority());
        t.yes = 3;
        assert!(t.has_majority());
        t.abstain = 10;
        assert!(t.has_majority());
    }

    #[test]
    fn lifecycles_never_go_backwards() {
        assert!(!CampaignStatus::Completed.can_transition_to(CampaignStatus::Active));
        assert!(!CampaignStatus::Cancelled.can_transition_to(CampaignStatus::Completed));
        assert!(!PolicyStatus::Active.can_transition_to(PolicyStatus::Proposed));
        assert!(!PolicyStatus::Superseded.can_transition_to(PolicyStatus::Active));
        assert!(PolicyStatus::Active.can_transition_to(PolicyStatus::Superseded));
        assert!(!ElectionStatus::Completed.can_transition_to(ElectionStatus::Voting));
        assert!(!ElectionStatus::Announced.can_transition_to(ElectionStatus::Voting));
    }

    #[test]
    fn submission_cost_follows_toggle() {
        let mut cfg = GameConfig::default();
        assert_eq!(ActionKind::SubmitPolicy.cost(&cfg), 1);
        cfg.policy.charge_submission = false;
        assert_eq!(ActionKind::SubmitPolicy.cost(&cfg), 0);
        assert_eq!(ActionKind::VotePolicy.cost(&cfg), 0);
        assert_eq!(ActionKind::JoinParty.cost(&cfg), 0);
    }

    #[test]
    fn impact_is_tagged_in_json() {
        let i = Impact::Reputation {
            slice: SliceId(3),
            delta: -1.5,
        };
        let s = serde_json::to_string(&i).unwrap();
        assert!(s.contains("\"kind\":\"Reputation\""));
        let back: Impact = serde_json::from_str(&s).unwrap();
        assert_eq!(back, i);
    }
}
