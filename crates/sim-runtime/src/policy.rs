//! Policy lifecycle: submission, voting, enactment and supersession.

use sim_core::{
    validate_impacts, ActionKind, Ballot, Chamber, House, Impact, PlayerId, Policy, PolicyId,
    PolicyStatus, SimError, SourceKind, ValidationError, VoteChoice, VoteTally,
};
use sim_reputation::{ImpactPreview, Metadata, PolicyRole};
use tracing::{debug, info};

use crate::state::SessionState;

/// Caller-supplied content of a proposal.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyDraft {
    pub title: String,
    pub description: String,
    pub category: String,
    pub target: Option<String>,
    /// Empty means "ask the text analyzer" when submitted through a handle.
    pub impacts: Vec<Impact>,
    pub chamber: Chamber,
}

impl PolicyDraft {
    pub fn new(title: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            category: category.into(),
            target: None,
            impacts: Vec::new(),
            chamber: Chamber::Unicameral,
        }
    }
}

/// What deciding one policy changed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PolicyOutcomes {
    pub enacted: Vec<PolicyId>,
    pub rejected: Vec<PolicyId>,
    pub superseded: Vec<PolicyId>,
}

fn role_of(choice: VoteChoice) -> PolicyRole {
    match choice {
        VoteChoice::Yes => PolicyRole::YesVoter,
        VoteChoice::No => PolicyRole::NoVoter,
        VoteChoice::Abstain => PolicyRole::Abstainer,
    }
}

impl SessionState {
    fn policy_mut(&mut self, id: PolicyId) -> Result<&mut Policy, SimError> {
        self.policies
            .get_mut(&id)
            .ok_or_else(|| SimError::not_found("policy", id))
    }

    fn house_of(&self, voter: PlayerId) -> Result<House, SimError> {
        self.player(voter)?
            .office
            .and_then(|o| self.offices.get(&o))
            .and_then(|o| o.chamber)
            .ok_or_else(|| {
                SimError::unauthorized(format!("player {voter} holds no legislative seat"))
            })
    }

    /// Whether `tally` still could reach a seat majority in `house`.
    fn can_still_pass(&self, tally: &VoteTally, house: House) -> bool {
        let seats = self.legislature.seats(house);
        let unseen = seats.saturating_sub(tally.cast());
        tally.yes + unseen >= self.legislature.majority(house)
    }

    fn passes(&self, policy: &Policy) -> bool {
        match policy.chamber {
            Chamber::Unicameral => policy.tally.has_majority(),
            Chamber::Bicameral => [(House::Lower, &policy.lower), (House::Upper, &policy.upper)]
                .into_iter()
                .all(|(house, t)| t.yes >= self.legislature.majority(house)),
        }
    }

    pub fn submit_policy(
        &mut self,
        proposer: PlayerId,
        draft: PolicyDraft,
    ) -> Result<PolicyId, SimError> {
        self.ensure_active()?;
        if draft.title.trim().is_empty() {
            return Err(ValidationError::EmptyField("policy.title").into());
        }
        if draft.category.trim().is_empty() {
            return Err(ValidationError::EmptyField("policy.category").into());
        }
        validate_impacts(&draft.impacts)?;
        for impact in &draft.impacts {
            if let Impact::Reputation { slice, .. } = impact {
                self.require_slice(*slice)?;
            }
        }
        let ap = self.check_action_points(proposer, ActionKind::SubmitPolicy)?;
        self.charge(proposer, ActionKind::SubmitPolicy, ap)?;

        let id = PolicyId(self.next_id());
        let turn = self.session.current_turn;
        self.policies.insert(
            id,
            Policy {
                id,
                session: self.session.id,
                proposer,
                title: draft.title,
                description: draft.description,
                category: draft.category,
                target: draft.target,
                impacts: draft.impacts,
                chamber: draft.chamber,
                status: PolicyStatus::Proposed,
                ballots: Vec::new(),
                tally: VoteTally::default(),
                lower: VoteTally::default(),
                upper: VoteTally::default(),
                proposed_turn: turn,
                voting_closes_turn: turn + self.config.policy.voting_turns,
                decided_turn: None,
                enacted_turn: None,
                supersedes: None,
                superseded_by: None,
                original_impacts: None,
                archived: false,
            },
        );
        info!(policy = %id, %proposer, "policy submitted");
        Ok(id)
    }

    /// Record a vote and apply its partial reputation effect immediately.
    /// Bicameral proposals are rejected as soon as either house can no longer
    /// reach a majority. Returns the policy's status after the vote.
    pub fn vote_policy(
        &mut self,
        voter: PlayerId,
        id: PolicyId,
        choice: VoteChoice,
    ) -> Result<PolicyStatus, SimError> {
        self.ensure_active()?;
        let policy = self.policy(id)?;
        if policy.status != PolicyStatus::Proposed {
            return Err(SimError::invalid_state(format!(
                "policy {id} is {:?}, not open for votes",
                policy.status
            )));
        }
        if policy.has_voted(voter) {
            return Err(SimError::invalid_state(format!(
                "player {voter} already voted on policy {id}"
            )));
        }
        let house = match policy.chamber {
            Chamber::Unicameral => {
                self.player(voter)?;
                None
            }
            Chamber::Bicameral => Some(self.house_of(voter)?),
        };
        let impacts = policy.impacts.clone();
        let ap = self.check_action_points(voter, ActionKind::VotePolicy)?;
        self.charge(voter, ActionKind::VotePolicy, ap)?;

        let policy = self.policy_mut(id)?;
        policy.ballots.push(Ballot {
            voter,
            choice,
            house,
        });
        policy.tally.record(choice);
        match house {
            Some(House::Lower) => policy.lower.record(choice),
            Some(House::Upper) => policy.upper.record(choice),
            None => {}
        }

        let transfers = self.engine.policy_transfers(&impacts, role_of(choice));
        if !transfers.is_empty() {
            let source = self.source(SourceKind::PolicyVote, id);
            let mut meta = Metadata::new();
            meta.insert("choice".to_string(), format!("{choice:?}"));
            self.engine
                .apply_transfers(&mut self.reputation, voter, &transfers, source, &meta)?;
        }

        let policy = self.policy(id)?;
        if policy.chamber == Chamber::Bicameral
            && !(self.can_still_pass(&policy.lower, House::Lower)
                && self.can_still_pass(&policy.upper, House::Upper))
        {
            let turn = self.session.current_turn;
            let policy = self.policy_mut(id)?;
            policy.status = PolicyStatus::Rejected;
            policy.decided_turn = Some(turn);
            info!(policy = %id, "policy rejected early: majority out of reach");
            return Ok(PolicyStatus::Rejected);
        }
        debug!(policy = %id, %voter, ?choice, "policy vote recorded");
        Ok(PolicyStatus::Proposed)
    }

    /// Decide a proposal now. The proposer or the gamemaster may call this.
    /// A strict majority enacts it; otherwise it is rejected.
    pub fn enact_policy(
        &mut self,
        caller: PlayerId,
        id: PolicyId,
    ) -> Result<PolicyStatus, SimError> {
        self.ensure_active()?;
        let policy = self.policy(id)?;
        if caller != policy.proposer && caller != self.session.gamemaster {
            return Err(SimError::unauthorized(format!(
                "player {caller} may not decide policy {id}"
            )));
        }
        if policy.status != PolicyStatus::Proposed {
            return Err(SimError::invalid_state(format!(
                "policy {id} is {:?}",
                policy.status
            )));
        }
        let mut outcomes = PolicyOutcomes::default();
        self.decide_policy(id, &mut outcomes)
    }

    fn decide_policy(
        &mut self,
        id: PolicyId,
        outcomes: &mut PolicyOutcomes,
    ) -> Result<PolicyStatus, SimError> {
        let turn = self.session.current_turn;
        let policy = self.policy(id)?.clone();
        if !self.passes(&policy) {
            let p = self.policy_mut(id)?;
            p.status = PolicyStatus::Rejected;
            p.decided_turn = Some(turn);
            outcomes.rejected.push(id);
            info!(policy = %id, yes = policy.tally.yes, no = policy.tally.no, "policy rejected");
            return Ok(PolicyStatus::Rejected);
        }

        let transfers = self
            .engine
            .policy_transfers(&policy.impacts, PolicyRole::Proposer);
        let source = self.source(SourceKind::PolicyEnactment, id);
        let mut meta = Metadata::new();
        meta.insert("category".to_string(), policy.category.clone());
        self.engine.apply_transfers(
            &mut self.reputation,
            policy.proposer,
            &transfers,
            source,
            &meta,
        )?;
        self.apply_economic_impacts(&policy.impacts);

        let prior = self
            .policies
            .values()
            .filter(|p| p.id != id && p.status == PolicyStatus::Active && p.same_subject(&policy))
            .max_by_key(|p| (p.enacted_turn, p.id))
            .map(|p| p.id);
        if let Some(prior) = prior {
            let old = self.policy_mut(prior)?;
            old.status = PolicyStatus::Superseded;
            old.original_impacts = Some(old.impacts.clone());
            old.superseded_by = Some(id);
            outcomes.superseded.push(prior);
            info!(policy = %prior, by = %id, "policy superseded");
        }

        let p = self.policy_mut(id)?;
        p.status = PolicyStatus::Active;
        p.decided_turn = Some(turn);
        p.enacted_turn = Some(turn);
        p.supersedes = prior;
        outcomes.enacted.push(id);
        info!(policy = %id, yes = policy.tally.yes, no = policy.tally.no, "policy enacted");
        Ok(PolicyStatus::Active)
    }

    fn apply_economic_impacts(&mut self, impacts: &[Impact]) {
        for impact in impacts {
            match impact {
                Impact::Gdp { percent } => {
                    self.economy.gdp_index *= 1.0 + percent / 100.0;
                }
                Impact::ResourcePrice {
                    resource,
                    multiplier,
                } => {
                    *self
                        .economy
                        .resource_prices
                        .entry(resource.clone())
                        .or_insert(1.0) *= multiplier;
                }
                Impact::Reputation { .. } => {}
            }
        }
    }

    /// Gamemaster only: `active -> repealed`.
    pub fn repeal_policy(&mut self, caller: PlayerId, id: PolicyId) -> Result<(), SimError> {
        self.ensure_active()?;
        self.require_gamemaster(caller)?;
        let turn = self.session.current_turn;
        let p = self.policy_mut(id)?;
        if !p.status.can_transition_to(PolicyStatus::Repealed) {
            return Err(SimError::invalid_state(format!("policy {id} is {:?}", p.status)));
        }
        p.status = PolicyStatus::Repealed;
        p.decided_turn = Some(turn);
        info!(policy = %id, "policy repealed");
        Ok(())
    }

    /// Housekeeping flag for policies in a terminal status.
    pub fn archive_policy(&mut self, caller: PlayerId, id: PolicyId) -> Result<(), SimError> {
        self.ensure_active()?;
        let gm = self.session.gamemaster;
        let p = self.policy_mut(id)?;
        if caller != gm && caller != p.proposer {
            return Err(SimError::unauthorized(format!(
                "player {caller} may not archive policy {id}"
            )));
        }
        if !p.status.is_terminal() || p.archived {
            return Err(SimError::invalid_state(format!(
                "policy {id} cannot be archived from {:?}",
                p.status
            )));
        }
        p.archived = true;
        Ok(())
    }

    /// Population-weighted effect of a policy on a player in `role`.
    pub fn preview_policy(
        &self,
        id: PolicyId,
        role: PolicyRole,
    ) -> Result<Vec<ImpactPreview>, SimError> {
        let policy = self.policy(id)?;
        let transfers = self.engine.policy_transfers(&policy.impacts, role);
        Ok(self.engine.impact_preview(&self.slices, &transfers))
    }

    /// Decide every open proposal whose voting window has closed.
    pub(crate) fn close_due_policies(&mut self) -> Result<PolicyOutcomes, SimError> {
        let turn = self.session.current_turn;
        let due: Vec<PolicyId> = self
            .policies
            .values()
            .filter(|p| p.status == PolicyStatus::Proposed && p.voting_closes_turn <= turn)
            .map(|p| p.id)
            .collect();
        let mut outcomes = PolicyOutcomes::default();
        for id in due {
            self.decide_policy(id, &mut outcomes)?;
        }
        Ok(outcomes)
    }
}
