//! Election lifecycle: candidacy, funding, voting and the tally that seats
//! the winner.

use rust_decimal::Decimal;
use sim_ai::{electorate_weight, simulate_votes};
use sim_core::{
    ActionKind, Candidate, CandidateTally, Election, ElectionBallot, ElectionId, ElectionRecord,
    ElectionResult, ElectionStatus, OfficeId, PlayerId, SimError, Turn, ValidationError,
};
use tracing::{info, warn};

use crate::state::SessionState;

impl SessionState {
    fn election_mut(&mut self, id: ElectionId) -> Result<&mut Election, SimError> {
        self.elections
            .get_mut(&id)
            .ok_or_else(|| SimError::not_found("election", id))
    }

    /// Gamemaster only. One open election per office.
    pub fn create_election(
        &mut self,
        caller: PlayerId,
        office: OfficeId,
        province: Option<String>,
    ) -> Result<ElectionId, SimError> {
        self.ensure_active()?;
        self.require_gamemaster(caller)?;
        self.office(office)?;
        if let Some(p) = &province {
            self.require_province(p)?;
        }
        if self
            .elections
            .values()
            .any(|e| e.office == office && e.status != ElectionStatus::Completed)
        {
            return Err(SimError::Conflict(format!(
                "office {office} already has an open election"
            )));
        }
        let id = ElectionId(self.next_id());
        self.elections.insert(
            id,
            Election {
                id,
                session: self.session.id,
                office,
                province,
                status: ElectionStatus::Announced,
                candidates: Vec::new(),
                ballots: Vec::new(),
                announced_turn: self.session.current_turn,
                voting_closes_turn: None,
                result: None,
            },
        );
        info!(election = %id, %office, "election announced");
        Ok(id)
    }

    pub fn declare_candidacy(
        &mut self,
        player: PlayerId,
        election: ElectionId,
    ) -> Result<(), SimError> {
        self.ensure_active()?;
        let e = self.election(election)?;
        if !e.status.accepts_candidates() {
            return Err(SimError::invalid_state(format!(
                "election {election} is {:?}, not accepting candidates",
                e.status
            )));
        }
        if e.candidate(player).is_some() || self.player(player)?.is_candidate {
            return Err(SimError::Conflict(format!(
                "player {player} is already a candidate"
            )));
        }
        let ap = self.check_action_points(player, ActionKind::DeclareCandidacy)?;
        self.charge(player, ActionKind::DeclareCandidacy, ap)?;
        self.player_mut(player)?.is_candidate = true;
        let e = self.election_mut(election)?;
        e.candidates.push(Candidate {
            player,
            funding: Decimal::ZERO,
            endorsements: Vec::new(),
        });
        if e.status == ElectionStatus::Announced {
            e.status = ElectionStatus::Campaigning;
        }
        info!(%election, %player, "candidacy declared");
        Ok(())
    }

    /// Move personal cash into a candidate's campaign fund.
    pub fn fund_candidate(
        &mut self,
        funder: PlayerId,
        election: ElectionId,
        candidate: PlayerId,
        amount: Decimal,
    ) -> Result<(), SimError> {
        self.ensure_active()?;
        if amount <= Decimal::ZERO {
            return Err(ValidationError::NegativeMoney.into());
        }
        let e = self.election(election)?;
        if e.status == ElectionStatus::Completed {
            return Err(SimError::invalid_state(format!("election {election} is completed")));
        }
        if e.candidate(candidate).is_none() {
            return Err(SimError::not_found("candidate", candidate));
        }
        let cash = self.player(funder)?.cash;
        if cash < amount {
            return Err(SimError::InsufficientFunds {
                required: amount,
                available: cash,
            });
        }
        let ap = self.check_action_points(funder, ActionKind::FundCandidate)?;
        self.charge(funder, ActionKind::FundCandidate, ap)?;
        self.player_mut(funder)?.cash -= amount;
        if let Some(c) = self
            .election_mut(election)?
            .candidates
            .iter_mut()
            .find(|c| c.player == candidate)
        {
            c.funding += amount;
        }
        Ok(())
    }

    /// Gamemaster only. Returns the turn whose boundary closes voting.
    pub fn open_voting(&mut self, caller: PlayerId, election: ElectionId) -> Result<Turn, SimError> {
        self.ensure_active()?;
        self.require_gamemaster(caller)?;
        let closes = self.session.current_turn + self.config.election.voting_turns;
        let e = self.election_mut(election)?;
        if !e.status.can_transition_to(ElectionStatus::Voting) {
            return Err(SimError::invalid_state(format!(
                "election {election} is {:?}",
                e.status
            )));
        }
        if e.candidates.is_empty() {
            return Err(SimError::invalid_state(format!("election {election} has no candidates")));
        }
        e.status = ElectionStatus::Voting;
        e.voting_closes_turn = Some(closes);
        info!(%election, closes, "voting opened");
        Ok(closes)
    }

    pub fn vote_election(
        &mut self,
        voter: PlayerId,
        election: ElectionId,
        candidate: PlayerId,
    ) -> Result<(), SimError> {
        self.ensure_active()?;
        self.player(voter)?;
        let e = self.election(election)?;
        if e.status != ElectionStatus::Voting {
            return Err(SimError::invalid_state(format!(
                "voting is closed for election {election}"
            )));
        }
        if e.candidate(candidate).is_none() {
            return Err(SimError::not_found("candidate", candidate));
        }
        if e.has_voted(voter) {
            return Err(SimError::invalid_state(format!(
                "player {voter} already voted in election {election}"
            )));
        }
        let ap = self.check_action_points(voter, ActionKind::VoteElection)?;
        self.charge(voter, ActionKind::VoteElection, ap)?;
        self.election_mut(election)?
            .ballots
            .push(ElectionBallot { voter, candidate });
        Ok(())
    }

    /// Gamemaster only: close voting now and seat the winner.
    pub fn tally_election(
        &mut self,
        caller: PlayerId,
        election: ElectionId,
    ) -> Result<ElectionResult, SimError> {
        self.ensure_active()?;
        self.require_gamemaster(caller)?;
        self.tally(election)
    }

    /// Player ballots plus the simulated electorate, split evenly across the
    /// candidates with per-candidate variance from the session RNG. The
    /// strict maximum wins. On an exact tie the earliest declared candidate
    /// wins and the result is flagged `tied`.
    fn tally(&mut self, election: ElectionId) -> Result<ElectionResult, SimError> {
        let e = self.election(election)?.clone();
        if e.status != ElectionStatus::Voting {
            return Err(SimError::invalid_state(format!(
                "election {election} is {:?}, not voting",
                e.status
            )));
        }
        let cfg = &self.config.election;
        let weight = electorate_weight(&self.slices, e.province.as_deref(), cfg.turnout)
            .map_err(|err| SimError::invalid_state(err.to_string()))?;
        let simulated = simulate_votes(e.candidates.len(), weight, cfg.variance, &mut self.rng)
            .map_err(|err| SimError::invalid_state(err.to_string()))?;

        let breakdown: Vec<CandidateTally> = e
            .candidates
            .iter()
            .zip(simulated)
            .map(|(c, sim)| {
                let player_votes = e.ballots.iter().filter(|b| b.candidate == c.player).count() as u64;
                CandidateTally {
                    player: c.player,
                    player_votes,
                    simulated_votes: sim,
                    total: player_votes + sim,
                }
            })
            .collect();

        let mut winner: Option<&CandidateTally> = None;
        for t in &breakdown {
            if winner.map_or(true, |w| t.total > w.total) {
                winner = Some(t);
            }
        }
        let tied = winner.map_or(false, |w| {
            breakdown
                .iter()
                .filter(|t| t.total == w.total)
                .count()
                > 1
        });
        let winner = winner.map(|w| w.player);
        if tied {
            warn!(%election, winner = ?winner, "election tied; earliest candidate seated");
        }
        let result = ElectionResult {
            winner,
            turnout: breakdown.iter().map(|t| t.total).sum(),
            breakdown,
            tied,
        };

        let turn = self.session.current_turn;
        for t in &result.breakdown {
            let p = self.player_mut(t.player)?;
            p.is_candidate = false;
            p.election_history.push(ElectionRecord {
                election,
                office: e.office,
                turn,
                won: Some(t.player) == winner,
                votes: t.total,
            });
        }
        if let Some(w) = winner {
            self.seat(w, e.office)?;
        }
        let stored = self.election_mut(election)?;
        stored.status = ElectionStatus::Completed;
        stored.result = Some(result.clone());
        info!(%election, winner = ?winner, turnout = result.turnout, "election completed");
        Ok(result)
    }

    fn seat(&mut self, winner: PlayerId, office: OfficeId) -> Result<(), SimError> {
        let turn = self.session.current_turn;
        let term = self.config.election.term_turns;
        let previous = self.office(office)?.holder;
        if let Some(prev) = previous.filter(|p| *p != winner) {
            self.player_mut(prev)?.office = None;
        }
        if let Some(old) = self.player(winner)?.office.filter(|o| *o != office) {
            if let Some(o) = self.offices.get_mut(&old) {
                o.holder = None;
            }
        }
        self.player_mut(winner)?.office = Some(office);
        if let Some(o) = self.offices.get_mut(&office) {
            o.holder = Some(winner);
            o.term_started = Some(turn);
            o.term_ends = Some(turn + term);
        }
        Ok(())
    }

    /// Tally every election whose voting window has closed.
    pub(crate) fn close_due_elections(&mut self) -> Result<Vec<ElectionId>, SimError> {
        let turn = self.session.current_turn;
        let due: Vec<ElectionId> = self
            .elections
            .values()
            .filter(|e| {
                e.status == ElectionStatus::Voting
                    && e.voting_closes_turn.map_or(false, |t| t <= turn)
            })
            .map(|e| e.id)
            .collect();
        for id in &due {
            self.tally(*id)?;
        }
        Ok(due)
    }
}
