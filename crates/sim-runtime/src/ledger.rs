//! Action point ledger: per-turn balances and the append-only consumption log.

use sim_core::{ActionKind, ActionRecord, PlayerId, SimError};
use tracing::debug;

use crate::state::SessionState;

impl SessionState {
    pub fn remaining(&self, player: PlayerId) -> Result<u32, SimError> {
        Ok(self.player(player)?.actions_remaining)
    }

    /// Configured AP cost of `kind` in this session.
    pub fn cost_of(&self, kind: ActionKind) -> u32 {
        kind.cost(&self.config)
    }

    /// Check that `player` can pay for `kind` without touching the balance.
    /// Returns the cost to pass to [`Self::charge`].
    pub(crate) fn check_action_points(
        &self,
        player: PlayerId,
        kind: ActionKind,
    ) -> Result<u32, SimError> {
        let cost = self.cost_of(kind);
        let available = self.remaining(player)?;
        if cost > 0 && available < cost {
            return Err(SimError::InsufficientActionPoints {
                required: cost,
                available,
            });
        }
        Ok(cost)
    }

    /// Decrement a balance already checked by [`Self::check_action_points`]
    /// and log it. Free actions leave no record.
    pub(crate) fn charge(
        &mut self,
        player: PlayerId,
        kind: ActionKind,
        cost: u32,
    ) -> Result<u32, SimError> {
        if cost == 0 {
            return self.remaining(player);
        }
        let session = self.session.id;
        let turn = self.session.current_turn;
        let at = self.now();
        let p = self.player_mut(player)?;
        p.actions_remaining = p.actions_remaining.checked_sub(cost).ok_or(
            SimError::InsufficientActionPoints {
                required: cost,
                available: p.actions_remaining,
            },
        )?;
        let left = p.actions_remaining;
        self.action_log.push(ActionRecord {
            session,
            player,
            turn,
            kind,
            cost,
            at,
        });
        debug!(%player, ?kind, cost, left, "action points consumed");
        Ok(left)
    }

    /// Check and consume the AP for one action as a single step. Returns the
    /// balance left.
    pub fn consume(&mut self, player: PlayerId, kind: ActionKind) -> Result<u32, SimError> {
        self.ensure_active()?;
        let cost = self.check_action_points(player, kind)?;
        self.charge(player, kind, cost)
    }

    /// Add bonus AP. May exceed the base allotment until the next reset, but
    /// saturates at the hard ceiling.
    pub fn grant(&mut self, player: PlayerId, amount: u32) -> Result<u32, SimError> {
        self.ensure_active()?;
        let max = self.config.max_action_points;
        let p = self.player_mut(player)?;
        p.actions_remaining = p.actions_remaining.saturating_add(amount).min(max);
        Ok(p.actions_remaining)
    }

    /// Set every player's balance to the base allotment; returns how many
    /// players were reset.
    pub fn reset_all(&mut self) -> usize {
        let base = self.config.base_action_points;
        for p in self.players.values_mut() {
            p.actions_remaining = base;
        }
        self.players.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::state::fixtures::*;
    use proptest::prelude::*;
    use sim_core::{ActionKind, ErrorKind, SimError};

    #[test]
    fn last_point_can_be_spent_once() {
        let mut s = running(setup());
        s.players.get_mut(&ALICE).unwrap().actions_remaining = 1;
        assert_eq!(s.consume(ALICE, ActionKind::Endorse).unwrap(), 0);
        let err = s.consume(ALICE, ActionKind::Prospect).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientResource);
        assert_eq!(s.remaining(ALICE).unwrap(), 0);
        assert_eq!(s.action_log().len(), 1);
        assert_eq!(s.action_log()[0].kind, ActionKind::Endorse);
    }

    #[test]
    fn free_actions_bypass_the_ledger() {
        let mut s = running(setup());
        s.players.get_mut(&ALICE).unwrap().actions_remaining = 0;
        assert_eq!(s.consume(ALICE, ActionKind::VotePolicy).unwrap(), 0);
        assert_eq!(s.consume(ALICE, ActionKind::JoinParty).unwrap(), 0);
        assert!(s.action_log().is_empty());
    }

    #[test]
    fn grant_saturates_at_ceiling() {
        let mut s = running(setup());
        assert_eq!(s.grant(ALICE, 3).unwrap(), 8);
        assert_eq!(s.grant(ALICE, 50).unwrap(), 10);
        assert!(matches!(
            s.grant(sim_core::PlayerId(77), 1),
            Err(SimError::NotFound { kind: "player", id: 77 })
        ));
    }

    #[test]
    fn reset_restores_base_for_everyone() {
        let mut s = running(setup());
        s.grant(ALICE, 5).unwrap();
        s.consume(BOB, ActionKind::Endorse).unwrap();
        assert_eq!(s.reset_all(), 4);
        assert!(s.players().all(|p| p.actions_remaining == 5));
    }

    #[test]
    fn uninitialized_session_refuses_actions() {
        let mut s = crate::SessionState::new(sim_core::SessionId(1), setup(), clock()).unwrap();
        assert_eq!(
            s.consume(ALICE, ActionKind::Endorse).unwrap_err().kind(),
            ErrorKind::InvalidState
        );
    }

    #[test]
    fn archived_session_grants_nothing() {
        let mut s = running(setup());
        s.set_archived().unwrap();
        assert_eq!(s.grant(ALICE, 3).unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(s.remaining(ALICE).unwrap(), 5);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Consume(usize),
        Grant(u32),
        Reset,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..14).prop_map(Op::Consume),
            (0u32..8).prop_map(Op::Grant),
            Just(Op::Reset),
        ]
    }

    const KINDS: [ActionKind; 14] = [
        ActionKind::Endorse,
        ActionKind::Campaign,
        ActionKind::PartyCampaign,
        ActionKind::SubmitPolicy,
        ActionKind::VotePolicy,
        ActionKind::DeclareCandidacy,
        ActionKind::FundCandidate,
        ActionKind::VoteElection,
        ActionKind::PublishNews,
        ActionKind::Prospect,
        ActionKind::CreateParty,
        ActionKind::JoinParty,
        ActionKind::LeaveParty,
        ActionKind::Fundraise,
    ];

    proptest! {
        #[test]
        fn balance_stays_within_bounds(ops in proptest::collection::vec(op(), 0..60)) {
            let mut s = running(setup());
            let max = s.config().max_action_points;
            for op in ops {
                match op {
                    Op::Consume(k) => {
                        let before = s.remaining(ALICE).unwrap();
                        let cost = s.cost_of(KINDS[k]);
                        match s.consume(ALICE, KINDS[k]) {
                            Ok(left) => prop_assert_eq!(left, before - cost),
                            Err(e) => {
                                prop_assert_eq!(e.kind(), ErrorKind::InsufficientResource);
                                prop_assert_eq!(s.remaining(ALICE).unwrap(), before);
                            }
                        }
                    }
                    Op::Grant(n) => { s.grant(ALICE, n).unwrap(); }
                    Op::Reset => {
                        s.reset_all();
                        prop_assert_eq!(s.remaining(ALICE).unwrap(), 5);
                    }
                }
                prop_assert!(s.remaining(ALICE).unwrap() <= max);
            }
        }
    }
}
