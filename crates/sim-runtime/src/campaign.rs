//! Campaign processor: delayed reputation boosts resolved at turn boundaries.

use rand::seq::SliceRandom;
use rand::Rng;
use rust_decimal::Decimal;
use sim_core::{
    ActionKind, Campaign, CampaignId, CampaignStatus, PartyId, PlayerId, SimError, SliceId,
    SliceTransfer, SourceKind, ValidationError,
};
use sim_reputation::Metadata;
use tracing::{debug, info};

use crate::state::SessionState;

impl SessionState {
    fn draw_duration(&mut self) -> u64 {
        let (lo, hi) = self.config.campaign.duration_range;
        self.rng.gen_range(lo.max(1)..=hi.max(lo.max(1)))
    }

    fn draw_boost(&mut self) -> f64 {
        let (lo, hi) = self.config.campaign.boost_range;
        if lo >= hi {
            lo
        } else {
            self.rng.gen_range(lo..=hi)
        }
    }

    fn campaign_cost(&self, duration: u64) -> Decimal {
        self.config.campaign.base_cost * Decimal::from(duration)
    }

    fn has_active_campaign(&self, player: PlayerId, slice: SliceId) -> bool {
        self.campaigns.values().any(|c| {
            c.player == player && c.target_slice == slice && c.status == CampaignStatus::Active
        })
    }

    /// Start a campaign with a duration and boost drawn from the configured ranges.
    pub fn start_campaign(
        &mut self,
        player: PlayerId,
        slice: SliceId,
    ) -> Result<CampaignId, SimError> {
        self.ensure_active()?;
        let duration = self.draw_duration();
        let boost = self.draw_boost();
        self.start_campaign_with(player, slice, duration, boost)
    }

    /// Start a campaign ending `duration` turns from now. Costs AP and
    /// `base_cost * duration` personal cash; both are checked before either
    /// is taken.
    pub fn start_campaign_with(
        &mut self,
        player: PlayerId,
        slice: SliceId,
        duration: u64,
        boost: f64,
    ) -> Result<CampaignId, SimError> {
        self.ensure_active()?;
        if duration == 0 {
            return Err(SimError::invalid_state("campaign duration must be at least one turn"));
        }
        if !boost.is_finite() {
            return Err(ValidationError::NonFinite.into());
        }
        self.require_slice(slice)?;
        if self.has_active_campaign(player, slice) {
            return Err(SimError::DuplicateActiveCampaign {
                player: player.0,
                slice: slice.0,
            });
        }
        let ap = self.check_action_points(player, ActionKind::Campaign)?;
        let cost = self.campaign_cost(duration);
        let cash = self.player(player)?.cash;
        if cash < cost {
            return Err(SimError::InsufficientFunds {
                required: cost,
                available: cash,
            });
        }

        self.charge(player, ActionKind::Campaign, ap)?;
        self.player_mut(player)?.cash -= cost;
        let id = CampaignId(self.next_id());
        let start = self.session.current_turn;
        self.campaigns.insert(
            id,
            Campaign {
                id,
                session: self.session.id,
                player,
                target_slice: slice,
                start_turn: start,
                end_turn: start + duration,
                boost,
                cost,
                party: None,
                status: CampaignStatus::Active,
            },
        );
        info!(campaign = %id, %player, %slice, end_turn = start + duration, boost, "campaign started");
        Ok(id)
    }

    /// Start one campaign per randomly chosen slice for a party, paid from the
    /// treasury. Duration and boost are drawn once and shared. Slices where
    /// the leader already campaigns are skipped.
    pub fn start_party_campaign(
        &mut self,
        caller: PlayerId,
        party: PartyId,
    ) -> Result<Vec<CampaignId>, SimError> {
        self.ensure_active()?;
        let p = self.party(party)?;
        if p.leader != Some(caller) {
            return Err(SimError::unauthorized(format!(
                "player {caller} does not lead party {party}"
            )));
        }
        let treasury = p.treasury;
        let ap = self.check_action_points(caller, ActionKind::PartyCampaign)?;

        let open: Vec<SliceId> = self
            .slices
            .iter()
            .map(|s| s.id)
            .filter(|s| !self.has_active_campaign(caller, *s))
            .collect();
        if open.is_empty() {
            return Err(SimError::Conflict(format!(
                "party {party} already campaigns on every slice"
            )));
        }
        let duration = self.draw_duration();
        let boost = self.draw_boost();
        let amount = self.config.campaign.party_slices.max(1);
        let targets: Vec<SliceId> = open.choose_multiple(&mut self.rng, amount).copied().collect();
        let cost = self.campaign_cost(duration);
        let total = cost * Decimal::from(targets.len());
        if treasury < total {
            return Err(SimError::InsufficientFunds {
                required: total,
                available: treasury,
            });
        }

        self.charge(caller, ActionKind::PartyCampaign, ap)?;
        if let Some(p) = self.parties.get_mut(&party) {
            p.treasury -= total;
        }
        let start = self.session.current_turn;
        let mut ids = Vec::with_capacity(targets.len());
        for slice in targets {
            let id = CampaignId(self.next_id());
            self.campaigns.insert(
                id,
                Campaign {
                    id,
                    session: self.session.id,
                    player: caller,
                    target_slice: slice,
                    start_turn: start,
                    end_turn: start + duration,
                    boost,
                    cost,
                    party: Some(party),
                    status: CampaignStatus::Active,
                },
            );
            ids.push(id);
        }
        info!(%party, leader = %caller, campaigns = ids.len(), duration, boost, "party campaign started");
        Ok(ids)
    }

    /// Owner-only; the cost is forfeited.
    pub fn cancel_campaign(&mut self, caller: PlayerId, id: CampaignId) -> Result<(), SimError> {
        self.ensure_active()?;
        let c = self
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| SimError::not_found("campaign", id))?;
        if c.player != caller {
            return Err(SimError::unauthorized(format!(
                "campaign {id} belongs to player {}",
                c.player
            )));
        }
        if !c.status.can_transition_to(CampaignStatus::Cancelled) {
            return Err(SimError::invalid_state(format!(
                "campaign {id} is {:?}",
                c.status
            )));
        }
        c.status = CampaignStatus::Cancelled;
        debug!(campaign = %id, "campaign cancelled");
        Ok(())
    }

    /// Apply the boost of every active campaign due by the current turn and
    /// mark it completed. Completed campaigns are never touched again.
    pub(crate) fn resolve_campaigns(&mut self) -> Result<Vec<CampaignId>, SimError> {
        let turn = self.session.current_turn;
        let due: Vec<CampaignId> = self
            .campaigns
            .values()
            .filter(|c| c.status == CampaignStatus::Active && c.end_turn <= turn)
            .map(|c| c.id)
            .collect();
        for id in &due {
            let Some(c) = self.campaigns.get(id).cloned() else {
                continue;
            };
            let source = self.source(SourceKind::Campaign, c.id);
            let mut meta = Metadata::new();
            meta.insert("start_turn".to_string(), c.start_turn.to_string());
            if let Some(party) = c.party {
                meta.insert("party".to_string(), party.to_string());
            }
            self.engine.apply_transfers(
                &mut self.reputation,
                c.player,
                &[SliceTransfer {
                    slice: c.target_slice,
                    delta: c.boost,
                }],
                source,
                &meta,
            )?;
            if let Some(c) = self.campaigns.get_mut(id) {
                c.status = CampaignStatus::Completed;
            }
        }
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use crate::state::fixtures::*;
    use rust_decimal::Decimal;
    use sim_core::*;

    #[test]
    fn start_charges_ap_and_cash() {
        let mut s = running(setup());
        let id = s.start_campaign_with(ALICE, SliceId(10), 2, 4.0).unwrap();
        let c = s.campaign(id).unwrap();
        assert_eq!(c.end_turn, 2);
        assert_eq!(c.cost, Decimal::new(1_000, 0));
        assert_eq!(s.player(ALICE).unwrap().cash, Decimal::new(4_000, 0));
        assert_eq!(s.remaining(ALICE).unwrap(), 4);
    }

    #[test]
    fn duplicate_active_campaign_conflicts() {
        let mut s = running(setup());
        s.start_campaign_with(ALICE, SliceId(10), 1, 4.0).unwrap();
        let err = s.start_campaign_with(ALICE, SliceId(10), 1, 4.0).unwrap_err();
        assert_eq!(err, SimError::DuplicateActiveCampaign { player: 2, slice: 10 });
        assert_eq!(err.kind(), ErrorKind::Conflict);
        s.start_campaign_with(ALICE, SliceId(11), 1, 4.0).unwrap();
    }

    #[test]
    fn insufficient_cash_takes_nothing() {
        let mut s = running(setup());
        s.players.get_mut(&ALICE).unwrap().cash = Decimal::new(100, 0);
        let err = s.start_campaign_with(ALICE, SliceId(10), 1, 4.0).unwrap_err();
        assert!(matches!(err, SimError::InsufficientFunds { .. }));
        assert_eq!(s.remaining(ALICE).unwrap(), 5);
        assert!(s.action_log().is_empty());
    }

    #[test]
    fn resolution_applies_boost_once() {
        let mut s = running(setup());
        let id = s.start_campaign_with(ALICE, SliceId(10), 1, 4.0).unwrap();
        assert!(s.resolve_campaigns().unwrap().is_empty());
        s.session.current_turn = 1;
        assert_eq!(s.resolve_campaigns().unwrap(), vec![id]);
        assert_eq!(s.campaign(id).unwrap().status, CampaignStatus::Completed);
        assert_eq!(s.reputation().score(ALICE, SliceId(10)), 4.0);
        s.session.current_turn = 2;
        assert!(s.resolve_campaigns().unwrap().is_empty());
        assert_eq!(s.reputation().score(ALICE, SliceId(10)), 4.0);
        let src = Source::new(SourceKind::Campaign, id, 1);
        assert_eq!(s.reputation().changes_from(src).len(), 1);
    }

    #[test]
    fn cancel_is_owner_only_and_final() {
        let mut s = running(setup());
        let id = s.start_campaign_with(ALICE, SliceId(10), 1, 4.0).unwrap();
        assert_eq!(
            s.cancel_campaign(BOB, id).unwrap_err().kind(),
            ErrorKind::Unauthorized
        );
        s.cancel_campaign(ALICE, id).unwrap();
        assert_eq!(s.player(ALICE).unwrap().cash, Decimal::new(4_500, 0));
        assert_eq!(
            s.cancel_campaign(ALICE, id).unwrap_err().kind(),
            ErrorKind::InvalidState
        );
        s.session.current_turn = 5;
        assert!(s.resolve_campaigns().unwrap().is_empty());
    }

    #[test]
    fn drawn_campaign_stays_in_configured_ranges() {
        let mut s = running(setup());
        let id = s.start_campaign(BOB, SliceId(12)).unwrap();
        let c = s.campaign(id).unwrap();
        assert!((1..=3).contains(&(c.end_turn - c.start_turn)));
        assert!((2.0..=6.0).contains(&c.boost));
    }

    fn with_party(treasury: i64) -> crate::SessionState {
        let mut setup = setup();
        setup.players[1].party = Some(PartyId(50));
        setup.parties.push(Party {
            id: PartyId(50),
            name: "Reform".into(),
            leader: Some(ALICE),
            members: vec![ALICE],
            treasury: Decimal::new(treasury, 0),
        });
        running(setup)
    }

    #[test]
    fn party_campaign_shares_draws_and_treasury() {
        let mut s = with_party(10_000);
        let ids = s.start_party_campaign(ALICE, PartyId(50)).unwrap();
        assert_eq!(ids.len(), 3);
        let first = s.campaign(ids[0]).unwrap().clone();
        for id in &ids {
            let c = s.campaign(*id).unwrap();
            assert_eq!(c.end_turn, first.end_turn);
            assert_eq!(c.boost, first.boost);
            assert_eq!(c.party, Some(PartyId(50)));
        }
        let spent = first.cost * Decimal::from(3u32);
        assert_eq!(
            s.party(PartyId(50)).unwrap().treasury,
            Decimal::new(10_000, 0) - spent
        );
        assert_eq!(s.player(ALICE).unwrap().cash, Decimal::new(5_000, 0));
        assert_eq!(
            s.start_party_campaign(ALICE, PartyId(50)).unwrap_err().kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn party_campaign_requires_leader_and_funds() {
        let mut s = with_party(100);
        assert_eq!(
            s.start_party_campaign(BOB, PartyId(50)).unwrap_err().kind(),
            ErrorKind::Unauthorized
        );
        assert_eq!(
            s.start_party_campaign(ALICE, PartyId(50)).unwrap_err().kind(),
            ErrorKind::InsufficientResource
        );
        assert!(s.campaigns().next().is_none());
    }
}
