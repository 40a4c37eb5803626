//! Player actions outside the big lifecycles: endorsements, news, resource
//! prospecting and parties.

use rand::Rng;
use rust_decimal::Decimal;
use sim_ai::{reputation_impacts, Analysis, AnalysisError};
use sim_core::{
    ActionKind, ArticleId, Discovery, ElectionStatus, Endorsement, EndorsementId, Impact,
    NewsArticle, Party, PartyId, PlayerId, SimError, SliceTransfer, SourceKind, ValidationError,
};
use sim_reputation::{ImpactPreview, Metadata};
use tracing::{info, warn};

use crate::state::SessionState;

/// Reputation points per unit of `sentiment * severity` from text analysis.
pub const ANALYSIS_REPUTATION_SCALE: f64 = 10.0;

impl SessionState {
    /// Endorse another player. Every slice in the registry contributes a
    /// transfer scaled by the endorser's own standing there; non-zero
    /// transfers are applied to the endorsed player. One per endorser per turn.
    pub fn endorse(
        &mut self,
        endorser: PlayerId,
        endorsed: PlayerId,
    ) -> Result<EndorsementId, SimError> {
        self.ensure_active()?;
        self.player(endorser)?;
        let endorsed_is_candidate = self.player(endorsed)?.is_candidate;
        if endorser == endorsed {
            return Err(SimError::invalid_state("players cannot endorse themselves"));
        }
        let turn = self.session.current_turn;
        if self
            .endorsements
            .iter()
            .any(|e| e.endorser == endorser && e.turn == turn)
        {
            return Err(SimError::Conflict(format!(
                "player {endorser} already endorsed this turn"
            )));
        }
        let ap = self.check_action_points(endorser, ActionKind::Endorse)?;
        self.charge(endorser, ActionKind::Endorse, ap)?;

        let id = EndorsementId(self.next_id());
        let transfers = self
            .engine
            .endorsement_transfers(&self.reputation, &self.slices, endorser);
        let source = self.source(SourceKind::Endorsement, id);
        let mut meta = Metadata::new();
        meta.insert("endorser".to_string(), endorser.to_string());
        let applied =
            self.engine
                .apply_transfers(&mut self.reputation, endorsed, &transfers, source, &meta)?;

        if endorsed_is_candidate {
            for e in self.elections.values_mut() {
                if e.status == ElectionStatus::Completed {
                    continue;
                }
                if let Some(c) = e.candidates.iter_mut().find(|c| c.player == endorsed) {
                    if !c.endorsements.contains(&endorser) {
                        c.endorsements.push(endorser);
                    }
                }
            }
        }
        self.endorsements.push(Endorsement {
            id,
            session: self.session.id,
            endorser,
            endorsed,
            turn,
            transfers,
        });
        info!(endorsement = %id, %endorser, %endorsed, applied = applied.len(), "endorsement recorded");
        Ok(id)
    }

    /// Same transfers `endorse` would apply, weighted by slice population.
    pub fn preview_endorsement(&self, endorser: PlayerId) -> Result<Vec<ImpactPreview>, SimError> {
        self.player(endorser)?;
        let transfers = self
            .engine
            .endorsement_transfers(&self.reputation, &self.slices, endorser);
        Ok(self.engine.impact_preview(&self.slices, &transfers))
    }

    /// Everything `record_article` checks, minus the analysis. Lets callers
    /// fail fast before calling the analyzer.
    pub fn check_news(&self, author: PlayerId, subject: PlayerId) -> Result<(), SimError> {
        self.ensure_active()?;
        if self.player(author)?.newspaper.is_none() {
            return Err(SimError::unauthorized(format!(
                "player {author} does not own a newspaper"
            )));
        }
        self.player(subject)?;
        self.check_action_points(author, ActionKind::PublishNews)?;
        Ok(())
    }

    /// Record an article. A failed analysis still records the article, but
    /// with no reputation effect.
    pub fn record_article(
        &mut self,
        author: PlayerId,
        subject: PlayerId,
        headline: impl Into<String>,
        analysis: Result<Analysis, AnalysisError>,
    ) -> Result<ArticleId, SimError> {
        let headline = headline.into();
        if headline.trim().is_empty() {
            return Err(ValidationError::EmptyField("article.headline").into());
        }
        self.check_news(author, subject)?;
        let ap = self.check_action_points(author, ActionKind::PublishNews)?;
        self.charge(author, ActionKind::PublishNews, ap)?;

        let id = ArticleId(self.next_id());
        let (category, applied, analysis_failed) = match analysis {
            Ok(a) => {
                let transfers: Vec<SliceTransfer> =
                    reputation_impacts(&a, &self.slices, ANALYSIS_REPUTATION_SCALE)
                        .into_iter()
                        .filter_map(|i| match i {
                            Impact::Reputation { slice, delta } => {
                                Some(SliceTransfer { slice, delta })
                            }
                            Impact::Gdp { .. } | Impact::ResourcePrice { .. } => None,
                        })
                        .collect();
                let source = self.source(SourceKind::News, id);
                let mut meta = Metadata::new();
                meta.insert("author".to_string(), author.to_string());
                meta.insert("category".to_string(), a.category.clone());
                self.engine
                    .apply_transfers(&mut self.reputation, subject, &transfers, source, &meta)?;
                (Some(a.category), transfers, false)
            }
            Err(err) => {
                warn!(article = %id, error = %err, "news analysis failed; article kept without effect");
                (None, Vec::new(), true)
            }
        };
        self.articles.push(NewsArticle {
            id,
            session: self.session.id,
            author,
            subject,
            headline,
            turn: self.session.current_turn,
            category,
            applied,
            analysis_failed,
        });
        Ok(id)
    }

    /// Prospect for resources in a province. Success is a roll of the
    /// session RNG against the configured probability for `technology`.
    pub fn prospect(
        &mut self,
        player: PlayerId,
        province: &str,
        technology: Option<&str>,
    ) -> Result<Option<Discovery>, SimError> {
        self.ensure_active()?;
        self.require_province(province)?;
        let ap = self.check_action_points(player, ActionKind::Prospect)?;
        self.charge(player, ActionKind::Prospect, ap)?;

        let chance = self.config.discovery.probability(technology);
        let roll: f64 = self.rng.gen();
        if roll >= chance {
            return Ok(None);
        }
        let reward = self.config.discovery.reward;
        self.player_mut(player)?.cash += reward;
        let found = Discovery {
            player,
            province: province.to_string(),
            technology: technology.map(str::to_string),
            turn: self.session.current_turn,
            reward,
        };
        self.discoveries.push(found.clone());
        info!(%player, province, "resource discovered");
        Ok(Some(found))
    }

    pub fn create_party(
        &mut self,
        founder: PlayerId,
        name: impl Into<String>,
    ) -> Result<PartyId, SimError> {
        self.ensure_active()?;
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyField("party.name").into());
        }
        if self.player(founder)?.party.is_some() {
            return Err(SimError::invalid_state(format!(
                "player {founder} already belongs to a party"
            )));
        }
        if self.parties.values().any(|p| p.name == name) {
            return Err(SimError::Conflict(format!("party {name} already exists")));
        }
        let ap = self.check_action_points(founder, ActionKind::CreateParty)?;
        self.charge(founder, ActionKind::CreateParty, ap)?;
        let id = PartyId(self.next_id());
        self.parties.insert(
            id,
            Party {
                id,
                name,
                leader: Some(founder),
                members: vec![founder],
                treasury: Decimal::ZERO,
            },
        );
        self.player_mut(founder)?.party = Some(id);
        info!(party = %id, %founder, "party founded");
        Ok(id)
    }

    pub fn join_party(&mut self, player: PlayerId, party: PartyId) -> Result<(), SimError> {
        self.ensure_active()?;
        self.party(party)?;
        if self.player(player)?.party.is_some() {
            return Err(SimError::invalid_state(format!(
                "player {player} already belongs to a party"
            )));
        }
        let ap = self.check_action_points(player, ActionKind::JoinParty)?;
        self.charge(player, ActionKind::JoinParty, ap)?;
        if let Some(p) = self.parties.get_mut(&party) {
            p.members.push(player);
            if p.leader.is_none() {
                p.leader = Some(player);
            }
        }
        self.player_mut(player)?.party = Some(party);
        Ok(())
    }

    /// A leader can only leave once every other member has gone.
    pub fn leave_party(&mut self, player: PlayerId) -> Result<(), SimError> {
        self.ensure_active()?;
        let party = self
            .player(player)?
            .party
            .ok_or_else(|| SimError::invalid_state(format!("player {player} has no party")))?;
        let p = self.party(party)?;
        if p.leader == Some(player) && p.members.len() > 1 {
            return Err(SimError::invalid_state(
                "the leader cannot leave while other members remain",
            ));
        }
        let ap = self.check_action_points(player, ActionKind::LeaveParty)?;
        self.charge(player, ActionKind::LeaveParty, ap)?;
        if let Some(p) = self.parties.get_mut(&party) {
            p.members.retain(|m| *m != player);
            if p.leader == Some(player) {
                p.leader = None;
            }
        }
        self.player_mut(player)?.party = None;
        Ok(())
    }

    /// Credit the party treasury and grant its leader bonus AP. Returns the
    /// new treasury balance.
    pub fn fundraise(&mut self, player: PlayerId) -> Result<Decimal, SimError> {
        self.ensure_active()?;
        let party = self
            .player(player)?
            .party
            .ok_or_else(|| SimError::invalid_state(format!("player {player} has no party")))?;
        let ap = self.check_action_points(player, ActionKind::Fundraise)?;
        self.charge(player, ActionKind::Fundraise, ap)?;
        let amount = self.config.party.fundraising_amount;
        let bonus = self.config.party.leader_bonus_ap;
        let (treasury, leader) = match self.parties.get_mut(&party) {
            Some(p) => {
                p.treasury += amount;
                (p.treasury, p.leader)
            }
            None => return Err(SimError::not_found("party", party)),
        };
        if let Some(leader) = leader {
            self.grant(leader, bonus)?;
        }
        info!(%party, %player, %treasury, "fundraiser held");
        Ok(treasury)
    }
}
