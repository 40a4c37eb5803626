#![deny(warnings)]

//! Core domain models and invariants for the Polity simulation.
//!
//! This crate defines the serializable entities every other crate shares,
//! the game configuration, the error taxonomy, and validation helpers that
//! guard basic invariants at session setup.

pub mod config;
mod error;
pub mod ids;
pub mod model;

pub use config::{validate_config, GameConfig};
pub use error::{ErrorKind, SimError, ValidationError};
pub use ids::*;
pub use model::*;

use rust_decimal::Decimal;
use std::collections::BTreeSet;

/// Lowest reachable reputation score.
pub const REPUTATION_MIN: f64 = -100.0;
/// Highest reachable reputation score.
pub const REPUTATION_MAX: f64 = 100.0;

/// Validate a demographic slice.
pub fn validate_slice(s: &DemographicSlice) -> Result<(), ValidationError> {
    if s.province.trim().is_empty() {
        return Err(ValidationError::EmptyField("slice.province"));
    }
    if s.occupation.trim().is_empty() {
        return Err(ValidationError::EmptyField("slice.occupation"));
    }
    Ok(())
}

/// Validate the demographic registry: each slice, and id uniqueness.
pub fn validate_registry(slices: &[DemographicSlice]) -> Result<(), ValidationError> {
    let mut ids = BTreeSet::new();
    for s in slices {
        validate_slice(s)?;
        if !ids.insert(s.id) {
            return Err(ValidationError::DuplicateId {
                kind: "slice",
                id: s.id.0,
            });
        }
    }
    Ok(())
}

/// Validate a player against the configured AP ceiling.
pub fn validate_player(p: &Player, cfg: &GameConfig) -> Result<(), ValidationError> {
    if p.name.trim().is_empty() {
        return Err(ValidationError::EmptyField("player.name"));
    }
    if p.cash < Decimal::ZERO {
        return Err(ValidationError::NegativeMoney);
    }
    if p.actions_remaining > cfg.max_action_points {
        return Err(ValidationError::ActionPointCeiling {
            base: p.actions_remaining,
            max: cfg.max_action_points,
        });
    }
    Ok(())
}

/// Validate impacts carry finite numbers and non-negative multipliers.
pub fn validate_impacts(impacts: &[Impact]) -> Result<(), ValidationError> {
    for i in impacts {
        let ok = match i {
            Impact::Gdp { percent } => percent.is_finite(),
            Impact::Reputation { delta, .. } => delta.is_finite(),
            Impact::ResourcePrice {
                resource,
                multiplier,
            } => {
                if resource.trim().is_empty() {
                    return Err(ValidationError::EmptyField("impact.resource"));
                }
                multiplier.is_finite() && *multiplier >= 0.0
            }
        };
        if !ok {
            return Err(ValidationError::NonFinite);
        }
    }
    Ok(())
}
