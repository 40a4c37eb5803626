use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for domain invariants and configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Numeric field must be finite.
    #[error("non-finite numeric value encountered")]
    NonFinite,
    /// Money must be non-negative.
    #[error("negative monetary value is invalid")]
    NegativeMoney,
    /// Names and labels must not be blank.
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    /// Two entities of one kind share an id.
    #[error("duplicate {kind} id {id}")]
    DuplicateId { kind: &'static str, id: u64 },
    /// A reference points at an entity that does not exist.
    #[error("{kind} {id} referenced but not defined")]
    DanglingReference { kind: &'static str, id: u64 },
    /// Base allotment exceeds the hard ceiling.
    #[error("base action points {base} exceed ceiling {max}")]
    ActionPointCeiling { base: u32, max: u32 },
    /// A turn must last some time.
    #[error("turn cadence must be > 0")]
    ZeroCadence,
    /// A configured range is empty or out of bounds.
    #[error("invalid range for {0}")]
    InvalidRange(&'static str),
}

/// The six failure classes callers branch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    InsufficientResource,
    Unauthorized,
    Conflict,
    ExternalDependencyFailure,
}

/// Errors surfaced by simulation operations.
#[derive(Debug, Error, PartialEq)]
pub enum SimError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("insufficient action points: required {required}, available {available}")]
    InsufficientActionPoints { required: u32, available: u32 },
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("player {player} already has an active campaign on slice {slice}")]
    DuplicateActiveCampaign { player: u64, slice: u64 },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("turn {turn} is already being processed")]
    TurnInProgress { turn: u64 },
    #[error("external dependency failed: {0}")]
    External(String),
    #[error("persistence failed: {0}")]
    Persistence(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl SimError {
    pub fn not_found(kind: &'static str, id: impl Into<u64>) -> Self {
        SimError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        SimError::InvalidState(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        SimError::Unauthorized(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SimError::NotFound { .. } => ErrorKind::NotFound,
            SimError::InvalidState(_) | SimError::Validation(_) => ErrorKind::InvalidState,
            SimError::InsufficientActionPoints { .. } | SimError::InsufficientFunds { .. } => {
                ErrorKind::InsufficientResource
            }
            SimError::Unauthorized(_) => ErrorKind::Unauthorized,
            SimError::DuplicateActiveCampaign { .. }
            | SimError::Conflict(_)
            | SimError::TurnInProgress { .. } => ErrorKind::Conflict,
            SimError::External(_) | SimError::Persistence(_) => {
                ErrorKind::ExternalDependencyFailure
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_cover_resource_and_conflict_variants() {
        let ap = SimError::InsufficientActionPoints {
            required: 1,
            available: 0,
        };
        let cash = SimError::InsufficientFunds {
            required: Decimal::ONE,
            available: Decimal::ZERO,
        };
        assert_eq!(ap.kind(), ErrorKind::InsufficientResource);
        assert_eq!(cash.kind(), ErrorKind::InsufficientResource);
        assert_eq!(SimError::TurnInProgress { turn: 3 }.kind(), ErrorKind::Conflict);
        assert_eq!(
            SimError::DuplicateActiveCampaign { player: 1, slice: 2 }.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            SimError::from(ValidationError::NonFinite).kind(),
            ErrorKind::InvalidState
        );
    }

    #[test]
    fn messages_name_the_entity() {
        let e = SimError::not_found("policy", 9u64);
        assert_eq!(e.to_string(), "policy 9 not found");
    }
}
