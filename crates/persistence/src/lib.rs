#![deny(warnings)]

//! Persistence layer: the store interface the runtime writes through, an
//! in-memory implementation for tests and tools, and the SQLite store.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{init_db, SqliteStore};

use async_trait::async_trait;
use serde_json::Value;
use sim_core::{
    ActionKind, ActionRecord, ReputationChange, SessionId, SessionSnapshot, SessionStatus,
    SimError, Turn,
};
use thiserror::Error;

/// Returns the default SQLite URL used for local saves.
pub fn default_sqlite_url() -> &'static str {
    "sqlite://./saves/polity.db"
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<StoreError> for SimError {
    fn from(e: StoreError) -> Self {
        SimError::Persistence(e.to_string())
    }
}

/// Listing row for saved sessions.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSummary {
    pub id: SessionId,
    pub name: String,
    pub status: SessionStatus,
    pub current_turn: Turn,
}

impl SessionSummary {
    pub fn of(snapshot: &SessionSnapshot) -> Self {
        Self {
            id: snapshot.session.id,
            name: snapshot.session.name.clone(),
            status: snapshot.session.status,
            current_turn: snapshot.session.current_turn,
        }
    }
}

/// Durable storage for sessions. The runtime is the single writer per
/// session, so implementations only need last-write-wins per session id.
#[async_trait]
pub trait Store: Send + Sync + std::fmt::Debug {
    async fn save_session(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError>;
    async fn load_session(&self, id: SessionId) -> Result<Option<SessionSnapshot>, StoreError>;
    /// Append-only; records are never updated.
    async fn append_actions(&self, records: &[ActionRecord]) -> Result<(), StoreError>;
    async fn load_actions(&self, id: SessionId) -> Result<Vec<ActionRecord>, StoreError>;
    /// Append-only, in log order.
    async fn append_reputation_changes(
        &self,
        id: SessionId,
        changes: &[ReputationChange],
    ) -> Result<(), StoreError>;
    async fn load_reputation_changes(&self, id: SessionId)
        -> Result<Vec<ReputationChange>, StoreError>;
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, StoreError>;
}

pub(crate) fn kind_to_text(kind: ActionKind) -> Result<String, StoreError> {
    match serde_json::to_value(kind)? {
        Value::String(s) => Ok(s),
        other => Err(StoreError::Corrupt(format!("unexpected action kind encoding {other}"))),
    }
}

pub(crate) fn kind_from_text(text: &str) -> Result<ActionKind, StoreError> {
    Ok(serde_json::from_value(Value::String(text.to_string()))?)
}

pub(crate) fn status_to_text(status: SessionStatus) -> Result<String, StoreError> {
    match serde_json::to_value(status)? {
        Value::String(s) => Ok(s),
        other => Err(StoreError::Corrupt(format!("unexpected status encoding {other}"))),
    }
}

pub(crate) fn status_from_text(text: &str) -> Result<SessionStatus, StoreError> {
    Ok(serde_json::from_value(Value::String(text.to_string()))?)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use sim_core::*;

    pub fn snapshot(id: u64, turn: Turn) -> SessionSnapshot {
        SessionSnapshot {
            session: Session {
                id: SessionId(id),
                name: format!("session-{id}"),
                gamemaster: PlayerId(1),
                status: SessionStatus::Running,
                current_turn: turn,
                auto_advance: true,
                in_game_start: chrono::NaiveDate::from_ymd_opt(1990, 1, 1),
                turn_started_at: Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
                turn_ends_at: Some(Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap()),
            },
            config: GameConfig::default(),
            players: vec![Player::new(PlayerId(1), "GM", Decimal::new(10, 0))],
            parties: vec![],
            slices: vec![],
            reputations: vec![],
            campaigns: vec![],
            policies: vec![],
            elections: vec![],
            offices: vec![],
            endorsements: vec![],
            articles: vec![],
            discoveries: vec![],
            economy: Economy::default(),
            ids: IdAllocator::starting_after(1),
        }
    }

    pub fn record(session: u64, player: u64, turn: Turn, kind: ActionKind) -> ActionRecord {
        ActionRecord {
            session: SessionId(session),
            player: PlayerId(player),
            turn,
            kind,
            cost: 1,
            at: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
        }
    }

    pub fn change(player: u64, slice: u64, turn: Turn, delta: f64) -> ReputationChange {
        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("start_turn".to_string(), turn.to_string());
        ReputationChange {
            player: PlayerId(player),
            slice: SliceId(slice),
            delta,
            previous: 0.0,
            current: delta,
            source: Source::new(SourceKind::Campaign, 9u64, turn),
            metadata,
        }
    }
}
