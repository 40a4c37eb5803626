use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sim_core::{ActionRecord, PlayerId, ReputationChange, SessionId, SessionSnapshot};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

use crate::{
    kind_from_text, kind_to_text, status_from_text, status_to_text, SessionSummary, Store,
    StoreError,
};

/// Open (creating if missing) the database at `url`, e.g. `sqlite::memory:`
/// or `sqlite://./saves/polity.db`, and run migrations.
pub async fn init_db(url: &str) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    // Each in-memory connection is its own database.
    let in_memory = url.contains(":memory:");
    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 5 })
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!(url, "database ready");
    Ok(pool)
}

/// SQLite-backed store. Sessions are stored as one JSON snapshot per row
/// with a few indexed columns; action records and reputation changes get a
/// row each.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Ok(Self {
            pool: init_db(url).await?,
        })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_i64(v: u64, what: &str) -> Result<i64, StoreError> {
    i64::try_from(v).map_err(|_| StoreError::Corrupt(format!("{what} {v} exceeds i64")))
}

fn to_u64(v: i64, what: &str) -> Result<u64, StoreError> {
    u64::try_from(v).map_err(|_| StoreError::Corrupt(format!("negative {what} {v}")))
}

fn parse_time(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {text}: {e}")))
}

fn action_from_row(row: &SqliteRow) -> Result<ActionRecord, StoreError> {
    let kind: String = row.try_get("kind")?;
    let at: String = row.try_get("at")?;
    Ok(ActionRecord {
        session: SessionId(to_u64(row.try_get("session_id")?, "session id")?),
        player: PlayerId(to_u64(row.try_get("player_id")?, "player id")?),
        turn: to_u64(row.try_get("turn")?, "turn")?,
        kind: kind_from_text(&kind)?,
        cost: u32::try_from(row.try_get::<i64, _>("cost")?)
            .map_err(|_| StoreError::Corrupt("cost out of range".to_string()))?,
        at: parse_time(&at)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn save_session(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        let s = &snapshot.session;
        let json = serde_json::to_string(snapshot)?;
        sqlx::query(
            "INSERT INTO sessions (id, name, status, current_turn, turn_started_at, turn_ends_at, snapshot_json, saved_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, status = excluded.status, \
             current_turn = excluded.current_turn, turn_started_at = excluded.turn_started_at, \
             turn_ends_at = excluded.turn_ends_at, snapshot_json = excluded.snapshot_json, \
             saved_at = excluded.saved_at",
        )
        .bind(to_i64(s.id.0, "session id")?)
        .bind(&s.name)
        .bind(status_to_text(s.status)?)
        .bind(to_i64(s.current_turn, "turn")?)
        .bind(s.turn_started_at.map(|t| t.to_rfc3339()))
        .bind(s.turn_ends_at.map(|t| t.to_rfc3339()))
        .bind(json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        debug!(session = %s.id, turn = s.current_turn, "session saved");
        Ok(())
    }

    async fn load_session(&self, id: SessionId) -> Result<Option<SessionSnapshot>, StoreError> {
        let row = sqlx::query("SELECT snapshot_json FROM sessions WHERE id = ?")
            .bind(to_i64(id.0, "session id")?)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let json: String = row.try_get("snapshot_json")?;
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn append_actions(&self, records: &[ActionRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                "INSERT INTO action_records (session_id, player_id, turn, kind, cost, at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(to_i64(r.session.0, "session id")?)
            .bind(to_i64(r.player.0, "player id")?)
            .bind(to_i64(r.turn, "turn")?)
            .bind(kind_to_text(r.kind)?)
            .bind(i64::from(r.cost))
            .bind(r.at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_actions(&self, id: SessionId) -> Result<Vec<ActionRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT session_id, player_id, turn, kind, cost, at FROM action_records WHERE session_id = ? ORDER BY id",
        )
        .bind(to_i64(id.0, "session id")?)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(action_from_row).collect()
    }

    async fn append_reputation_changes(
        &self,
        id: SessionId,
        changes: &[ReputationChange],
    ) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }
        let session = to_i64(id.0, "session id")?;
        let mut tx = self.pool.begin().await?;
        for c in changes {
            sqlx::query(
                "INSERT INTO reputation_changes (session_id, player_id, slice_id, turn, change_json) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(session)
            .bind(to_i64(c.player.0, "player id")?)
            .bind(to_i64(c.slice.0, "slice id")?)
            .bind(to_i64(c.source.turn, "turn")?)
            .bind(serde_json::to_string(c)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(session = %id, count = changes.len(), "reputation changes appended");
        Ok(())
    }

    async fn load_reputation_changes(
        &self,
        id: SessionId,
    ) -> Result<Vec<ReputationChange>, StoreError> {
        let rows = sqlx::query(
            "SELECT change_json FROM reputation_changes WHERE session_id = ? ORDER BY id",
        )
        .bind(to_i64(id.0, "session id")?)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<ReputationChange, StoreError> {
                let json: String = row.try_get("change_json")?;
                Ok(serde_json::from_str(&json)?)
            })
            .collect()
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let rows = sqlx::query("SELECT id, name, status, current_turn FROM sessions ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<SessionSummary, StoreError> {
                let status: String = row.try_get("status")?;
                Ok(SessionSummary {
                    id: SessionId(to_u64(row.try_get("id")?, "session id")?),
                    name: row.try_get("name")?,
                    status: status_from_text(&status)?,
                    current_turn: to_u64(row.try_get("current_turn")?, "turn")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{change, record, snapshot};
    use sim_core::{ActionKind, SessionStatus};

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn snapshot_survives_upsert() {
        let store = store().await;
        let mut snap = snapshot(4, 1);
        store.save_session(&snap).await.unwrap();
        snap.session.current_turn = 2;
        snap.session.status = SessionStatus::Paused;
        store.save_session(&snap).await.unwrap();

        let loaded = store.load_session(SessionId(4)).await.unwrap().unwrap();
        assert_eq!(loaded, snap);
        let listed = store.list_sessions().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, SessionStatus::Paused);
        assert_eq!(listed[0].current_turn, 2);
    }

    #[tokio::test]
    async fn missing_session_is_none() {
        assert!(store().await.load_session(SessionId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn actions_append_in_order() {
        let store = store().await;
        store
            .append_actions(&[
                record(1, 3, 1, ActionKind::Endorse),
                record(1, 3, 1, ActionKind::Prospect),
                record(2, 5, 1, ActionKind::Fundraise),
            ])
            .await
            .unwrap();
        store.append_actions(&[]).await.unwrap();
        let got = store.load_actions(SessionId(1)).await.unwrap();
        assert_eq!(
            got.iter().map(|r| r.kind).collect::<Vec<_>>(),
            vec![ActionKind::Endorse, ActionKind::Prospect]
        );
        assert_eq!(got[0], record(1, 3, 1, ActionKind::Endorse));
    }

    #[tokio::test]
    async fn reputation_changes_stay_out_of_the_snapshot() {
        let store = store().await;
        store.save_session(&snapshot(2, 1)).await.unwrap();
        store
            .append_reputation_changes(SessionId(2), &[change(1, 10, 1, 2.0), change(1, 11, 1, -0.5)])
            .await
            .unwrap();
        store
            .append_reputation_changes(SessionId(3), &[change(1, 10, 1, 9.0)])
            .await
            .unwrap();
        store.append_reputation_changes(SessionId(2), &[]).await.unwrap();

        let got = store.load_reputation_changes(SessionId(2)).await.unwrap();
        assert_eq!(got, vec![change(1, 10, 1, 2.0), change(1, 11, 1, -0.5)]);
        let row = sqlx::query("SELECT snapshot_json FROM sessions WHERE id = 2")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let json: String = row.try_get("snapshot_json").unwrap();
        assert!(!json.contains("start_turn"));
    }
}
