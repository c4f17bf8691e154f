use libsql::{Builder, Connection, Database};
use reminder_core::error::{RemindError, Result};
use reminder_core::types::{new_id, now_unix, PendingConfirmation};

pub struct PendingStore {
    db: Database,
    draft_ttl_sec: i64,
}

fn db_err(e: libsql::Error) -> RemindError {
    RemindError::Store(e.to_string())
}

fn get_optional_i64(row: &libsql::Row, idx: i32) -> Result<Option<i64>> {
    match row.get::<libsql::Value>(idx).map_err(db_err)? {
        libsql::Value::Null => Ok(None),
        libsql::Value::Integer(i) => Ok(Some(i)),
        other => Err(RemindError::Store(format!("expected integer or null at column {idx}, got: {other:?}"))),
    }
}

const SELECT_COLUMNS: &str = "draft_id, session_id, ts, entity_type, proposed_payload, expires_at, committed_at";

fn row_to_draft(row: &libsql::Row) -> Result<PendingConfirmation> {
    let payload_json = row.get::<String>(4).map_err(db_err)?;
    Ok(PendingConfirmation {
        draft_id: row.get::<String>(0).map_err(db_err)?,
        session_id: row.get::<String>(1).map_err(db_err)?,
        ts: row.get::<i64>(2).map_err(db_err)?,
        entity_type: row.get::<String>(3).map_err(db_err)?,
        proposed_payload: serde_json::from_str(&payload_json).map_err(|e| RemindError::Store(e.to_string()))?,
        expires_at: row.get::<i64>(5).map_err(db_err)?,
        committed_at: get_optional_i64(row, 6)?,
    })
}

/// Default draft lifetime before `expire` sweeps it, used when the caller
/// doesn't override `DRAFT_TTL_SEC`.
pub const DEFAULT_DRAFT_TTL_SEC: i64 = 600;

impl PendingStore {
    /// `draft_ttl_sec` is the configured `DRAFT_TTL_SEC` (spec.md §6); every
    /// `create` call stamps `expires_at` using this value.
    pub async fn new(path: &str, draft_ttl_sec: i64) -> Result<Self> {
        let db = Builder::new_local(path).build().await.map_err(db_err)?;
        let store = Self { db, draft_ttl_sec };
        store.init_tables().await?;
        Ok(store)
    }

    fn conn(&self) -> Result<Connection> {
        self.db.connect().map_err(db_err)
    }

    async fn init_tables(&self) -> Result<()> {
        self.conn()?
            .execute(
                "CREATE TABLE IF NOT EXISTS pending_confirmations (
                    draft_id TEXT PRIMARY KEY,
                    session_id TEXT NOT NULL,
                    ts INTEGER NOT NULL,
                    entity_type TEXT NOT NULL,
                    proposed_payload TEXT NOT NULL,
                    expires_at INTEGER NOT NULL,
                    committed_at INTEGER
                )",
                (),
            )
            .await
            .map_err(db_err)?;
        self.conn()?
            .execute(
                "CREATE INDEX IF NOT EXISTS pending_session_idx ON pending_confirmations(session_id, ts)",
                (),
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn create(
        &self,
        session_id: &str,
        entity_type: &str,
        proposed_payload: serde_json::Value,
    ) -> Result<PendingConfirmation> {
        let ts = now_unix();
        let draft = PendingConfirmation {
            draft_id: new_id(),
            session_id: session_id.to_string(),
            ts,
            entity_type: entity_type.to_string(),
            proposed_payload,
            expires_at: ts + self.draft_ttl_sec,
            committed_at: None,
        };
        let payload_json = serde_json::to_string(&draft.proposed_payload).map_err(|e| RemindError::Store(e.to_string()))?;
        self.conn()?
            .execute(
                "INSERT INTO pending_confirmations (draft_id, session_id, ts, entity_type, \
                 proposed_payload, expires_at, committed_at) VALUES (?1,?2,?3,?4,?5,?6,?7)",
                libsql::params![
                    draft.draft_id.clone(),
                    draft.session_id.clone(),
                    draft.ts,
                    draft.entity_type.clone(),
                    payload_json,
                    draft.expires_at,
                    draft.committed_at,
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(draft)
    }

    pub async fn get(&self, draft_id: &str) -> Result<Option<PendingConfirmation>> {
        let mut rows = self
            .conn()?
            .query(
                &format!("SELECT {SELECT_COLUMNS} FROM pending_confirmations WHERE draft_id = ?1"),
                libsql::params![draft_id.to_string()],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_draft(&row)?)),
            None => Ok(None),
        }
    }

    /// Patch a live draft's payload. This is the only mutation path drafts
    /// allow — direct overwrite of a committed or expired draft is refused.
    pub async fn patch(&self, draft_id: &str, patched_payload: serde_json::Value, now: i64) -> Result<PendingConfirmation> {
        let draft = self
            .get(draft_id)
            .await?
            .ok_or_else(|| RemindError::NotFound(format!("draft {draft_id}")))?;
        if draft.committed_at.is_some() {
            return Err(RemindError::State {
                from: "committed".to_string(),
                to: "patched".to_string(),
            });
        }
        if now > draft.expires_at {
            return Err(RemindError::State {
                from: "expired".to_string(),
                to: "patched".to_string(),
            });
        }
        let payload_json = serde_json::to_string(&patched_payload).map_err(|e| RemindError::Store(e.to_string()))?;
        self.conn()?
            .execute(
                "UPDATE pending_confirmations SET proposed_payload = ?1 WHERE draft_id = ?2",
                libsql::params![payload_json, draft_id.to_string()],
            )
            .await
            .map_err(db_err)?;
        self.get(draft_id).await?.ok_or_else(|| RemindError::NotFound(format!("draft {draft_id}")))
    }

    pub async fn commit(&self, draft_id: &str, now: i64) -> Result<PendingConfirmation> {
        self.conn()?
            .execute(
                "UPDATE pending_confirmations SET committed_at = ?1 WHERE draft_id = ?2",
                libsql::params![now, draft_id.to_string()],
            )
            .await
            .map_err(db_err)?;
        self.get(draft_id).await?.ok_or_else(|| RemindError::NotFound(format!("draft {draft_id}")))
    }

    /// Sweep drafts past `expires_at`. Returns how many were removed.
    pub async fn expire(&self, now: i64) -> Result<u64> {
        let affected = self
            .conn()?
            .execute(
                "DELETE FROM pending_confirmations WHERE committed_at IS NULL AND expires_at < ?1",
                libsql::params![now],
            )
            .await
            .map_err(db_err)?;
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_patch_commit_round_trip() {
        let store = PendingStore::new(":memory:", DEFAULT_DRAFT_TTL_SEC).await.unwrap();

        let draft = store
            .create("session-a", "reminder", serde_json::json!({ "message": "call mom" }))
            .await
            .unwrap();
        assert_eq!(draft.expires_at, draft.ts + DEFAULT_DRAFT_TTL_SEC);
        assert!(draft.committed_at.is_none());

        let patched = store
            .patch(&draft.draft_id, serde_json::json!({ "message": "call dad" }), draft.ts)
            .await
            .unwrap();
        assert_eq!(patched.proposed_payload["message"], "call dad");

        let committed = store.commit(&draft.draft_id, draft.ts).await.unwrap();
        assert!(committed.committed_at.is_some());

        // A committed draft can no longer be patched.
        let err = store.patch(&draft.draft_id, serde_json::json!({ "message": "too late" }), draft.ts).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn patch_refuses_expired_draft() {
        let store = PendingStore::new(":memory:", 1).await.unwrap();
        let draft = store.create("session-b", "reminder", serde_json::json!({ "message": "x" })).await.unwrap();
        let err = store.patch(&draft.draft_id, serde_json::json!({ "message": "y" }), draft.expires_at + 1).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn expire_sweeps_only_uncommitted_past_deadline() {
        let store = PendingStore::new(":memory:", 1).await.unwrap();
        let draft = store.create("session-c", "reminder", serde_json::json!({ "message": "x" })).await.unwrap();

        let swept = store.expire(draft.expires_at + 1).await.unwrap();
        assert_eq!(swept, 1);
        assert!(store.get(&draft.draft_id).await.unwrap().is_none());
    }
}
