use libsql::{Builder, Connection, Database};
use reminder_core::error::{RemindError, Result};
use reminder_core::types::{new_token, now_unix, ActionLedgerEntry, LedgerOperation};

pub struct LedgerStore {
    db: Database,
    undo_window_sec: i64,
}

fn db_err(e: libsql::Error) -> RemindError {
    RemindError::Store(e.to_string())
}

fn get_optional_string(row: &libsql::Row, idx: i32) -> Result<Option<String>> {
    match row.get::<libsql::Value>(idx).map_err(db_err)? {
        libsql::Value::Null => Ok(None),
        libsql::Value::Text(s) => Ok(Some(s)),
        other => Err(RemindError::Store(format!("expected text or null at column {idx}, got: {other:?}"))),
    }
}

fn get_optional_i64(row: &libsql::Row, idx: i32) -> Result<Option<i64>> {
    match row.get::<libsql::Value>(idx).map_err(db_err)? {
        libsql::Value::Null => Ok(None),
        libsql::Value::Integer(i) => Ok(Some(i)),
        other => Err(RemindError::Store(format!("expected integer or null at column {idx}, got: {other:?}"))),
    }
}

const SELECT_COLUMNS: &str =
    "action_id, session_id, ts, entity_type, entity_id, operation, before_snapshot, \
     after_snapshot, undo_token, undo_expiry, undone_at";

fn row_to_entry(row: &libsql::Row) -> Result<ActionLedgerEntry> {
    let operation_str = row.get::<String>(5).map_err(db_err)?;
    let before_snapshot = match get_optional_string(row, 6)? {
        Some(s) => Some(serde_json::from_str(&s).map_err(|e| RemindError::Store(e.to_string()))?),
        None => None,
    };
    let after_snapshot: serde_json::Value =
        serde_json::from_str(&row.get::<String>(7).map_err(db_err)?).map_err(|e| RemindError::Store(e.to_string()))?;

    Ok(ActionLedgerEntry {
        action_id: row.get::<String>(0).map_err(db_err)?,
        session_id: row.get::<String>(1).map_err(db_err)?,
        ts: row.get::<i64>(2).map_err(db_err)?,
        entity_type: row.get::<String>(3).map_err(db_err)?,
        entity_id: row.get::<String>(4).map_err(db_err)?,
        operation: LedgerOperation::parse(&operation_str)
            .ok_or_else(|| RemindError::Store(format!("unknown ledger operation: {operation_str}")))?,
        before_snapshot,
        after_snapshot,
        undo_token: row.get::<String>(8).map_err(db_err)?,
        undo_expiry: row.get::<i64>(9).map_err(db_err)?,
        undone_at: get_optional_i64(row, 10)?,
    })
}

/// Default window within which an undo token is honored, used when the
/// caller doesn't override `UNDO_WINDOW_SEC`. New ledger entries, including
/// the entries undo itself writes, all get a fresh window.
pub const DEFAULT_UNDO_WINDOW_SEC: i64 = 1800;

impl LedgerStore {
    /// `undo_window_sec` is the configured `UNDO_WINDOW_SEC` (spec.md §6);
    /// every `record` call stamps `undo_expiry` using this value.
    pub async fn new(path: &str, undo_window_sec: i64) -> Result<Self> {
        let db = Builder::new_local(path).build().await.map_err(db_err)?;
        let store = Self { db, undo_window_sec };
        store.init_tables().await?;
        Ok(store)
    }

    fn conn(&self) -> Result<Connection> {
        self.db.connect().map_err(db_err)
    }

    async fn init_tables(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS ledger (
                action_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                ts INTEGER NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                operation TEXT NOT NULL,
                before_snapshot TEXT,
                after_snapshot TEXT NOT NULL,
                undo_token TEXT NOT NULL,
                undo_expiry INTEGER NOT NULL,
                undone_at INTEGER
            )",
            (),
        )
        .await
        .map_err(db_err)?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS ledger_session_idx ON ledger(session_id, ts)",
            (),
        )
        .await
        .map_err(db_err)?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS ledger_token_idx ON ledger(undo_token)",
            (),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Record a committed state change. Every create/update/delete of a
    /// reminder writes exactly one of these, with a fresh undo token.
    pub async fn record(
        &self,
        session_id: &str,
        entity_type: &str,
        entity_id: &str,
        operation: LedgerOperation,
        before_snapshot: Option<serde_json::Value>,
        after_snapshot: serde_json::Value,
    ) -> Result<ActionLedgerEntry> {
        let ts = now_unix();
        let entry = ActionLedgerEntry {
            action_id: reminder_core::types::new_id(),
            session_id: session_id.to_string(),
            ts,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            operation,
            before_snapshot,
            after_snapshot,
            undo_token: new_token(),
            undo_expiry: ts + self.undo_window_sec,
            undone_at: None,
        };
        self.insert(&entry).await?;
        Ok(entry)
    }

    async fn insert(&self, entry: &ActionLedgerEntry) -> Result<()> {
        let before_json = match &entry.before_snapshot {
            Some(v) => Some(serde_json::to_string(v).map_err(|e| RemindError::Store(e.to_string()))?),
            None => None,
        };
        let after_json = serde_json::to_string(&entry.after_snapshot).map_err(|e| RemindError::Store(e.to_string()))?;

        self.conn()?
            .execute(
                "INSERT INTO ledger (action_id, session_id, ts, entity_type, entity_id, operation, \
                 before_snapshot, after_snapshot, undo_token, undo_expiry, undone_at) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
                libsql::params![
                    entry.action_id.clone(),
                    entry.session_id.clone(),
                    entry.ts,
                    entry.entity_type.clone(),
                    entry.entity_id.clone(),
                    entry.operation.as_str().to_string(),
                    before_json,
                    after_json,
                    entry.undo_token.clone(),
                    entry.undo_expiry,
                    entry.undone_at,
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn find_by_token(&self, token: &str) -> Result<Option<ActionLedgerEntry>> {
        let mut rows = self
            .conn()?
            .query(
                &format!("SELECT {SELECT_COLUMNS} FROM ledger WHERE undo_token = ?1"),
                libsql::params![token.to_string()],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_entry(&row)?)),
            None => Ok(None),
        }
    }

    /// Most recent not-yet-undone entry still inside its window. Includes
    /// `Undo` entries themselves, so undoing an undo (a redo) within the
    /// fresh window that undo writes is honored the same as any other entry.
    pub async fn most_recent_undoable(&self, session_id: &str, now: i64) -> Result<Option<ActionLedgerEntry>> {
        let mut rows = self
            .conn()?
            .query(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM ledger \
                     WHERE session_id = ?1 AND undone_at IS NULL AND undo_expiry >= ?2 \
                     ORDER BY ts DESC LIMIT 1"
                ),
                libsql::params![session_id.to_string(), now],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_entry(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn mark_undone(&self, action_id: &str, now: i64) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE ledger SET undone_at = ?1 WHERE action_id = ?2",
                libsql::params![now, action_id.to_string()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoOutcome {
    Gone,
    AlreadyUndone,
}

/// Pure gate: is `entry` still inside its undo window at `now`?
pub fn is_within_window(entry: &ActionLedgerEntry, now: i64) -> std::result::Result<(), UndoOutcome> {
    if entry.undone_at.is_some() {
        return Err(UndoOutcome::AlreadyUndone);
    }
    if now > entry.undo_expiry {
        return Err(UndoOutcome::Gone);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_find_and_mark_undone_round_trip() {
        let store = LedgerStore::new(":memory:", DEFAULT_UNDO_WINDOW_SEC).await.unwrap();

        let entry = store
            .record(
                "session-a",
                "reminder",
                "42",
                LedgerOperation::Create,
                None,
                serde_json::json!({ "id": 42 }),
            )
            .await
            .unwrap();

        let found = store.find_by_token(&entry.undo_token).await.unwrap().expect("entry by token");
        assert_eq!(found.action_id, entry.action_id);
        assert_eq!(found.entity_id, "42");
        assert!(found.undone_at.is_none());

        let now = entry.ts;
        let recent = store.most_recent_undoable("session-a", now).await.unwrap().expect("undoable entry");
        assert_eq!(recent.action_id, entry.action_id);

        store.mark_undone(&entry.action_id, now).await.unwrap();
        let after = store.find_by_token(&entry.undo_token).await.unwrap().expect("entry still present");
        assert!(after.undone_at.is_some());
        assert!(store.most_recent_undoable("session-a", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn undo_entries_are_themselves_undoable() {
        let store = LedgerStore::new(":memory:", DEFAULT_UNDO_WINDOW_SEC).await.unwrap();

        let create = store
            .record("session-b", "reminder", "7", LedgerOperation::Create, None, serde_json::json!({ "id": 7 }))
            .await
            .unwrap();
        store.mark_undone(&create.action_id, create.ts).await.unwrap();

        let undo_entry = store
            .record(
                "session-b",
                "reminder",
                "7",
                LedgerOperation::Undo,
                Some(serde_json::json!({ "id": 7 })),
                serde_json::json!({ "id": 7, "restored": true }),
            )
            .await
            .unwrap();

        // Without filtering on `operation`, the undo entry itself is the
        // most recent undoable action, so it can be undone (redone) too.
        let recent = store
            .most_recent_undoable("session-b", undo_entry.ts)
            .await
            .unwrap()
            .expect("undo entry should be undoable");
        assert_eq!(recent.action_id, undo_entry.action_id);
        assert_eq!(recent.operation, LedgerOperation::Undo);
    }

    #[tokio::test]
    async fn custom_undo_window_is_honored() {
        let store = LedgerStore::new(":memory:", 10).await.unwrap();
        let entry = store
            .record("session-c", "reminder", "1", LedgerOperation::Create, None, serde_json::json!({ "id": 1 }))
            .await
            .unwrap();
        assert_eq!(entry.undo_expiry, entry.ts + 10);
    }
}
