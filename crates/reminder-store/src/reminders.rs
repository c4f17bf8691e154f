use libsql::{Builder, Connection, Database};
use reminder_core::error::{RemindError, Result};
use reminder_core::types::{
    now_unix, AuditEntry, Reminder, ReminderKind, ReminderStatus, AUDIT_LOG_CAP,
};

pub struct ReminderStore {
    db: Database,
}

fn db_err(e: libsql::Error) -> RemindError {
    RemindError::Store(e.to_string())
}

fn get_optional_string(row: &libsql::Row, idx: i32) -> Result<Option<String>> {
    match row.get::<libsql::Value>(idx).map_err(db_err)? {
        libsql::Value::Null => Ok(None),
        libsql::Value::Text(s) => Ok(Some(s)),
        other => Err(RemindError::Store(format!(
            "expected text or null at column {idx}, got: {other:?}"
        ))),
    }
}

fn get_optional_i64(row: &libsql::Row, idx: i32) -> Result<Option<i64>> {
    match row.get::<libsql::Value>(idx).map_err(db_err)? {
        libsql::Value::Null => Ok(None),
        libsql::Value::Integer(i) => Ok(Some(i)),
        other => Err(RemindError::Store(format!(
            "expected integer or null at column {idx}, got: {other:?}"
        ))),
    }
}

fn row_to_reminder(row: &libsql::Row) -> Result<Reminder> {
    let channels_json = row.get::<String>(8).map_err(db_err)?;
    let channels: Vec<String> = serde_json::from_str(&channels_json).unwrap_or_default();
    let audit_json = row.get::<String>(14).map_err(db_err)?;
    let audit_log: Vec<AuditEntry> = serde_json::from_str(&audit_json).unwrap_or_default();
    let kind_str = row.get::<String>(1).map_err(db_err)?;
    let status_str = row.get::<String>(10).map_err(db_err)?;

    Ok(Reminder {
        id: row.get::<i64>(0).map_err(db_err)?,
        kind: ReminderKind::parse(&kind_str)
            .ok_or_else(|| RemindError::Store(format!("unknown reminder kind: {kind_str}")))?,
        message: row.get::<String>(2).map_err(db_err)?,
        due_at: row.get::<i64>(3).map_err(db_err)?,
        created_at: row.get::<i64>(4).map_err(db_err)?,
        sent_at: get_optional_i64(row, 5)?,
        canceled_at: get_optional_i64(row, 6)?,
        timezone: row.get::<String>(7).map_err(db_err)?,
        channels,
        priority: row.get::<i64>(9).map_err(db_err)? as i32,
        status: ReminderStatus::parse(&status_str)
            .ok_or_else(|| RemindError::Store(format!("unknown reminder status: {status_str}")))?,
        attempt_count: row.get::<i64>(11).map_err(db_err)? as i32,
        last_error: get_optional_string(row, 12)?,
        context_ref: get_optional_string(row, 13)?,
        audit_log,
    })
}

const SELECT_COLUMNS: &str = "id, kind, message, due_at, created_at, sent_at, canceled_at, \
     timezone, channels, priority, status, attempt_count, last_error, context_ref, audit_log";

/// Append `entry` to a JSON-encoded audit log, truncating from the oldest
/// side once the cap is exceeded.
fn push_audit_json(existing: &str, entry: &AuditEntry) -> Result<String> {
    let mut log: Vec<AuditEntry> = serde_json::from_str(existing).unwrap_or_default();
    log.push(entry.clone());
    if log.len() > AUDIT_LOG_CAP {
        let overflow = log.len() - AUDIT_LOG_CAP;
        log.drain(0..overflow);
    }
    serde_json::to_string(&log).map_err(|e| RemindError::Store(e.to_string()))
}

impl ReminderStore {
    pub async fn new(path: &str) -> Result<Self> {
        let db = Builder::new_local(path).build().await.map_err(db_err)?;
        let store = Self { db };
        store.migrate_legacy_channel_column().await?;
        store.init_tables().await?;
        Ok(store)
    }

    fn conn(&self) -> Result<Connection> {
        self.db.connect().map_err(db_err)
    }

    async fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                &format!("SELECT 1 FROM pragma_table_info('{table}') WHERE name = ?1"),
                libsql::params![column.to_string()],
            )
            .await
            .map_err(db_err)?;
        Ok(rows.next().await.map_err(db_err)?.is_some())
    }

    /// Rewrite the legacy single-string `channel` column into the new
    /// JSON `channels` list. Idempotent: skipped once `channels` exists.
    async fn migrate_legacy_channel_column(&self) -> Result<()> {
        let has_legacy = self.column_exists("reminders", "channel").await?;
        let has_current = self.column_exists("reminders", "channels").await?;
        if !has_legacy || has_current {
            return Ok(());
        }

        let conn = self.conn()?;
        conn.execute("ALTER TABLE reminders ADD COLUMN channels TEXT", ())
            .await
            .map_err(db_err)?;

        let mut rows = conn
            .query("SELECT id, channel FROM reminders", ())
            .await
            .map_err(db_err)?;
        let mut updates = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let id = row.get::<i64>(0).map_err(db_err)?;
            let channel = get_optional_string(&row, 1)?.unwrap_or_default();
            let channels: Vec<&str> = match channel.as_str() {
                "ntfy" => vec!["ntfy"],
                "voice" => vec!["voice"],
                "both" => vec!["ntfy", "voice"],
                other if !other.is_empty() => vec![other],
                _ => vec!["ntfy"],
            };
            updates.push((id, serde_json::to_string(&channels).unwrap()));
        }
        for (id, channels_json) in updates {
            conn.execute(
                "UPDATE reminders SET channels = ?1 WHERE id = ?2",
                libsql::params![channels_json, id],
            )
            .await
            .map_err(db_err)?;
        }

        Ok(())
    }

    async fn init_tables(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS reminders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                due_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                sent_at INTEGER,
                canceled_at INTEGER,
                timezone TEXT NOT NULL,
                channels TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 5,
                status TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                context_ref TEXT,
                audit_log TEXT NOT NULL DEFAULT '[]'
            )",
            (),
        )
        .await
        .map_err(db_err)?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS reminders_status_due_idx ON reminders(status, due_at)",
            (),
        )
        .await
        .map_err(db_err)?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS reminders_status_idx ON reminders(status)",
            (),
        )
        .await
        .map_err(db_err)?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS reminders_due_idx ON reminders(due_at)",
            (),
        )
        .await
        .map_err(db_err)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS heartbeat (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_poll_ts INTEGER NOT NULL
            )",
            (),
        )
        .await
        .map_err(db_err)?;

        Ok(())
    }

    pub async fn create(&self, mut reminder: Reminder) -> Result<Reminder> {
        reminder.audit_log = vec![AuditEntry::new("created", "system", "reminder created")];
        let channels_json = serde_json::to_string(&reminder.channels).unwrap();
        let audit_json = serde_json::to_string(&reminder.audit_log).unwrap();

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO reminders (kind, message, due_at, created_at, sent_at, canceled_at, \
             timezone, channels, priority, status, attempt_count, last_error, context_ref, audit_log) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            libsql::params![
                reminder.kind.as_str().to_string(),
                reminder.message.clone(),
                reminder.due_at,
                reminder.created_at,
                reminder.sent_at,
                reminder.canceled_at,
                reminder.timezone.clone(),
                channels_json,
                reminder.priority as i64,
                reminder.status.as_str().to_string(),
                reminder.attempt_count as i64,
                reminder.last_error.clone(),
                reminder.context_ref.clone(),
                audit_json,
            ],
        )
        .await
        .map_err(db_err)?;

        let id = conn.last_insert_rowid();
        reminder.id = id;
        Ok(reminder)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Reminder>> {
        let mut rows = self
            .conn()?
            .query(
                &format!("SELECT {SELECT_COLUMNS} FROM reminders WHERE id = ?1"),
                libsql::params![id],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_reminder(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list(&self, status: Option<ReminderStatus>) -> Result<Vec<Reminder>> {
        let conn = self.conn()?;
        let mut rows = match status {
            Some(s) => {
                conn.query(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM reminders WHERE status = ?1 ORDER BY due_at ASC"
                    ),
                    libsql::params![s.as_str().to_string()],
                )
                .await
                .map_err(db_err)?
            }
            None => {
                conn.query(
                    &format!("SELECT {SELECT_COLUMNS} FROM reminders ORDER BY due_at ASC"),
                    (),
                )
                .await
                .map_err(db_err)?
            }
        };
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            out.push(row_to_reminder(&row)?);
        }
        Ok(out)
    }

    /// The single most important store operation: atomically claim up to
    /// `max_n` due reminders, transitioning each `scheduled -> fired` so a
    /// scheduler crash between claim and dispatch can never cause a re-fire.
    pub async fn claim_due(&self, now: i64, max_n: i64) -> Result<Vec<Reminder>> {
        let conn = self.conn()?;
        conn.execute("BEGIN IMMEDIATE", ()).await.map_err(db_err)?;

        let claimed = match self.claim_due_locked(&conn, now, max_n).await {
            Ok(rows) => rows,
            Err(e) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                return Err(e);
            }
        };

        conn.execute("COMMIT", ()).await.map_err(db_err)?;
        Ok(claimed)
    }

    async fn claim_due_locked(&self, conn: &Connection, now: i64, max_n: i64) -> Result<Vec<Reminder>> {
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM reminders \
                     WHERE status = 'scheduled' AND canceled_at IS NULL AND due_at <= ?1 \
                     ORDER BY due_at ASC, priority DESC LIMIT ?2"
                ),
                libsql::params![now, max_n],
            )
            .await
            .map_err(db_err)?;

        let mut candidates = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            candidates.push(row_to_reminder(&row)?);
        }

        let mut claimed = Vec::new();
        for mut reminder in candidates {
            reminder.status = ReminderStatus::Fired;
            reminder.attempt_count += 1;
            reminder.sent_at = Some(now);
            reminder.push_audit(AuditEntry::new(
                "delivery_attempt",
                "scheduler",
                format!("attempt {}", reminder.attempt_count),
            ));
            let audit_json = serde_json::to_string(&reminder.audit_log).unwrap();

            conn.execute(
                "UPDATE reminders SET status = ?1, attempt_count = ?2, sent_at = ?3, audit_log = ?4 \
                 WHERE id = ?5 AND status = 'scheduled'",
                libsql::params![
                    ReminderStatus::Fired.as_str().to_string(),
                    reminder.attempt_count as i64,
                    now,
                    audit_json,
                    reminder.id,
                ],
            )
            .await
            .map_err(db_err)?;

            claimed.push(reminder);
        }

        Ok(claimed)
    }

    pub async fn append_audit(&self, reminder_id: i64, entry: AuditEntry) -> Result<()> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT audit_log FROM reminders WHERE id = ?1",
                libsql::params![reminder_id],
            )
            .await
            .map_err(db_err)?;
        let existing = match rows.next().await.map_err(db_err)? {
            Some(row) => row.get::<String>(0).map_err(db_err)?,
            None => return Err(RemindError::NotFound(format!("reminder {reminder_id}"))),
        };
        let updated = push_audit_json(&existing, &entry)?;
        conn.execute(
            "UPDATE reminders SET audit_log = ?1 WHERE id = ?2",
            libsql::params![updated, reminder_id],
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Mark a channel's delivery outcome and apply the retry/backoff/terminal
    /// transition from the per-tick algorithm. `any_ok` is whether at least
    /// one channel succeeded this attempt.
    pub async fn record_dispatch_outcome(
        &self,
        reminder_id: i64,
        any_ok: bool,
        last_error: Option<String>,
        max_attempts: i32,
        now: i64,
    ) -> Result<()> {
        let reminder = self
            .get(reminder_id)
            .await?
            .ok_or_else(|| RemindError::NotFound(format!("reminder {reminder_id}")))?;

        let conn = self.conn()?;
        if any_ok {
            conn.execute(
                "UPDATE reminders SET last_error = NULL WHERE id = ?1",
                libsql::params![reminder_id],
            )
            .await
            .map_err(db_err)?;
            return Ok(());
        }

        if reminder.attempt_count < max_attempts {
            let backoff = 60 * 2i64.pow((reminder.attempt_count - 1).max(0) as u32);
            conn.execute(
                "UPDATE reminders SET status = ?1, due_at = ?2, sent_at = NULL, last_error = ?3 \
                 WHERE id = ?4",
                libsql::params![
                    ReminderStatus::Scheduled.as_str().to_string(),
                    now + backoff,
                    last_error,
                    reminder_id,
                ],
            )
            .await
            .map_err(db_err)?;
            self.append_audit(reminder_id, AuditEntry::new("retry", "scheduler", "rescheduled after failed dispatch"))
                .await?;
        } else {
            conn.execute(
                "UPDATE reminders SET status = ?1, last_error = ?2 WHERE id = ?3",
                libsql::params![ReminderStatus::Failed.as_str().to_string(), last_error, reminder_id],
            )
            .await
            .map_err(db_err)?;
            self.append_audit(reminder_id, AuditEntry::new("fail", "scheduler", "max attempts exhausted"))
                .await?;
        }

        Ok(())
    }

    pub async fn acknowledge(&self, id: i64) -> Result<Reminder> {
        let reminder = self.get(id).await?.ok_or_else(|| RemindError::NotFound(format!("reminder {id}")))?;
        if !matches!(reminder.status, ReminderStatus::Fired | ReminderStatus::Acknowledged) {
            return Err(RemindError::State {
                from: reminder.status.as_str().to_string(),
                to: "acknowledged".to_string(),
            });
        }
        self.conn()?
            .execute(
                "UPDATE reminders SET status = ?1 WHERE id = ?2",
                libsql::params![ReminderStatus::Acknowledged.as_str().to_string(), id],
            )
            .await
            .map_err(db_err)?;
        self.append_audit(id, AuditEntry::new("action_callback", "user", "DONE")).await?;
        self.get(id).await?.ok_or_else(|| RemindError::NotFound(format!("reminder {id}")))
    }

    pub async fn snooze_or_delay(&self, id: i64, seconds: i64, action_label: &str) -> Result<Reminder> {
        let reminder = self.get(id).await?.ok_or_else(|| RemindError::NotFound(format!("reminder {id}")))?;
        if !matches!(
            reminder.status,
            ReminderStatus::Fired | ReminderStatus::Scheduled | ReminderStatus::Snoozed
        ) {
            return Err(RemindError::State {
                from: reminder.status.as_str().to_string(),
                to: "scheduled".to_string(),
            });
        }
        let new_due = now_unix() + seconds;
        self.conn()?
            .execute(
                "UPDATE reminders SET due_at = ?1, status = ?2, sent_at = NULL, attempt_count = 0 \
                 WHERE id = ?3",
                libsql::params![new_due, ReminderStatus::Scheduled.as_str().to_string(), id],
            )
            .await
            .map_err(db_err)?;
        self.append_audit(id, AuditEntry::new("snooze", "user", action_label)).await?;
        self.get(id).await?.ok_or_else(|| RemindError::NotFound(format!("reminder {id}")))
    }

    pub async fn cancel(&self, id: i64) -> Result<Reminder> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE reminders SET status = ?1, canceled_at = ?2 WHERE id = ?3",
            libsql::params![ReminderStatus::Canceled.as_str().to_string(), now_unix(), id],
        )
        .await
        .map_err(db_err)?;
        self.append_audit(id, AuditEntry::new("cancel", "user", "canceled")).await?;
        self.get(id).await?.ok_or_else(|| RemindError::NotFound(format!("reminder {id}")))
    }

    /// Returns rows fired within `crash_window` seconds of `now` that never
    /// confirmed success or exhausted retries — treated as in-doubt after a
    /// restart and returned to `scheduled` with the next backoff applied.
    pub async fn recover_in_doubt(&self, now: i64, crash_window: i64, max_attempts: i32) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, attempt_count FROM reminders \
                 WHERE status = 'fired' AND sent_at IS NOT NULL AND sent_at >= ?1 AND attempt_count < ?2",
                libsql::params![now - crash_window, max_attempts],
            )
            .await
            .map_err(db_err)?;
        let mut recovered = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let id = row.get::<i64>(0).map_err(db_err)?;
            let attempt_count = row.get::<i64>(1).map_err(db_err)?;
            let backoff = 60 * 2i64.pow((attempt_count - 1).max(0) as u32);
            conn.execute(
                "UPDATE reminders SET status = 'scheduled', due_at = ?1, sent_at = NULL WHERE id = ?2",
                libsql::params![now + backoff, id],
            )
            .await
            .map_err(db_err)?;
            self.append_audit(id, AuditEntry::new("retry", "scheduler", "recovered in-doubt dispatch after restart"))
                .await?;
            recovered.push(id);
        }
        Ok(recovered)
    }

    /// Hard-delete a reminder row. Used by ledger undo to reverse a `create`.
    pub async fn delete(&self, id: i64) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM reminders WHERE id = ?1", libsql::params![id])
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Re-insert a reminder at a specific id, restoring every column from a
    /// ledger `before_snapshot`. Used to reverse a `delete`, or to overwrite
    /// the current row with its prior state to reverse an `update`.
    pub async fn restore(&self, reminder: &Reminder) -> Result<()> {
        let channels_json = serde_json::to_string(&reminder.channels).unwrap();
        let audit_json = serde_json::to_string(&reminder.audit_log).unwrap();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO reminders (id, kind, message, due_at, created_at, sent_at, canceled_at, \
             timezone, channels, priority, status, attempt_count, last_error, context_ref, audit_log) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15) \
             ON CONFLICT(id) DO UPDATE SET kind=excluded.kind, message=excluded.message, \
             due_at=excluded.due_at, created_at=excluded.created_at, sent_at=excluded.sent_at, \
             canceled_at=excluded.canceled_at, timezone=excluded.timezone, channels=excluded.channels, \
             priority=excluded.priority, status=excluded.status, attempt_count=excluded.attempt_count, \
             last_error=excluded.last_error, context_ref=excluded.context_ref, audit_log=excluded.audit_log",
            libsql::params![
                reminder.id,
                reminder.kind.as_str().to_string(),
                reminder.message.clone(),
                reminder.due_at,
                reminder.created_at,
                reminder.sent_at,
                reminder.canceled_at,
                reminder.timezone.clone(),
                channels_json,
                reminder.priority as i64,
                reminder.status.as_str().to_string(),
                reminder.attempt_count as i64,
                reminder.last_error.clone(),
                reminder.context_ref.clone(),
                audit_json,
            ],
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn scheduled_count(&self) -> Result<i64> {
        let mut rows = self
            .conn()?
            .query(
                "SELECT COUNT(*) FROM reminders WHERE status = 'scheduled'",
                (),
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => row.get::<i64>(0).map_err(db_err),
            None => Ok(0),
        }
    }

    /// `(id, due_at)` of the soonest scheduled reminder, if any.
    pub async fn next_due(&self) -> Result<Option<(i64, i64)>> {
        let mut rows = self
            .conn()?
            .query(
                "SELECT id, due_at FROM reminders WHERE status = 'scheduled' ORDER BY due_at ASC LIMIT 1",
                (),
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some((row.get::<i64>(0).map_err(db_err)?, row.get::<i64>(1).map_err(db_err)?))),
            None => Ok(None),
        }
    }

    /// Most recent `sent_at` among reminders that delivered cleanly (a
    /// dispatch with no outstanding `last_error`).
    pub async fn last_delivery_success(&self) -> Result<Option<i64>> {
        let mut rows = self
            .conn()?
            .query(
                "SELECT MAX(sent_at) FROM reminders WHERE sent_at IS NOT NULL AND last_error IS NULL",
                (),
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => get_optional_i64(&row, 0),
            None => Ok(None),
        }
    }

    /// The most recently recorded delivery failure, if any reminder currently
    /// carries one.
    pub async fn last_delivery_error(&self) -> Result<Option<String>> {
        let mut rows = self
            .conn()?
            .query(
                "SELECT last_error FROM reminders WHERE last_error IS NOT NULL ORDER BY id DESC LIMIT 1",
                (),
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => get_optional_string(&row, 0),
            None => Ok(None),
        }
    }

    pub async fn write_heartbeat(&self, now: i64) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO heartbeat (id, last_poll_ts) VALUES (1, ?1) \
                 ON CONFLICT(id) DO UPDATE SET last_poll_ts = excluded.last_poll_ts",
                libsql::params![now],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn last_heartbeat(&self) -> Result<Option<i64>> {
        let mut rows = self
            .conn()?
            .query("SELECT last_poll_ts FROM heartbeat WHERE id = 1", ())
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row.get::<i64>(0).map_err(db_err)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_reminder(message: &str, due_at: i64, priority: i32) -> Reminder {
        Reminder {
            id: 0,
            kind: ReminderKind::Remind,
            message: message.to_string(),
            due_at,
            created_at: now_unix(),
            sent_at: None,
            canceled_at: None,
            timezone: "UTC".to_string(),
            channels: vec!["ntfy".to_string()],
            priority,
            status: ReminderStatus::Scheduled,
            attempt_count: 0,
            last_error: None,
            context_ref: None,
            audit_log: Vec::new(),
        }
    }

    #[test]
    fn push_audit_json_caps_at_limit() {
        let mut log = Vec::new();
        for i in 0..105 {
            log.push(AuditEntry::new("created", "system", format!("entry {i}")));
        }
        let existing = serde_json::to_string(&log).unwrap();
        let updated = push_audit_json(&existing, &AuditEntry::new("cancel", "user", "canceled")).unwrap();
        let parsed: Vec<AuditEntry> = serde_json::from_str(&updated).unwrap();
        assert_eq!(parsed.len(), AUDIT_LOG_CAP);
        assert_eq!(parsed.last().unwrap().action, "cancel");
    }

    #[tokio::test]
    async fn claim_due_is_exclusive_and_ordered_by_due_then_priority() {
        let store = ReminderStore::new(":memory:").await.unwrap();
        let now = 1_000;

        let low = store.create(new_reminder("low priority, later", now + 10, 1)).await.unwrap();
        let high_same_time = store.create(new_reminder("high priority, same time", now + 10, 9)).await.unwrap();
        let earliest = store.create(new_reminder("earliest", now - 5, 5)).await.unwrap();
        let not_due_yet = store.create(new_reminder("future", now + 1_000, 5)).await.unwrap();

        let claimed = store.claim_due(now + 10, 10).await.unwrap();
        let claimed_ids: Vec<i64> = claimed.iter().map(|r| r.id).collect();

        assert_eq!(claimed_ids, vec![earliest.id, high_same_time.id, low.id]);
        assert!(!claimed_ids.contains(&not_due_yet.id));

        for r in &claimed {
            assert_eq!(r.status, ReminderStatus::Fired);
            assert_eq!(r.attempt_count, 1);
        }

        // A second claim at the same `now` must not re-claim anything: the
        // whole point of the atomic transition is exactly-once scheduling.
        let second = store.claim_due(now + 10, 10).await.unwrap();
        assert!(second.is_empty());

        let persisted = store.get(earliest.id).await.unwrap().unwrap();
        assert_eq!(persisted.status, ReminderStatus::Fired);
    }

    #[tokio::test]
    async fn recover_in_doubt_reschedules_stuck_fired_reminders() {
        let store = ReminderStore::new(":memory:").await.unwrap();
        let now = 10_000;

        let created = store.create(new_reminder("stuck mid-dispatch", now - 100, 5)).await.unwrap();
        let claimed = store.claim_due(now, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, created.id);

        // Simulate a crash right after claim, before any dispatch outcome
        // was ever recorded: the row is stuck at `fired` with sent_at = now.
        let recovered = store.recover_in_doubt(now + 30, 3600, 3).await.unwrap();
        assert_eq!(recovered, vec![created.id]);

        let after = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(after.status, ReminderStatus::Scheduled);
        assert!(after.sent_at.is_none());
        assert!(after.due_at > now + 30);

        // Already-exhausted reminders are left alone.
        let exhausted = store.create(new_reminder("exhausted", now - 100, 5)).await.unwrap();
        store.claim_due(now, 10).await.unwrap();
        for _ in 0..3 {
            store.record_dispatch_outcome(exhausted.id, false, Some("send failed".to_string()), 1, now + 1).await.unwrap();
        }
        let still_recovered = store.recover_in_doubt(now + 30, 3600, 1).await.unwrap();
        assert!(!still_recovered.contains(&exhausted.id));
    }
}
