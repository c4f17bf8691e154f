use libsql::{Builder, Connection, Database};
use reminder_core::error::{RemindError, Result};

pub struct IdempotencyStore {
    db: Database,
}

fn db_err(e: libsql::Error) -> RemindError {
    RemindError::Store(e.to_string())
}

/// Default retention for a dedupe key once seen.
pub const DEFAULT_TTL_SEC: i64 = 7 * 24 * 3600;

impl IdempotencyStore {
    pub async fn new(path: &str) -> Result<Self> {
        let db = Builder::new_local(path).build().await.map_err(db_err)?;
        let store = Self { db };
        store.init_tables().await?;
        Ok(store)
    }

    fn conn(&self) -> Result<Connection> {
        self.db.connect().map_err(db_err)
    }

    async fn init_tables(&self) -> Result<()> {
        self.conn()?
            .execute(
                "CREATE TABLE IF NOT EXISTS idempotency (
                    dedupe_key TEXT PRIMARY KEY,
                    first_seen_at INTEGER NOT NULL,
                    ttl_expiry INTEGER NOT NULL,
                    response TEXT
                )",
                (),
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Try to claim a dedupe key. Returns `Ok(true)` the first time a key is
    /// seen (and inserts it); `Ok(false)` if it's a duplicate still within
    /// its TTL, regardless of whether it previously expired and was purged.
    pub async fn try_claim(&self, dedupe_key: &str, now: i64, ttl_sec: i64) -> Result<bool> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT ttl_expiry FROM idempotency WHERE dedupe_key = ?1",
                libsql::params![dedupe_key.to_string()],
            )
            .await
            .map_err(db_err)?;

        if let Some(row) = rows.next().await.map_err(db_err)? {
            let ttl_expiry = row.get::<i64>(0).map_err(db_err)?;
            if now <= ttl_expiry {
                return Ok(false);
            }
        }

        conn.execute(
            "INSERT INTO idempotency (dedupe_key, first_seen_at, ttl_expiry, response) \
             VALUES (?1, ?2, ?3, NULL) \
             ON CONFLICT(dedupe_key) DO UPDATE SET first_seen_at = excluded.first_seen_at, ttl_expiry = excluded.ttl_expiry",
            libsql::params![dedupe_key.to_string(), now, now + ttl_sec],
        )
        .await
        .map_err(db_err)?;
        Ok(true)
    }

    /// Record the response body produced for a dedupe key so a duplicate
    /// request within the window can be answered without reapplying it.
    pub async fn store_response(&self, dedupe_key: &str, response: &str) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE idempotency SET response = ?1 WHERE dedupe_key = ?2",
                libsql::params![response.to_string(), dedupe_key.to_string()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_response(&self, dedupe_key: &str, now: i64) -> Result<Option<String>> {
        let mut rows = self
            .conn()?
            .query(
                "SELECT response, ttl_expiry FROM idempotency WHERE dedupe_key = ?1",
                libsql::params![dedupe_key.to_string()],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => {
                let ttl_expiry = row.get::<i64>(1).map_err(db_err)?;
                if now > ttl_expiry {
                    return Ok(None);
                }
                match row.get::<libsql::Value>(0).map_err(db_err)? {
                    libsql::Value::Text(s) => Ok(Some(s)),
                    _ => Ok(None),
                }
            }
            None => Ok(None),
        }
    }

    pub async fn sweep_expired(&self, now: i64) -> Result<u64> {
        let affected = self
            .conn()?
            .execute("DELETE FROM idempotency WHERE ttl_expiry < ?1", libsql::params![now])
            .await
            .map_err(db_err)?;
        Ok(affected)
    }
}

/// Deterministic dedupe key for an ingest event that didn't supply one:
/// a hash of `(message, due_at, channel-set)`.
pub fn derive_dedupe_key(message: &str, due_at: Option<i64>, channels: &[String]) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    message.hash(&mut hasher);
    due_at.hash(&mut hasher);
    channels.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_claim_is_rejected_within_ttl() {
        let store = IdempotencyStore::new(":memory:").await.unwrap();
        let now = 1_000;

        assert!(store.try_claim("key-a", now, 60).await.unwrap());
        assert!(!store.try_claim("key-a", now + 30, 60).await.unwrap());

        store.store_response("key-a", "{\"status\":\"ok\"}").await.unwrap();
        let resp = store.get_response("key-a", now + 30).await.unwrap();
        assert_eq!(resp.as_deref(), Some("{\"status\":\"ok\"}"));
    }

    #[tokio::test]
    async fn claim_is_allowed_again_after_ttl_expires() {
        let store = IdempotencyStore::new(":memory:").await.unwrap();
        let now = 1_000;

        assert!(store.try_claim("key-b", now, 60).await.unwrap());
        assert!(store.try_claim("key-b", now + 61, 60).await.unwrap());
    }

    #[tokio::test]
    async fn sweep_expired_removes_stale_keys_only() {
        let store = IdempotencyStore::new(":memory:").await.unwrap();
        store.try_claim("stale", 0, 10).await.unwrap();
        store.try_claim("fresh", 1_000, 10_000).await.unwrap();

        let swept = store.sweep_expired(1_000).await.unwrap();
        assert_eq!(swept, 1);
        assert!(store.get_response("stale", 1_000).await.unwrap().is_none());
        // "fresh" wasn't swept; try_claim should still see it as a duplicate.
        assert!(!store.try_claim("fresh", 1_000, 10_000).await.unwrap());
    }

    #[test]
    fn derive_dedupe_key_is_deterministic_and_sensitive_to_inputs() {
        let a = derive_dedupe_key("call mom", Some(100), &["ntfy".to_string()]);
        let b = derive_dedupe_key("call mom", Some(100), &["ntfy".to_string()]);
        let c = derive_dedupe_key("call dad", Some(100), &["ntfy".to_string()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
