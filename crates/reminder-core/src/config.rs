use crate::error::{RemindError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub ntfy_topic: String,
    pub ntfy_base_url: String,
    pub dry_run: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            ntfy_topic: String::new(),
            ntfy_base_url: "https://ntfy.sh".to_string(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub public_base_url: String,
    pub action_token: String,
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            public_base_url: String::new(),
            action_token: String::new(),
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_sec: u64,
    pub max_batch: i64,
    pub max_attempts: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_sec: 5,
            max_batch: 100,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub undo_window_sec: i64,
    pub draft_ttl_sec: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            undo_window_sec: 1800,
            draft_ttl_sec: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub reminders_db: String,
    pub ledger_db: String,
    pub pending_db: String,
    pub idempotency_db: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reminders_db: "reminders.db".to_string(),
            ledger_db: "ledger.db".to_string(),
            pending_db: "pending.db".to_string(),
            idempotency_db: "idempotency.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub default_timezone: DefaultTimezone,
    pub notify: NotifyConfig,
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub ledger: LedgerConfig,
    pub store: StoreConfig,
}

/// Newtype so `Default` can supply "America/Chicago" without a custom impl on `Config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultTimezone(pub String);

impl Default for DefaultTimezone {
    fn default() -> Self {
        Self("America/Chicago".to_string())
    }
}

impl Config {
    /// Load from `path` if it exists, falling back to defaults, then apply
    /// environment overrides. Mirrors the teacher's config-loading shape:
    /// file first, env last, env always wins.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| RemindError::Config(format!("reading {}: {e}", path.display())))?;
            toml::from_str(&raw)
                .map_err(|e| RemindError::Config(format!("parsing {}: {e}", path.display())))?
        } else {
            Config::default()
        };

        if let Ok(v) = std::env::var("DEFAULT_TIMEZONE") {
            config.default_timezone.0 = v;
        }
        if let Ok(v) = std::env::var("NTFY_TOPIC") {
            config.notify.ntfy_topic = v;
        }
        if let Ok(v) = std::env::var("NTFY_BASE_URL") {
            config.notify.ntfy_base_url = v;
        }
        if let Ok(v) = std::env::var("NOTIFY_DRY_RUN") {
            config.notify.dry_run = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("PUBLIC_BASE_URL") {
            config.server.public_base_url = v;
        }
        if let Ok(v) = std::env::var("ACTION_TOKEN") {
            config.server.action_token = v;
        }
        if let Ok(v) = std::env::var("BIND_ADDR") {
            config.server.bind_addr = v;
        }
        if let Ok(v) = std::env::var("SCHEDULER_POLL_SEC") {
            if let Ok(n) = v.parse() {
                config.scheduler.poll_sec = n;
            }
        }
        if let Ok(v) = std::env::var("SCHEDULER_MAX_BATCH") {
            if let Ok(n) = v.parse() {
                config.scheduler.max_batch = n;
            }
        }
        if let Ok(v) = std::env::var("SCHEDULER_MAX_ATTEMPTS") {
            if let Ok(n) = v.parse() {
                config.scheduler.max_attempts = n;
            }
        }
        if let Ok(v) = std::env::var("UNDO_WINDOW_SEC") {
            if let Ok(n) = v.parse() {
                config.ledger.undo_window_sec = n;
            }
        }
        if let Ok(v) = std::env::var("DRAFT_TTL_SEC") {
            if let Ok(n) = v.parse() {
                config.ledger.draft_ttl_sec = n;
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.default_timezone.0, "America/Chicago");
        assert_eq!(config.notify.ntfy_base_url, "https://ntfy.sh");
        assert_eq!(config.scheduler.poll_sec, 5);
        assert_eq!(config.scheduler.max_batch, 100);
        assert_eq!(config.scheduler.max_attempts, 3);
        assert_eq!(config.ledger.undo_window_sec, 1800);
        assert_eq!(config.ledger.draft_ttl_sec, 600);
        assert!(!config.notify.dry_run);
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let config = Config::load(Path::new("/nonexistent/oasis-remind.toml")).unwrap();
        assert_eq!(config.store.reminders_db, "reminders.db");
    }
}
