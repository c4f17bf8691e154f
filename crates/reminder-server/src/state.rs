use reminder_notify::NotificationRouter;
use reminder_store::{IdempotencyStore, LedgerStore, PendingStore, ReminderStore};
use std::sync::Arc;

pub struct AppState {
    pub reminders: Arc<ReminderStore>,
    pub ledger: Arc<LedgerStore>,
    pub pending: Arc<PendingStore>,
    pub idempotency: Arc<IdempotencyStore>,
    pub router: Arc<NotificationRouter>,
    pub action_token: Option<String>,
    pub default_timezone: String,
    pub app_name: String,
    pub public_base_url: Option<String>,
    /// Scheduler tick interval, used only to judge heartbeat staleness for
    /// `/api/reminders/health`.
    pub scheduler_poll_sec: u64,
}

impl AppState {
    /// Per the auth contract: open when no token is configured, otherwise
    /// the request must present it in the `Authorization` header or the
    /// JSON body.
    pub fn check_auth(&self, header_token: Option<&str>, body_token: Option<&str>) -> bool {
        match &self.action_token {
            None => true,
            Some(expected) => header_token == Some(expected.as_str()) || body_token == Some(expected.as_str()),
        }
    }
}
