//! Long-running tick loop (C5): claims due reminders, fans dispatch out
//! across channels, and serializes the resulting store writes.

use reminder_core::log;
use reminder_core::types::{now_unix, NotifyAction, NotifyPayload};
use reminder_notify::NotificationRouter;
use reminder_store::ReminderStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_SEC: u64 = 5;
pub const DEFAULT_MAX_BATCH: i64 = 100;
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;
pub const MAX_CRASH_WINDOW_SEC: i64 = 300;

pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub max_batch: i64,
    pub max_attempts: i32,
    pub app_name: String,
    pub public_base_url: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_SEC),
            max_batch: DEFAULT_MAX_BATCH,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            app_name: "Remind".to_string(),
            public_base_url: None,
        }
    }
}

pub struct Scheduler {
    store: Arc<ReminderStore>,
    router: Arc<NotificationRouter>,
    config: SchedulerConfig,
}

fn build_actions(reminder_id: i64, base_url: &str) -> Vec<NotifyAction> {
    let endpoint = format!("{base_url}/api/reminders/{reminder_id}/action");
    vec![
        NotifyAction {
            label: "DONE".to_string(),
            action: endpoint.clone(),
        },
        NotifyAction {
            label: "SNOOZE_30".to_string(),
            action: endpoint.clone(),
        },
        NotifyAction {
            label: "DELAY_2H".to_string(),
            action: endpoint,
        },
    ]
}

impl Scheduler {
    pub fn new(store: Arc<ReminderStore>, router: Arc<NotificationRouter>, config: SchedulerConfig) -> Self {
        Self { store, router, config }
    }

    /// Main loop. Exits once `stop` is cancelled; the in-flight tick is
    /// always allowed to finish first.
    pub async fn run(&self, stop: CancellationToken) -> reminder_core::error::Result<()> {
        log!(" [scheduler] started (poll interval {:?})", self.config.poll_interval);

        if let Err(e) = self.recover_in_doubt().await {
            log!(" [scheduler] restart recovery failed: {e}");
        }

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    log!(" [scheduler] stop requested, exiting after current tick");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.tick().await {
                        log!(" [scheduler] tick error: {e}");
                    }
                }
            }
        }
    }

    async fn recover_in_doubt(&self) -> reminder_core::error::Result<()> {
        let now = now_unix();
        let recovered = self
            .store
            .recover_in_doubt(now, MAX_CRASH_WINDOW_SEC, self.config.max_attempts)
            .await?;
        if !recovered.is_empty() {
            log!(" [scheduler] recovered {} in-doubt reminder(s) after restart", recovered.len());
        }
        Ok(())
    }

    async fn tick(&self) -> reminder_core::error::Result<()> {
        let now = now_unix();
        let claimed = self.store.claim_due(now, self.config.max_batch).await?;

        if !claimed.is_empty() {
            log!(" [scheduler] claimed {} due reminder(s)", claimed.len());
        }

        let dispatches = claimed.into_iter().map(|reminder| self.dispatch_one(reminder));
        futures::future::join_all(dispatches).await;

        self.store.write_heartbeat(now).await?;
        Ok(())
    }

    async fn dispatch_one(&self, reminder: reminder_core::types::Reminder) {
        let title = format!("{} Reminder ({})", self.config.app_name, reminder.kind.as_str());
        let actions = match &self.config.public_base_url {
            Some(base) => build_actions(reminder.id, base),
            None => Vec::new(),
        };
        let payload = NotifyPayload {
            title,
            body: reminder.message.clone(),
            actions,
            context: serde_json::Value::Null,
        };

        let results = self
            .router
            .dispatch(&reminder.channels, &payload, reminder.priority)
            .await;

        let mut any_ok = false;
        let mut last_error = None;
        for (channel, result) in &results {
            if result.ok {
                any_ok = true;
            } else {
                last_error = result.error.clone();
            }
            let details = if result.ok {
                format!("{channel}: ok")
            } else {
                format!("{channel}: {}", result.error.as_deref().unwrap_or("unknown error"))
            };
            if let Err(e) = self
                .store
                .append_audit(
                    reminder.id,
                    reminder_core::types::AuditEntry::new("delivery_attempt", "scheduler", details),
                )
                .await
            {
                log!(" [scheduler] failed to append audit for reminder {}: {e}", reminder.id);
            }
        }

        if let Err(e) = self
            .store
            .record_dispatch_outcome(reminder.id, any_ok, last_error, self.config.max_attempts, now_unix())
            .await
        {
            log!(" [scheduler] failed to record dispatch outcome for reminder {}: {e}", reminder.id);
        }
    }
}

/// Backoff schedule used for both live retries and restart recovery:
/// 60s, 120s, 240s, ...
pub fn backoff_seconds(attempt_count: i32) -> i64 {
    60 * 2i64.pow((attempt_count - 1).max(0) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reminder_core::types::{Reminder, ReminderKind, ReminderStatus};

    #[test]
    fn backoff_doubles_each_attempt() {
        assert_eq!(backoff_seconds(1), 60);
        assert_eq!(backoff_seconds(2), 120);
        assert_eq!(backoff_seconds(3), 240);
    }

    fn due_reminder(due_at: i64) -> Reminder {
        Reminder {
            id: 0,
            kind: ReminderKind::Remind,
            message: "paused-clock test".to_string(),
            due_at,
            created_at: now_unix(),
            sent_at: None,
            canceled_at: None,
            timezone: "UTC".to_string(),
            channels: vec!["ntfy".to_string()],
            priority: 5,
            status: ReminderStatus::Scheduled,
            attempt_count: 0,
            last_error: None,
            context_ref: None,
            audit_log: Vec::new(),
        }
    }

    /// Drives `Scheduler::run` on a paused virtual clock instead of real
    /// sleeps, so a due reminder is claimed as soon as the poll interval
    /// elapses and shutdown is prompt once `stop` is cancelled.
    #[tokio::test(start_paused = true)]
    async fn run_claims_due_reminders_on_poll_tick_and_stops_cleanly() {
        let store = Arc::new(ReminderStore::new(":memory:").await.unwrap());
        let router = Arc::new(reminder_notify::default_router("https://ntfy.sh", "test-topic", true));

        let now = now_unix();
        let created = store.create(due_reminder(now - 5)).await.unwrap();
        let not_due = store.create(due_reminder(now + 3600)).await.unwrap();

        let scheduler = Scheduler::new(
            store.clone(),
            router,
            SchedulerConfig {
                poll_interval: Duration::from_millis(20),
                ..SchedulerConfig::default()
            },
        );

        let stop = CancellationToken::new();
        let run_stop = stop.clone();
        let handle = tokio::spawn(async move { scheduler.run(run_stop).await });

        // Cross the poll interval on the virtual clock; `advance` runs the
        // scheduler's woken task to completion of its pending work before
        // returning control here.
        tokio::time::advance(Duration::from_millis(25)).await;
        tokio::task::yield_now().await;

        let fired = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(fired.status, ReminderStatus::Fired);
        assert_eq!(fired.attempt_count, 1);

        let untouched = store.get(not_due.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, ReminderStatus::Scheduled);

        stop.cancel();
        handle.await.unwrap().unwrap();
    }
}
