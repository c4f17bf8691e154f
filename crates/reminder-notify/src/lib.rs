pub mod ntfy;
pub mod provider;
pub mod router;
pub mod stubs;

pub use ntfy::NtfyProvider;
pub use provider::NotificationProvider;
pub use router::NotificationRouter;
pub use stubs::StubProvider;

/// Build the default router: `ntfy` wired to a real endpoint, `voice` and
/// `desktop_popup` as not-yet-implemented stubs.
pub fn default_router(ntfy_base_url: &str, ntfy_topic: &str, dry_run: bool) -> NotificationRouter {
    NotificationRouter::new()
        .register(Box::new(NtfyProvider::new(ntfy_base_url, ntfy_topic, dry_run)))
        .register(Box::new(StubProvider::voice()))
        .register(Box::new(StubProvider::desktop_popup()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reminder_core::types::NotifyPayload;

    #[tokio::test]
    async fn dry_run_never_performs_io() {
        let router = default_router("https://ntfy.sh", "test-topic", true);
        let payload = NotifyPayload {
            title: "Reminder".to_string(),
            body: "water the plants".to_string(),
            actions: vec![],
            context: serde_json::Value::Null,
        };
        let results = router
            .dispatch(&["ntfy".to_string()], &payload, 5)
            .await;
        let result = results.get("ntfy").unwrap();
        assert!(result.ok);
        assert_eq!(result.dry_run, Some(true));
    }

    #[tokio::test]
    async fn unknown_channel_is_skipped_not_fatal() {
        let router = default_router("https://ntfy.sh", "test-topic", true);
        let payload = NotifyPayload {
            title: "Reminder".to_string(),
            body: "body".to_string(),
            actions: vec![],
            context: serde_json::Value::Null,
        };
        let results = router
            .dispatch(&["carrier_pigeon".to_string()], &payload, 5)
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn stub_providers_report_not_implemented() {
        let router = default_router("https://ntfy.sh", "test-topic", true);
        let payload = NotifyPayload {
            title: "Reminder".to_string(),
            body: "body".to_string(),
            actions: vec![],
            context: serde_json::Value::Null,
        };
        let results = router
            .dispatch(&["voice".to_string()], &payload, 5)
            .await;
        let result = results.get("voice").unwrap();
        assert!(!result.ok);
        assert_eq!(result.error.as_deref(), Some("not_implemented"));
    }
}
