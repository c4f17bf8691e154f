use crate::provider::NotificationProvider;
use async_trait::async_trait;
use reminder_core::log;
use reminder_core::types::{DeliveryResult, NotifyPayload};
use std::time::Duration;

pub struct NtfyProvider {
    client: reqwest::Client,
    base_url: String,
    topic: String,
    dry_run: bool,
}

/// Map a reminder's 1-10 priority onto ntfy's 1-5 urgency scale.
fn ntfy_priority(priority: i32) -> u8 {
    match priority {
        1..=3 => 2,
        4..=6 => 3,
        7..=8 => 4,
        9..=10 => 5,
        _ => 3,
    }
}

impl NtfyProvider {
    pub fn new(base_url: impl Into<String>, topic: impl Into<String>, dry_run: bool) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client");
        Self {
            client,
            base_url: base_url.into(),
            topic: topic.into(),
            dry_run,
        }
    }

    fn actions_header(&self, payload: &NotifyPayload) -> Option<String> {
        if payload.actions.is_empty() {
            return None;
        }
        let parts: Vec<String> = payload
            .actions
            .iter()
            .map(|a| {
                format!(
                    "http, {}, {}, method=POST, body={{\"action\":\"{}\"}}",
                    a.label, a.action, a.label
                )
            })
            .collect();
        Some(parts.join("; "))
    }
}

#[async_trait]
impl NotificationProvider for NtfyProvider {
    fn name(&self) -> &str {
        "ntfy"
    }

    async fn send(&self, payload: &NotifyPayload, priority: i32) -> DeliveryResult {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), self.topic);
        let urgency = ntfy_priority(priority);
        let actions = self.actions_header(payload);

        if self.dry_run {
            let preview: String = payload.body.chars().take(200).collect();
            log!(
                " [ntfy] dry-run POST {url} title={:?} priority={urgency} body={preview:?}",
                payload.title
            );
            return DeliveryResult::dry_run("ntfy");
        }

        let mut request = self
            .client
            .post(&url)
            .header("Title", payload.title.clone())
            .header("Priority", urgency.to_string())
            .body(payload.body.clone());

        if let Some(actions) = actions {
            request = request.header("Actions", actions);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return DeliveryResult::err("ntfy", e.to_string()),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return DeliveryResult::err("ntfy", format!("http {}: {}", status.as_u16(), body));
        }

        DeliveryResult::ok("ntfy", None)
    }
}
