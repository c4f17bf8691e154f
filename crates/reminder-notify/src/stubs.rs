use crate::provider::NotificationProvider;
use async_trait::async_trait;
use reminder_core::types::{DeliveryResult, NotifyPayload};

/// Pluggable channel with no real backend yet. Always reports
/// `not_implemented` rather than silently dropping the dispatch.
pub struct StubProvider {
    name: &'static str,
}

impl StubProvider {
    pub fn voice() -> Self {
        Self { name: "voice" }
    }

    pub fn desktop_popup() -> Self {
        Self { name: "desktop_popup" }
    }
}

#[async_trait]
impl NotificationProvider for StubProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn send(&self, _payload: &NotifyPayload, _priority: i32) -> DeliveryResult {
        DeliveryResult::not_implemented(self.name)
    }
}
