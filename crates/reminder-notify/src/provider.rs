use async_trait::async_trait;
use reminder_core::types::{DeliveryResult, NotifyPayload};

/// Capability every notification channel implements, modeled on the same
/// small-async-trait shape the rest of the stack uses for pluggable
/// capabilities (`TokenStore`, `LlmProvider`). Dispatch keeps trying every
/// configured channel even when one fails.
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    async fn send(&self, payload: &NotifyPayload, priority: i32) -> DeliveryResult;
    fn name(&self) -> &str;
}
