use crate::provider::NotificationProvider;
use reminder_core::log;
use reminder_core::types::{DeliveryResult, NotifyPayload};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

type DispatchFuture<'a> = Pin<Box<dyn Future<Output = (String, DeliveryResult)> + Send + 'a>>;

/// Dispatches one payload across every channel a reminder names. A failure
/// on one channel never prevents the others from being tried; unknown
/// channel names are logged and skipped rather than treated as errors.
pub struct NotificationRouter {
    providers: HashMap<String, Box<dyn NotificationProvider>>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn register(mut self, provider: Box<dyn NotificationProvider>) -> Self {
        self.providers.insert(provider.name().to_string(), provider);
        self
    }

    pub async fn dispatch(
        &self,
        channels: &[String],
        payload: &NotifyPayload,
        priority: i32,
    ) -> HashMap<String, DeliveryResult> {
        let mut pending: Vec<DispatchFuture> = Vec::new();
        for channel in channels {
            match self.providers.get(channel) {
                Some(provider) => pending.push(Box::pin(async move {
                    (channel.clone(), provider.send(payload, priority).await)
                })),
                None => {
                    log!(" [notify] unknown channel {channel:?}, skipping");
                }
            }
        }

        let results = futures::future::join_all(pending).await;
        results.into_iter().collect()
    }
}

impl Default for NotificationRouter {
    fn default() -> Self {
        Self::new()
    }
}
