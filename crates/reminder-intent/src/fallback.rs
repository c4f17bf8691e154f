use reminder_core::error::Result;
use serde::{Deserialize, Serialize};

/// JSON shape an LLM fallback is required to produce. Kept separate from
/// `ReminderIntent` since it has a stricter, LLM-facing contract (a
/// `missing_fields` list, a raw `payload` blob) that the deterministic
/// patterns don't need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackIntent {
    pub intent_type: String,
    pub action: String,
    pub payload: serde_json::Value,
    pub confidence: f32,
    #[serde(default)]
    pub missing_fields: Vec<String>,
}

/// Capability boundary for an optional, config-gated LLM-assisted fallback.
/// The normalizer core never names a concrete LLM SDK — only this trait —
/// so it stays testable with a scripted fake and usable with none at all.
pub trait IntentFallback: Send + Sync {
    fn classify(&self, text: &str) -> impl std::future::Future<Output = Result<FallbackIntent>> + Send;
}

/// Default no-op used when the fallback config flag is off.
pub struct NullFallback;

impl IntentFallback for NullFallback {
    async fn classify(&self, _text: &str) -> Result<FallbackIntent> {
        Err(reminder_core::error::RemindError::Parse(
            "no fallback configured".to_string(),
        ))
    }
}

/// Gate (a)-(e) from the normalizer contract: parses, pure ASCII, confident
/// enough, nothing missing, and not a disguised "I don't know".
pub fn accept_fallback(intent: &FallbackIntent, raw_response: &str) -> bool {
    raw_response.is_ascii()
        && intent.confidence >= 0.85
        && intent.missing_fields.is_empty()
        && intent.intent_type != "unknown"
        && intent.action != "noop"
}
