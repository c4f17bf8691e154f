//! Cross-message modification for a pending confirmation draft.
//!
//! Within a draft's TTL the user can send a follow-up like "make that high
//! priority" or "change the time to 9am" instead of repeating the whole
//! reminder. This is the only path drafts mutate through — a small ladder of
//! independent regexes, each patching one field of the proposed payload.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_PRIORITY_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(high|medium|low)\s+priority\b").unwrap());
static RE_PRIORITY_NUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"priority\s+(?:to\s+)?(\d+)").unwrap());
static RE_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:change|set|make)\s+(?:the\s+)?time\s+to\s+(.+)$").unwrap());
static RE_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:change|set)\s+the\s+(?:message|text)\s+to\s+(.+)$").unwrap());
static RE_CADENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"every\s+(monday|tuesday|wednesday|thursday|friday|saturday|sunday|weekday)").unwrap()
});
static RE_CHANNEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:on|via|to)\s+(ntfy|voice|desktop_popup|morning_briefing)\b").unwrap());

fn priority_for_word(word: &str) -> i32 {
    match word {
        "high" => 8,
        "medium" => 5,
        "low" => 2,
        _ => 5,
    }
}

/// Apply every recognized patch in `text` to `payload` (a serialized
/// `ReminderIntent`). Returns `true` if at least one field changed; `false`
/// means the text matched none of the known modification phrases.
pub fn apply_patch(
    text: &str,
    now: chrono::DateTime<chrono::Utc>,
    tz_name: &str,
    payload: &mut serde_json::Value,
) -> bool {
    let lower = text.to_lowercase();
    let mut changed = false;

    if let Some(caps) = RE_PRIORITY_WORD.captures(&lower) {
        let (clamped, _) = reminder_core::types::clamp_priority(priority_for_word(&caps[1]));
        payload["priority"] = serde_json::json!(clamped);
        changed = true;
    } else if let Some(caps) = RE_PRIORITY_NUM.captures(&lower) {
        if let Ok(n) = caps[1].parse::<i32>() {
            let (clamped, _) = reminder_core::types::clamp_priority(n);
            payload["priority"] = serde_json::json!(clamped);
            changed = true;
        }
    }

    if let Some(caps) = RE_TIME.captures(&lower) {
        let tz: chrono_tz::Tz = tz_name.parse().unwrap_or(chrono_tz::UTC);
        if let Ok(reminder_time::ParseOutcome::Absolute(at)) = reminder_time::parse(caps[1].trim(), now, tz) {
            payload["due_at"] = serde_json::json!(at);
            payload["needs_clarification"] = serde_json::json!(false);
            payload["clarifying_question"] = serde_json::Value::Null;
            changed = true;
        }
    }

    if let Some(caps) = RE_TEXT.captures(&lower) {
        payload["message"] = serde_json::json!(caps[1].trim());
        changed = true;
    }

    if let Some(caps) = RE_CADENCE.captures(&lower) {
        payload["recurrence"] = serde_json::json!(caps[1].to_string());
        changed = true;
    }

    if let Some(caps) = RE_CHANNEL.captures(&lower) {
        payload["channels"] = serde_json::json!([caps[1].to_string()]);
        changed = true;
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc.with_ymd_and_hms(2026, 7, 29, 12, 0, 0).unwrap()
    }

    #[test]
    fn raises_priority_from_word() {
        let mut payload = serde_json::json!({ "priority": 5 });
        assert!(apply_patch("make that high priority", fixed_now(), "UTC", &mut payload));
        assert_eq!(payload["priority"], 8);
    }

    #[test]
    fn sets_time_from_phrase() {
        let mut payload = serde_json::json!({ "due_at": null, "needs_clarification": true });
        assert!(apply_patch("change the time to 9am", fixed_now(), "UTC", &mut payload));
        assert!(payload["due_at"].is_i64());
        assert_eq!(payload["needs_clarification"], false);
    }

    #[test]
    fn unrecognized_text_is_a_no_op() {
        let mut payload = serde_json::json!({ "priority": 5 });
        assert!(!apply_patch("sounds good, thanks", fixed_now(), "UTC", &mut payload));
    }

    #[test]
    fn sets_numeric_priority_and_clamps() {
        let mut payload = serde_json::json!({ "priority": 5 });
        assert!(apply_patch("priority to 99", fixed_now(), "UTC", &mut payload));
        assert_eq!(payload["priority"], 10);
    }
}
