//! Turns free-form text into a `ReminderIntent`, or decides the text isn't
//! about reminders at all. The pattern table is tried top to bottom, first
//! match wins — the same "ladder" shape the underlying time parser uses for
//! its own recognizers, just one level up.

pub mod fallback;
pub mod modify;

use fallback::{accept_fallback, IntentFallback};
use once_cell::sync::Lazy;
use reminder_core::types::ReminderIntent;
use regex::Regex;

const WEEKDAYS: &[&str] = &[
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

const ACTION_KEYWORDS: &[&str] = &[
    "remind", "reminder", "schedule", "goal", "remember", "set", "create", "add", "make", "help me",
];

const TIME_TRIGGERS: &[&str] = &[
    "at", "in", "on", "tomorrow", "today", "tonight", "morning", "afternoon", "evening", "monday",
    "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
];

const VAGUE_TIMEOFDAY_WORDS: &[&str] = &["morning", "afternoon", "evening", "tonight"];

static NEGATIVE_ALREADY_SET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^i (already )?(set|created) a reminder").unwrap());
static NEGATIVE_HOW_DOES_IT_WORK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"how do reminders work").unwrap());

static RE_REMIND_ME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^remind me( to)? (.+)$").unwrap());
static RE_BRIEFING_ADD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^add to my briefing:\s*(.+)$").unwrap());
static RE_BRIEFING_RECURRING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^every (monday|tuesday|wednesday|thursday|friday|saturday|sunday|weekday) in my morning briefing help me (.+)$").unwrap()
});
static RE_BRIEFING_ONESHOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^in my (?:morning )?briefing help me (.+)$").unwrap());
static RE_IMPERATIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:set|create|add|schedule) a reminder(?: for me)?(?: to)? (.+)$").unwrap());
static RE_RECURRING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^every (monday|tuesday|wednesday|thursday|friday|saturday|sunday|weekday) help me (.+)$").unwrap()
});
static RE_RELATIVE_DURATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^in \d+\s*(minutes?|mins?|m|hours?|h|days?|d|weeks?)$").unwrap());

fn normalize_text(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn levenshtein_le_one(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (a, b) = if a.len() > b.len() { (b, a) } else { (a, b) };
    if b.len() - a.len() > 1 {
        return false;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    // Same length: at most one substitution.
    if a.len() == b.len() {
        return a.iter().zip(b.iter()).filter(|(x, y)| x != y).count() <= 1;
    }
    // b is exactly one char longer: one insertion into a gets to b.
    let mut i = 0;
    let mut j = 0;
    let mut skipped = false;
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            i += 1;
            j += 1;
        } else if !skipped {
            skipped = true;
            j += 1;
        } else {
            return false;
        }
    }
    true
}

const TYPO_DICTIONARY: &[&str] = &["briefing", "reminder", "remind", "tomorrow"];

/// Single-edit-distance fixups scoped to a small fixed word list — not a
/// general spell-checker.
fn fix_typos(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            if TYPO_DICTIONARY.contains(&word) {
                return word.to_string();
            }
            for candidate in TYPO_DICTIONARY {
                if levenshtein_le_one(word, candidate) {
                    return (*candidate).to_string();
                }
            }
            word.to_string()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_negative(text: &str) -> bool {
    text.starts_with('/')
        || text.is_empty()
        || NEGATIVE_ALREADY_SET.is_match(text)
        || NEGATIVE_HOW_DOES_IT_WORK.is_match(text)
        || !text.is_ascii()
}

fn split_time_phrase(rest: &str) -> Option<(String, String)> {
    let words: Vec<&str> = rest.split_whitespace().collect();
    for i in 0..words.len() {
        if TIME_TRIGGERS.contains(&words[i]) {
            let message = words[..i].join(" ");
            let time_phrase = words[i..].join(" ");
            if !message.is_empty() {
                return Some((message, time_phrase));
            }
        }
    }
    None
}

fn has_digits(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_digit())
}

fn is_vague_timeofday_phrase(phrase: &str) -> Option<(String, String)> {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    if words.len() < 2 || has_digits(phrase) {
        return None;
    }
    let day = words[0];
    let is_day = day == "tomorrow" || day == "today" || WEEKDAYS.contains(&day);
    let last = *words.last().unwrap();
    if is_day && VAGUE_TIMEOFDAY_WORDS.contains(&last) {
        return Some((day.to_string(), last.to_string()));
    }
    None
}

struct TimeResolution {
    due_at: Option<i64>,
    needs_clarification: bool,
    clarifying_question: Option<String>,
    parsed_partial: serde_json::Value,
    is_relative_duration: bool,
}

/// Resolve a trailing time phrase the way tiers 1/5/6/7/8 all need to:
/// relative duration, vague day+time-of-day, or a fully absolute time.
fn resolve_time_phrase(
    time_phrase: &str,
    now: chrono::DateTime<chrono::Utc>,
    tz: chrono_tz::Tz,
) -> TimeResolution {
    if RE_RELATIVE_DURATION.is_match(time_phrase) {
        if let Ok(reminder_time::ParseOutcome::Absolute(at)) = reminder_time::parse(time_phrase, now, tz) {
            return TimeResolution {
                due_at: Some(at),
                needs_clarification: false,
                clarifying_question: None,
                parsed_partial: serde_json::Value::Null,
                is_relative_duration: true,
            };
        }
    }

    if let Some((day, timeofday)) = is_vague_timeofday_phrase(time_phrase) {
        return TimeResolution {
            due_at: None,
            needs_clarification: true,
            clarifying_question: Some(format!("What time {timeofday} on {day}?")),
            parsed_partial: serde_json::json!({ "day": day, "timeofday": timeofday }),
            is_relative_duration: false,
        };
    }

    match reminder_time::parse(time_phrase, now, tz) {
        Ok(reminder_time::ParseOutcome::Absolute(at)) => TimeResolution {
            due_at: Some(at),
            needs_clarification: false,
            clarifying_question: None,
            parsed_partial: serde_json::Value::Null,
            is_relative_duration: false,
        },
        Ok(reminder_time::ParseOutcome::Partial { day, timeofday }) => TimeResolution {
            due_at: None,
            needs_clarification: true,
            clarifying_question: Some("When would you like to be reminded?".to_string()),
            parsed_partial: serde_json::json!({ "day": day, "timeofday": timeofday }),
            is_relative_duration: false,
        },
        Err(_) => TimeResolution {
            due_at: None,
            needs_clarification: true,
            clarifying_question: Some("When would you like to be reminded?".to_string()),
            parsed_partial: serde_json::Value::Null,
            is_relative_duration: false,
        },
    }
}

fn base_intent(message: &str, tz: &str) -> ReminderIntent {
    ReminderIntent {
        intent_type: "reminder".to_string(),
        message: message.trim().to_string(),
        due_at: None,
        timezone: tz.to_string(),
        channels: vec!["ntfy".to_string()],
        recurrence: None,
        priority: 5,
        confidence: 0.0,
        needs_clarification: false,
        clarifying_question: None,
        parsed_partial: serde_json::Value::Null,
    }
}

/// Try the "remind me [to] X [time]" family shared by tiers 1, 6, 7, 8.
fn try_remind_me(rest: &str, now: chrono::DateTime<chrono::Utc>, tz_name: &str, tz: chrono_tz::Tz) -> Option<ReminderIntent> {
    match split_time_phrase(rest) {
        None => {
            let mut intent = base_intent(rest, tz_name);
            intent.confidence = 0.60;
            intent.needs_clarification = true;
            intent.clarifying_question = Some("When would you like to be reminded?".to_string());
            Some(intent)
        }
        Some((message, time_phrase)) => {
            let resolution = resolve_time_phrase(&time_phrase, now, tz);
            let mut intent = base_intent(&message, tz_name);
            intent.due_at = resolution.due_at;
            intent.needs_clarification = resolution.needs_clarification;
            intent.clarifying_question = resolution.clarifying_question;
            intent.parsed_partial = resolution.parsed_partial;
            intent.confidence = if resolution.is_relative_duration {
                0.90
            } else if resolution.due_at.is_some() {
                0.95
            } else {
                0.70
            };
            Some(intent)
        }
    }
}

/// Normalize free text into a reminder intent, or `None` if it clearly
/// isn't about reminders. Deterministic given `(now, tz)`.
pub fn normalize(text: &str, now: chrono::DateTime<chrono::Utc>, tz_name: &str) -> Option<ReminderIntent> {
    let trimmed = text.trim();
    if is_negative(&trimmed.to_lowercase()) {
        return None;
    }

    let tz: chrono_tz::Tz = tz_name.parse().unwrap_or(chrono_tz::UTC);
    let normalized = fix_typos(&normalize_text(trimmed));

    let mut intent = if let Some(caps) = RE_REMIND_ME.captures(&normalized) {
        try_remind_me(&caps[2], now, tz_name, tz)?
    } else if let Some(caps) = RE_BRIEFING_ADD.captures(&normalized) {
        let mut intent = base_intent(&caps[1], tz_name);
        intent.channels = vec!["morning_briefing".to_string()];
        intent.needs_clarification = true;
        intent.clarifying_question = Some("What day and time for this briefing?".to_string());
        intent.confidence = 0.90;
        intent
    } else if let Some(caps) = RE_BRIEFING_RECURRING.captures(&normalized) {
        let day = caps[1].to_string();
        let mut intent = base_intent(&caps[2], tz_name);
        intent.channels = vec!["morning_briefing".to_string()];
        intent.recurrence = Some(format!("{day}_morning"));
        intent.needs_clarification = true;
        intent.clarifying_question = Some(format!("What time morning on {day}?"));
        intent.confidence = 0.90;
        intent
    } else if let Some(caps) = RE_BRIEFING_ONESHOT.captures(&normalized) {
        let mut intent = base_intent(&caps[1], tz_name);
        intent.channels = vec!["morning_briefing".to_string()];
        intent.needs_clarification = true;
        intent.confidence = 0.85;
        intent
    } else if let Some(caps) = RE_IMPERATIVE.captures(&normalized) {
        let rest = &caps[1];
        match split_time_phrase(rest) {
            None => {
                let mut intent = base_intent(rest, tz_name);
                intent.needs_clarification = true;
                intent.clarifying_question = Some("When would you like to be reminded?".to_string());
                intent.confidence = 0.90;
                intent
            }
            Some((message, time_phrase)) => {
                let resolution = resolve_time_phrase(&time_phrase, now, tz);
                let mut intent = base_intent(&message, tz_name);
                intent.due_at = resolution.due_at;
                intent.needs_clarification = resolution.needs_clarification;
                intent.clarifying_question = resolution.clarifying_question;
                intent.parsed_partial = resolution.parsed_partial;
                intent.confidence = 0.90;
                intent
            }
        }
    } else if let Some(caps) = RE_RECURRING.captures(&normalized) {
        let day = caps[1].to_string();
        let mut intent = base_intent(&caps[2], tz_name);
        intent.recurrence = Some(day.clone());
        intent.needs_clarification = true;
        intent.clarifying_question = Some(format!("What time on {day}?"));
        intent.confidence = 0.75;
        intent
    } else {
        return None;
    };

    apply_sanity_gates(&mut intent, now, tz);
    Some(intent)
}

fn apply_sanity_gates(intent: &mut ReminderIntent, now: chrono::DateTime<chrono::Utc>, _tz: chrono_tz::Tz) {
    if let Some(at) = intent.due_at {
        if reminder_time::is_in_past(at, now) {
            intent.needs_clarification = true;
            if intent.clarifying_question.is_none() {
                intent.clarifying_question =
                    Some("That time has already passed — what time did you mean?".to_string());
            }
        }
        let one_year = now.timestamp() + 365 * 24 * 3600;
        if at > one_year {
            let mut obj = match std::mem::take(&mut intent.parsed_partial) {
                serde_json::Value::Object(m) => m,
                _ => serde_json::Map::new(),
            };
            obj.insert("warning".to_string(), serde_json::json!("far_future"));
            intent.parsed_partial = serde_json::Value::Object(obj);
        }
    }
}

/// Invoked only when every deterministic tier above returned `None` and the
/// text still plausibly names an action. Accepts or rejects per gates (a)-(e);
/// never executes silently on a rejected fallback.
pub async fn normalize_with_fallback<F: IntentFallback>(
    text: &str,
    now: chrono::DateTime<chrono::Utc>,
    tz_name: &str,
    fallback: &F,
    fallback_enabled: bool,
) -> Option<ReminderIntent> {
    if let Some(intent) = normalize(text, now, tz_name) {
        return Some(intent);
    }
    if !fallback_enabled {
        return None;
    }
    let lower = text.to_lowercase();
    if !ACTION_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return None;
    }
    let raw = match fallback.classify(text).await {
        Ok(raw) => raw,
        Err(_) => return None,
    };
    let raw_json = serde_json::to_string(&raw).unwrap_or_default();
    if !accept_fallback(&raw, &raw_json) {
        return None;
    }
    let mut intent = base_intent(text, tz_name);
    intent.intent_type = raw.intent_type;
    intent.confidence = raw.confidence;
    intent.needs_clarification = true;
    intent.clarifying_question = Some("Can you confirm the details for this reminder?".to_string());
    intent.parsed_partial = raw.payload;
    Some(intent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc.with_ymd_and_hms(2026, 7, 29, 12, 0, 0).unwrap()
    }

    #[test]
    fn explicit_time_has_high_confidence() {
        let intent = normalize("remind me to call mom at 9am tomorrow", fixed_now(), "UTC").unwrap();
        assert!(!intent.needs_clarification);
        assert_eq!(intent.confidence, 0.95);
        assert_eq!(intent.message, "call mom");
    }

    #[test]
    fn briefing_add_needs_clarification() {
        let intent = normalize("add to my briefing: standup notes", fixed_now(), "UTC").unwrap();
        assert!(intent.needs_clarification);
        assert_eq!(intent.channels, vec!["morning_briefing".to_string()]);
        assert_eq!(intent.confidence, 0.90);
    }

    #[test]
    fn simple_remind_has_low_confidence_and_asks() {
        let intent = normalize("remind me to water the plants", fixed_now(), "UTC").unwrap();
        assert!(intent.needs_clarification);
        assert_eq!(intent.confidence, 0.60);
    }

    #[test]
    fn relative_duration_is_tier_six() {
        let intent = normalize("remind me to stretch in 20 minutes", fixed_now(), "UTC").unwrap();
        assert!(!intent.needs_clarification);
        assert_eq!(intent.confidence, 0.90);
    }

    #[test]
    fn vague_timeofday_needs_clarification_with_partial() {
        let intent = normalize("remind me to call the dentist tomorrow morning", fixed_now(), "UTC").unwrap();
        assert!(intent.needs_clarification);
        assert_eq!(intent.due_at, None);
        assert_eq!(intent.parsed_partial["day"], "tomorrow");
        assert_eq!(intent.parsed_partial["timeofday"], "morning");
    }

    #[test]
    fn recurring_without_briefing() {
        let intent = normalize("every friday help me submit the timesheet", fixed_now(), "UTC").unwrap();
        assert_eq!(intent.recurrence.as_deref(), Some("friday"));
        assert_eq!(intent.confidence, 0.75);
        assert!(intent.needs_clarification);
    }

    #[test]
    fn negatives_return_none() {
        assert!(normalize("I already set a reminder for this", fixed_now(), "UTC").is_none());
        assert!(normalize("how do reminders work", fixed_now(), "UTC").is_none());
        assert!(normalize("/start", fixed_now(), "UTC").is_none());
        assert!(normalize("", fixed_now(), "UTC").is_none());
    }

    #[test]
    fn past_due_time_is_flagged_not_rolled_forward() {
        let intent = normalize("remind me to call support at 9am", fixed_now(), "UTC").unwrap();
        assert!(intent.due_at.is_some());
        assert!(intent.needs_clarification);
    }

    #[test]
    fn typo_tolerance_fixes_single_edit_distance() {
        let intent = normalize("remind me to text mom tommorow at 9am", fixed_now(), "UTC");
        assert!(intent.is_some());
    }

    #[test]
    fn unrelated_text_returns_none() {
        assert!(normalize("hello there, how are you?", fixed_now(), "UTC").is_none());
    }
}
