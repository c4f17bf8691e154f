//! Pure, deterministic natural-language time parsing (C1).
//!
//! `parse` takes `now`/`tz` as arguments rather than reading the wall clock,
//! so the same input always produces the same output — this is the property
//! the intent normalizer (C2) and the scheduler rely on for testability.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub token: String,
    pub reason: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "could not parse {:?}: {}", self.token, self.reason)
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// A fully resolved absolute instant, in Unix seconds (UTC).
    Absolute(i64),
    /// A day and/or time-of-day was named but one half is missing; the
    /// caller (C2) is expected to ask a clarifying question.
    Partial {
        day: Option<String>,
        timeofday: Option<String>,
    },
}

fn normalize(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

static ISO_DATETIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})(?:[ t](\d{2}):(\d{2})(?::(\d{2}))?)?$").unwrap());

static AT_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^at (\d{1,2})(?::(\d{2}))?\s*(am|pm)?$").unwrap());

static RELATIVE_DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^in (\d+)\s*(minutes?|mins?|m|hours?|h|days?|d|weeks?)$").unwrap()
});

static NAMED_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(tomorrow|today|monday|tuesday|wednesday|thursday|friday|saturday|sunday)(?:\s+(?:at|by)\s+(.+))?$",
    )
    .unwrap()
});

fn weekday_index(name: &str) -> Option<u32> {
    Some(match name {
        "monday" => 0,
        "tuesday" => 1,
        "wednesday" => 2,
        "thursday" => 3,
        "friday" => 4,
        "saturday" => 5,
        "sunday" => 6,
        _ => return None,
    })
}

/// Parse a bare time-of-day fragment such as `"4:30 pm"`, `"16:30"`, `"9am"`.
fn parse_time_of_day(fragment: &str) -> Option<NaiveTime> {
    let fragment = fragment.trim();
    let caps = Regex::new(r"^(\d{1,2})(?::(\d{2}))?\s*(am|pm)?$")
        .ok()?
        .captures(fragment)?;
    let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = caps
        .get(2)
        .map(|m| m.as_str().parse().unwrap_or(0))
        .unwrap_or(0);
    if let Some(ampm) = caps.get(3) {
        match ampm.as_str() {
            "am" => {
                if hour == 12 {
                    hour = 0;
                }
            }
            "pm" => {
                if hour != 12 {
                    hour += 12;
                }
            }
            _ => {}
        }
    }
    if hour > 23 || minute > 59 {
        return None;
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn named_time_of_day(word: &str) -> Option<NaiveTime> {
    match word {
        "tonight" => NaiveTime::from_hms_opt(20, 0, 0),
        "morning" => NaiveTime::from_hms_opt(9, 0, 0),
        "afternoon" => NaiveTime::from_hms_opt(14, 0, 0),
        "evening" => NaiveTime::from_hms_opt(19, 0, 0),
        _ => None,
    }
}

fn to_unix(tz: Tz, naive: NaiveDateTime) -> i64 {
    tz.from_local_datetime(&naive)
        .single()
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
        .timestamp()
}

/// Deterministic natural-language time parser. `now` is the caller's
/// reference instant (UTC); `tz` is the timezone local expressions like
/// "at 9am" or "tomorrow" are resolved against.
pub fn parse(text: &str, now: chrono::DateTime<chrono::Utc>, tz: Tz) -> Result<ParseOutcome, ParseError> {
    let normalized = normalize(text);
    let local_now = now.with_timezone(&tz);

    if let Some(caps) = ISO_DATETIME.captures(&normalized) {
        let year: i32 = caps[1].parse().unwrap();
        let month: u32 = caps[2].parse().unwrap();
        let day: u32 = caps[3].parse().unwrap();
        let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| ParseError {
            token: normalized.clone(),
            reason: "invalid calendar date".to_string(),
        })?;
        let time = match (caps.get(4), caps.get(5)) {
            (Some(h), Some(m)) => {
                let hour: u32 = h.as_str().parse().unwrap();
                let minute: u32 = m.as_str().parse().unwrap();
                let second: u32 = caps.get(6).map(|s| s.as_str().parse().unwrap_or(0)).unwrap_or(0);
                NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(|| ParseError {
                    token: normalized.clone(),
                    reason: "invalid time of day".to_string(),
                })?
            }
            _ => NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
        };
        return Ok(ParseOutcome::Absolute(to_unix(tz, NaiveDateTime::new(date, time))));
    }

    if let Some(caps) = AT_TIME.captures(&normalized) {
        let fragment = caps.get(0).unwrap().as_str().trim_start_matches("at").trim();
        let time = parse_time_of_day(fragment).ok_or_else(|| ParseError {
            token: normalized.clone(),
            reason: "invalid time of day".to_string(),
        })?;
        let naive = NaiveDateTime::new(local_now.date_naive(), time);
        return Ok(ParseOutcome::Absolute(to_unix(tz, naive)));
    }

    if let Some(caps) = RELATIVE_DURATION.captures(&normalized) {
        let n: i64 = caps[1].parse().map_err(|_| ParseError {
            token: normalized.clone(),
            reason: "amount out of range".to_string(),
        })?;
        let unit = &caps[2];
        let delta = if unit.starts_with("min") || unit == "m" {
            Duration::minutes(n)
        } else if unit.starts_with("hour") || unit == "h" {
            Duration::hours(n)
        } else if unit.starts_with("week") {
            Duration::weeks(n)
        } else if unit.starts_with("day") || unit == "d" {
            Duration::days(n)
        } else {
            return Err(ParseError {
                token: unit.to_string(),
                reason: "unrecognized unit".to_string(),
            });
        };
        return Ok(ParseOutcome::Absolute((now + delta).timestamp()));
    }

    if let Some(caps) = NAMED_DAY.captures(&normalized) {
        let day_word = caps[1].to_string();
        let time_fragment = caps.get(2).map(|m| m.as_str().to_string());

        let target_date = match day_word.as_str() {
            "today" => local_now.date_naive(),
            "tomorrow" => local_now.date_naive() + Duration::days(1),
            weekday => {
                let target_dow = weekday_index(weekday).ok_or_else(|| ParseError {
                    token: weekday.to_string(),
                    reason: "unrecognized weekday".to_string(),
                })?;
                let current_dow = local_now.weekday().num_days_from_monday();
                let mut delta = (target_dow as i64 - current_dow as i64 + 7) % 7;
                if delta == 0 {
                    delta = 7;
                }
                local_now.date_naive() + Duration::days(delta)
            }
        };

        return match time_fragment {
            Some(ref frag) => {
                let time = parse_time_of_day(frag)
                    .or_else(|| named_time_of_day(frag))
                    .ok_or_else(|| ParseError {
                        token: frag.clone(),
                        reason: "invalid time of day".to_string(),
                    })?;
                Ok(ParseOutcome::Absolute(to_unix(
                    tz,
                    NaiveDateTime::new(target_date, time),
                )))
            }
            None => Ok(ParseOutcome::Partial {
                day: Some(day_word),
                timeofday: None,
            }),
        };
    }

    if let Some(time) = named_time_of_day(&normalized) {
        let naive = NaiveDateTime::new(local_now.date_naive(), time);
        return Ok(ParseOutcome::Absolute(to_unix(tz, naive)));
    }

    Err(ParseError {
        token: normalized,
        reason: "no recognized time expression".to_string(),
    })
}

/// True if `at` (a Unix timestamp) lies strictly before `now` in `tz`.
/// C2's sanity gate uses this rather than a raw `now` comparison so future
/// callers can't accidentally use the wrong reference clock.
pub fn is_in_past(at: i64, now: chrono::DateTime<chrono::Utc>) -> bool {
    at < now.timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> chrono::DateTime<chrono::Utc> {
        // Wednesday, 2026-07-29 12:00:00 UTC
        chrono::Utc.with_ymd_and_hms(2026, 7, 29, 12, 0, 0).unwrap()
    }

    #[test]
    fn parses_iso_datetime() {
        let out = parse("2026-08-01 14:30", fixed_now(), chrono_tz::UTC).unwrap();
        assert_eq!(out, ParseOutcome::Absolute(chrono::Utc.with_ymd_and_hms(2026, 8, 1, 14, 30, 0).unwrap().timestamp()));
    }

    #[test]
    fn parses_relative_duration() {
        let out = parse("in 2 hours", fixed_now(), chrono_tz::UTC).unwrap();
        assert_eq!(out, ParseOutcome::Absolute(fixed_now().timestamp() + 7200));
    }

    #[test]
    fn parses_relative_minutes_abbreviation() {
        let out = parse("in 15 m", fixed_now(), chrono_tz::UTC).unwrap();
        assert_eq!(out, ParseOutcome::Absolute(fixed_now().timestamp() + 900));
    }

    #[test]
    fn named_day_without_time_is_partial() {
        let out = parse("friday", fixed_now(), chrono_tz::UTC).unwrap();
        assert_eq!(
            out,
            ParseOutcome::Partial {
                day: Some("friday".to_string()),
                timeofday: None
            }
        );
    }

    #[test]
    fn tomorrow_at_time_resolves_absolute() {
        let out = parse("tomorrow at 4:30pm", fixed_now(), chrono_tz::UTC).unwrap();
        let expected = chrono::Utc.with_ymd_and_hms(2026, 7, 30, 16, 30, 0).unwrap().timestamp();
        assert_eq!(out, ParseOutcome::Absolute(expected));
    }

    #[test]
    fn at_time_in_the_past_is_not_rolled_forward() {
        // fixed_now is noon UTC; "at 9am" today has already passed.
        let out = parse("at 9am", fixed_now(), chrono_tz::UTC).unwrap();
        let expected = chrono::Utc.with_ymd_and_hms(2026, 7, 29, 9, 0, 0).unwrap().timestamp();
        assert_eq!(out, ParseOutcome::Absolute(expected));
        assert!(is_in_past(expected, fixed_now()));
    }

    #[test]
    fn tonight_means_eight_pm() {
        let out = parse("tonight", fixed_now(), chrono_tz::UTC).unwrap();
        let expected = chrono::Utc.with_ymd_and_hms(2026, 7, 29, 20, 0, 0).unwrap().timestamp();
        assert_eq!(out, ParseOutcome::Absolute(expected));
    }

    #[test]
    fn garbage_input_is_an_error_not_a_panic() {
        let err = parse("asdfasdf", fixed_now(), chrono_tz::UTC).unwrap_err();
        assert_eq!(err.token, "asdfasdf");
    }

    #[test]
    fn invalid_calendar_date_is_an_error() {
        let err = parse("2026-02-30", fixed_now(), chrono_tz::UTC).unwrap_err();
        assert!(err.reason.contains("calendar"));
    }

    #[test]
    fn same_inputs_yield_same_output() {
        let a = parse("in 3 days", fixed_now(), chrono_tz::UTC).unwrap();
        let b = parse("in 3 days", fixed_now(), chrono_tz::UTC).unwrap();
        assert_eq!(a, b);
    }
}
