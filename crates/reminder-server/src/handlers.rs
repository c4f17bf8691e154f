use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use reminder_core::log;
use reminder_core::types::{
    clamp_priority, now_unix, normalize_channels, AuditEntry, LedgerOperation, NotifyPayload,
    Reminder, ReminderIntent, ReminderKind, ReminderStatus,
};
use reminder_core::RemindError;
use serde::{Deserialize, Serialize};
use serde_json::json;

const IDEMPOTENCY_WINDOW_SEC: i64 = 60;
const CREATE_DEDUPE_TTL_SEC: i64 = reminder_store::idempotency::DEFAULT_TTL_SEC;
const DEFAULT_SESSION: &str = "default";

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Seconds to add to `now` for each recognized action button. `DONE` and
/// `CANCEL` aren't delay actions and are handled separately.
fn delay_seconds_for(action: &str) -> Option<i64> {
    match action {
        "SNOOZE_5" => Some(5 * 60),
        "SNOOZE_15" => Some(15 * 60),
        "SNOOZE_30" => Some(30 * 60),
        "SNOOZE_60" => Some(60 * 60),
        "DELAY_1H" => Some(3600),
        "DELAY_2H" => Some(2 * 3600),
        "DELAY_4H" => Some(4 * 3600),
        "DELAY_8H" => Some(8 * 3600),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

pub async fn action_handler(
    State(state): State<std::sync::Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<ActionRequest>,
) -> Result<Response, ApiError> {
    if !state.check_auth(bearer_token(&headers), req.token.as_deref()) {
        return Err(ApiError(RemindError::Auth("missing or invalid action token".to_string())));
    }

    let dedupe_key = format!("{id}:{}", req.action);
    let now = now_unix();
    let fresh = state.idempotency.try_claim(&dedupe_key, now, IDEMPOTENCY_WINDOW_SEC).await?;
    if !fresh {
        if let Some(cached) = state.idempotency.get_response(&dedupe_key, now).await? {
            return Ok((
                StatusCode::OK,
                [(axum::http::header::CONTENT_TYPE, "application/json")],
                cached,
            )
                .into_response());
        }
    }

    let session_id = req.session_id.clone().unwrap_or_else(|| DEFAULT_SESSION.to_string());
    let before = state.reminders.get(id).await?.ok_or_else(|| RemindError::NotFound(format!("reminder {id}")))?;

    let (reminder, confirmation) = if req.action == "DONE" {
        let r = state.reminders.acknowledge(id).await?;
        let confirmation = NotifyPayload {
            title: format!("{}: done", state.app_name),
            body: format!("Marked \"{}\" done.", r.message),
            actions: vec![],
            context: serde_json::Value::Null,
        };
        (r, Some(confirmation))
    } else if req.action == "CANCEL" {
        let r = state.reminders.cancel(id).await?;
        (r, None)
    } else if let Some(seconds) = delay_seconds_for(&req.action) {
        let r = state.reminders.snooze_or_delay(id, seconds, &req.action).await?;
        let confirmation = NotifyPayload {
            title: format!("{}: snoozed", state.app_name),
            body: format!("\"{}\" moved to a later time.", r.message),
            actions: vec![],
            context: serde_json::Value::Null,
        };
        (r, Some(confirmation))
    } else {
        return Err(ApiError(RemindError::Validation(format!("unknown action: {}", req.action))));
    };

    state
        .ledger
        .record(
            &session_id,
            "reminder",
            &id.to_string(),
            LedgerOperation::Update,
            Some(serde_json::to_value(reminder_view(&before)).map_err(|e| RemindError::Store(e.to_string()))?),
            serde_json::to_value(reminder_view(&reminder)).map_err(|e| RemindError::Store(e.to_string()))?,
        )
        .await?;

    if let Some(payload) = confirmation {
        let _ = state.router.dispatch(&["ntfy".to_string()], &payload, 1).await;
    }

    let body = serde_json::to_string(&reminder_view(&reminder)).map_err(|e| RemindError::Store(e.to_string()))?;
    state.idempotency.store_response(&dedupe_key, &body).await?;

    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response())
}

pub async fn health_handler(State(state): State<std::sync::Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let heartbeat = state.reminders.last_heartbeat().await?;
    let now = now_unix();
    let heartbeat_age_sec = heartbeat.map(|ts| now - ts);
    let stale_after = (state.scheduler_poll_sec.max(1) as i64) * 3;
    let is_alive = heartbeat_age_sec.map(|age| age <= stale_after).unwrap_or(false);

    let scheduled_count = state.reminders.scheduled_count().await?;
    let next_due = state.reminders.next_due().await?;
    let last_success = state.reminders.last_delivery_success().await?;
    let last_error = state.reminders.last_delivery_error().await?;

    Ok(Json(json!({
        "status": if is_alive { "ok" } else { "degraded" },
        "scheduler": {
            "last_heartbeat": heartbeat,
            "heartbeat_age_sec": heartbeat_age_sec,
            "is_alive": is_alive,
        },
        "reminders": {
            "scheduled_count": scheduled_count,
            "next_due_at": next_due.map(|(_, due)| due),
            "next_due_in_sec": next_due.map(|(_, due)| due - now),
        },
        "delivery": {
            "last_success": last_success,
            "last_error": last_error,
        },
        "timestamp": now,
    })))
}

/// `remind_at` accepts either an absolute Unix timestamp or any string the
/// time parser (C1) understands.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RemindAt {
    Unix(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
pub struct CreateReminderRequest {
    #[serde(default)]
    pub message: Option<String>,
    /// Free-text fallback: when `remind_at` is omitted, `message` (or this)
    /// is run through the intent normalizer (C2) instead of taken literally.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub remind_at: Option<RemindAt>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub channels: Option<Vec<String>>,
    /// Legacy single-channel field; mapped the same way the store's
    /// pre-migration `channel` column is.
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub context_ref: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub dedupe_key: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

fn legacy_channels(channel: &str) -> Vec<String> {
    match channel {
        "ntfy" => vec!["ntfy".to_string()],
        "voice" => vec!["voice".to_string()],
        "both" => vec!["ntfy".to_string(), "voice".to_string()],
        other => vec![other.to_string()],
    }
}

#[derive(Debug, Serialize)]
struct ReminderView<'a> {
    id: i64,
    kind: &'static str,
    message: &'a str,
    due_at: i64,
    timezone: &'a str,
    channels: &'a [String],
    priority: i32,
    status: &'static str,
    attempt_count: i32,
    last_error: &'a Option<String>,
    audit_log: &'a [AuditEntry],
}

fn reminder_view(r: &Reminder) -> ReminderView<'_> {
    ReminderView {
        id: r.id,
        kind: r.kind.as_str(),
        message: &r.message,
        due_at: r.due_at,
        timezone: &r.timezone,
        channels: &r.channels,
        priority: r.priority,
        status: r.status.as_str(),
        attempt_count: r.attempt_count,
        last_error: &r.last_error,
        audit_log: &r.audit_log,
    }
}

/// Insert a fully-resolved reminder, clamping priority (with a warning audit
/// entry per the boundary-behavior contract) and writing the create ledger
/// entry. Shared by the structured-body path and draft confirmation.
async fn commit_reminder(
    state: &AppState,
    session_id: &str,
    kind: ReminderKind,
    message: String,
    due_at: i64,
    timezone: String,
    channels: Vec<String>,
    priority: i32,
    context_ref: Option<String>,
) -> Result<Reminder, RemindError> {
    let (priority, clamped) = clamp_priority(priority);
    let message = reminder_core::guard::sanitize_body(&message)?;

    let reminder = Reminder {
        id: 0,
        kind,
        message,
        due_at,
        created_at: now_unix(),
        sent_at: None,
        canceled_at: None,
        timezone,
        channels: normalize_channels(channels),
        priority,
        status: ReminderStatus::Scheduled,
        attempt_count: 0,
        last_error: None,
        context_ref,
        audit_log: Vec::new(),
    };

    let mut created = state.reminders.create(reminder).await?;
    if clamped {
        state
            .reminders
            .append_audit(
                created.id,
                AuditEntry::new("priority_clamped", "system", "priority out of range, clamped to 1-10"),
            )
            .await?;
        created = state.reminders.get(created.id).await?.ok_or_else(|| RemindError::NotFound(created.id.to_string()))?;
    }

    state
        .ledger
        .record(
            session_id,
            "reminder",
            &created.id.to_string(),
            LedgerOperation::Create,
            None,
            serde_json::to_value(reminder_view(&created)).map_err(|e| RemindError::Store(e.to_string()))?,
        )
        .await?;

    Ok(created)
}

pub async fn create_handler(
    State(state): State<std::sync::Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateReminderRequest>,
) -> Result<Response, ApiError> {
    if !state.check_auth(bearer_token(&headers), req.token.as_deref()) {
        return Err(ApiError(RemindError::Auth("missing or invalid action token".to_string())));
    }

    let session_id = req.session_id.clone().unwrap_or_else(|| DEFAULT_SESSION.to_string());
    let tz_name = req.timezone.clone().unwrap_or_else(|| state.default_timezone.clone());
    let tz: chrono_tz::Tz = tz_name.parse().unwrap_or(chrono_tz::UTC);
    let now = chrono::Utc::now();
    let kind = req
        .kind
        .as_deref()
        .map(|k| ReminderKind::parse(k).ok_or_else(|| RemindError::Validation(format!("unknown kind: {k}"))))
        .transpose()?
        .unwrap_or(ReminderKind::Remind);

    let message = req
        .message
        .clone()
        .or_else(|| req.text.clone())
        .ok_or_else(|| RemindError::Validation("message must not be empty".to_string()))?;
    if message.trim().is_empty() {
        return Err(ApiError(RemindError::Validation("message must not be empty".to_string())));
    }

    let channels = match (&req.channels, &req.channel) {
        (Some(list), _) => list.clone(),
        (None, Some(single)) => legacy_channels(single),
        (None, None) => Vec::new(),
    };

    // Structured path: `remind_at` was supplied, so C1 resolves it directly
    // and C2's natural-language ladder is never consulted.
    if let Some(remind_at) = &req.remind_at {
        let due_at = match remind_at {
            RemindAt::Unix(ts) => *ts,
            RemindAt::Text(text) => match reminder_time::parse(text, now, tz) {
                Ok(reminder_time::ParseOutcome::Absolute(at)) => at,
                Ok(reminder_time::ParseOutcome::Partial { .. }) => {
                    return Err(ApiError(RemindError::Validation(
                        "remind_at names a day with no time of day".to_string(),
                    )))
                }
                Err(e) => return Err(ApiError(RemindError::Parse(e.to_string()))),
            },
        };

        if reminder_time::is_in_past(due_at, now) {
            let intent = ReminderIntent {
                intent_type: "remind".to_string(),
                message,
                due_at: Some(due_at),
                timezone: tz_name,
                channels,
                recurrence: None,
                priority: req.priority.unwrap_or(5),
                confidence: 1.0,
                needs_clarification: true,
                clarifying_question: Some("That time has already passed — what time did you mean?".to_string()),
                parsed_partial: serde_json::Value::Null,
            };
            let draft = state
                .pending
                .create(&session_id, "reminder", serde_json::to_value(&intent).map_err(|e| RemindError::Store(e.to_string()))?)
                .await?;
            return Ok((
                StatusCode::ACCEPTED,
                Json(json!({
                    "status": "needs_clarification",
                    "draft_id": draft.draft_id,
                    "clarifying_question": intent.clarifying_question,
                    "expires_at": draft.expires_at,
                })),
            )
                .into_response());
        }

        let dedupe_key = req
            .dedupe_key
            .clone()
            .unwrap_or_else(|| reminder_store::idempotency::derive_dedupe_key(&message, Some(due_at), &channels));
        let now_ts = now_unix();
        let fresh = state.idempotency.try_claim(&dedupe_key, now_ts, CREATE_DEDUPE_TTL_SEC).await?;
        if !fresh {
            log!(" [server] duplicate create ingest for dedupe key {dedupe_key}, dropped");
            if let Some(cached) = state.idempotency.get_response(&dedupe_key, now_ts).await? {
                return Ok((
                    StatusCode::OK,
                    [(axum::http::header::CONTENT_TYPE, "application/json")],
                    cached,
                )
                    .into_response());
            }
        }

        let created = commit_reminder(
            &state,
            &session_id,
            kind,
            message,
            due_at,
            tz_name,
            channels,
            req.priority.unwrap_or(5),
            req.context_ref.clone(),
        )
        .await?;

        let body = serde_json::to_string(&reminder_view(&created)).map_err(|e| RemindError::Store(e.to_string()))?;
        state.idempotency.store_response(&dedupe_key, &body).await?;
        log!(" [server] created reminder {} due_at={}", created.id, created.due_at);
        return Ok((StatusCode::CREATED, [(axum::http::header::CONTENT_TYPE, "application/json")], body).into_response());
    }

    // Free-text path: no explicit time was given, so the message is run
    // through the intent normalizer and may park as a draft.
    let intent = reminder_intent::normalize(&message, now, &tz_name)
        .ok_or_else(|| RemindError::Validation("could not interpret reminder text".to_string()))?;

    if intent.needs_clarification {
        let draft = state
            .pending
            .create(&session_id, "reminder", serde_json::to_value(&intent).map_err(|e| RemindError::Store(e.to_string()))?)
            .await?;
        return Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "needs_clarification",
                "draft_id": draft.draft_id,
                "clarifying_question": intent.clarifying_question,
                "expires_at": draft.expires_at,
            })),
        )
            .into_response());
    }

    let due_at = intent
        .due_at
        .ok_or_else(|| RemindError::Validation("normalized intent carried no due time".to_string()))?;
    let resolved_channels = if channels.is_empty() { intent.channels.clone() } else { channels };
    let priority = req.priority.unwrap_or(intent.priority);

    let created = commit_reminder(
        &state,
        &session_id,
        kind,
        intent.message.clone(),
        due_at,
        tz_name,
        resolved_channels,
        priority,
        req.context_ref.clone(),
    )
    .await?;

    log!(" [server] created reminder {} due_at={}", created.id, created.due_at);
    Ok((StatusCode::CREATED, Json(reminder_view(&created))).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

pub async fn list_handler(
    State(state): State<std::sync::Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<serde_json::Value>>, ApiError> {
    let status = match q.status.as_deref() {
        None | Some("all") => None,
        Some(s) => Some(
            ReminderStatus::parse(s).ok_or_else(|| RemindError::Validation(format!("unknown status: {s}")))?,
        ),
    };
    let reminders = state.reminders.list(status).await?;
    let views: Vec<serde_json::Value> = reminders
        .iter()
        .map(|r| serde_json::to_value(reminder_view(r)).unwrap_or(serde_json::Value::Null))
        .collect();
    Ok(Json(views))
}

pub async fn get_handler(
    State(state): State<std::sync::Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let reminder = state
        .reminders
        .get(id)
        .await?
        .ok_or_else(|| RemindError::NotFound(format!("reminder {id}")))?;
    Ok(Json(serde_json::to_value(reminder_view(&reminder)).map_err(|e| RemindError::Store(e.to_string()))?))
}

#[derive(Debug, Deserialize)]
pub struct UndoRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct UndoLastRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Reverse the mutation a ledger entry recorded, re-applying the prior
/// snapshot and writing its own `undo` entry so the undo itself can be
/// undone within a fresh window.
async fn apply_undo(
    state: &AppState,
    entry: reminder_core::types::ActionLedgerEntry,
) -> Result<reminder_core::types::ActionLedgerEntry, RemindError> {
    let now = now_unix();
    reminder_store::ledger::is_within_window(&entry, now).map_err(|outcome| match outcome {
        reminder_store::ledger::UndoOutcome::Gone => RemindError::State {
            from: "expired".to_string(),
            to: "undone".to_string(),
        },
        reminder_store::ledger::UndoOutcome::AlreadyUndone => RemindError::State {
            from: "already_undone".to_string(),
            to: "undone".to_string(),
        },
    })?;

    let entity_id: i64 = entry
        .entity_id
        .parse()
        .map_err(|_| RemindError::Store(format!("non-numeric entity id in ledger entry {}", entry.action_id)))?;

    let current = state.reminders.get(entity_id).await?;
    let current_snapshot = match &current {
        Some(r) => serde_json::to_value(reminder_view(r)).map_err(|e| RemindError::Store(e.to_string()))?,
        None => serde_json::Value::Null,
    };

    match entry.operation {
        LedgerOperation::Create => {
            state.reminders.delete(entity_id).await?;
        }
        LedgerOperation::Update | LedgerOperation::Undo | LedgerOperation::Delete => {
            let before = entry
                .before_snapshot
                .clone()
                .ok_or_else(|| RemindError::Store("ledger entry missing before_snapshot".to_string()))?;
            let restored: Reminder =
                serde_json::from_value(before).map_err(|e| RemindError::Store(e.to_string()))?;
            state.reminders.restore(&restored).await?;
        }
    }

    state.ledger.mark_undone(&entry.action_id, now).await?;

    state
        .ledger
        .record(
            &entry.session_id,
            &entry.entity_type,
            &entry.entity_id,
            LedgerOperation::Undo,
            Some(current_snapshot),
            entry.before_snapshot.clone().unwrap_or(serde_json::Value::Null),
        )
        .await
}

pub async fn undo_handler(
    State(state): State<std::sync::Arc<AppState>>,
    Json(req): Json<UndoRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entry = state
        .ledger
        .find_by_token(&req.token)
        .await?
        .ok_or_else(|| RemindError::NotFound(format!("undo token {}", req.token)))?;
    let undone = apply_undo(&state, entry).await?;
    Ok(Json(json!({ "status": "undone", "entity_id": undone.entity_id })))
}

pub async fn undo_last_handler(
    State(state): State<std::sync::Arc<AppState>>,
    Json(req): Json<UndoLastRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session_id = req.session_id.unwrap_or_else(|| DEFAULT_SESSION.to_string());
    let now = now_unix();
    let entry = state
        .ledger
        .most_recent_undoable(&session_id, now)
        .await?
        .ok_or_else(|| RemindError::NotFound(format!("no undoable action for session {session_id}")))?;
    let undone = apply_undo(&state, entry).await?;
    Ok(Json(json!({ "status": "undone", "entity_id": undone.entity_id })))
}

#[derive(Debug, Deserialize)]
pub struct ModifyDraftRequest {
    pub text: String,
}

pub async fn modify_draft_handler(
    State(state): State<std::sync::Arc<AppState>>,
    Path(draft_id): Path<String>,
    Json(req): Json<ModifyDraftRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let draft = state
        .pending
        .get(&draft_id)
        .await?
        .ok_or_else(|| RemindError::NotFound(format!("draft {draft_id}")))?;

    let tz_name = draft
        .proposed_payload
        .get("timezone")
        .and_then(|v| v.as_str())
        .unwrap_or(&state.default_timezone)
        .to_string();

    let mut payload = draft.proposed_payload.clone();
    let changed = reminder_intent::modify::apply_patch(&req.text, chrono::Utc::now(), &tz_name, &mut payload);
    if !changed {
        return Err(ApiError(RemindError::Validation(
            "could not recognize a modification in that message".to_string(),
        )));
    }

    let patched = state.pending.patch(&draft_id, payload, now_unix()).await?;
    Ok(Json(json!({
        "draft_id": patched.draft_id,
        "proposed_payload": patched.proposed_payload,
        "expires_at": patched.expires_at,
    })))
}

pub async fn confirm_draft_handler(
    State(state): State<std::sync::Arc<AppState>>,
    Path(draft_id): Path<String>,
) -> Result<Response, ApiError> {
    let draft = state
        .pending
        .get(&draft_id)
        .await?
        .ok_or_else(|| RemindError::NotFound(format!("draft {draft_id}")))?;
    if draft.committed_at.is_some() {
        return Err(ApiError(RemindError::State {
            from: "committed".to_string(),
            to: "confirmed".to_string(),
        }));
    }
    let now = now_unix();
    if now > draft.expires_at {
        return Err(ApiError(RemindError::State {
            from: "expired".to_string(),
            to: "confirmed".to_string(),
        }));
    }

    let intent: ReminderIntent =
        serde_json::from_value(draft.proposed_payload.clone()).map_err(|e| RemindError::Store(e.to_string()))?;
    let due_at = intent
        .due_at
        .ok_or_else(|| RemindError::Validation("draft has no resolved due time yet".to_string()))?;

    let kind = ReminderKind::Remind;
    let created = commit_reminder(
        &state,
        &draft.session_id,
        kind,
        intent.message,
        due_at,
        intent.timezone,
        intent.channels,
        intent.priority,
        None,
    )
    .await?;

    state.pending.commit(&draft_id, now).await?;

    Ok((StatusCode::CREATED, Json(reminder_view(&created))).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_both_maps_to_ntfy_then_voice() {
        assert_eq!(legacy_channels("both"), vec!["ntfy".to_string(), "voice".to_string()]);
    }
}
