use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Unix epoch timestamp in seconds (UTC). The only timestamp representation
/// used anywhere in this crate.
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}

/// Generate a ULID-like id using timestamp + random bytes from the OS RNG.
pub fn new_id() -> String {
    use rand::RngCore;
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64;
    let random = rand::thread_rng().next_u64();
    format!("{ts:012x}{random:016x}")
}

/// 8-character undo token drawn from a 32-letter alphabet with ambiguous
/// letters (0/O, 1/I/L, etc.) excluded.
pub const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

pub fn new_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderKind {
    Remind,
    Alarm,
}

impl ReminderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remind => "REMIND",
            Self::Alarm => "ALARM",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "REMIND" => Some(Self::Remind),
            "ALARM" => Some(Self::Alarm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Draft,
    Scheduled,
    Fired,
    Acknowledged,
    Snoozed,
    Canceled,
    Failed,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Fired => "fired",
            Self::Acknowledged => "acknowledged",
            Self::Snoozed => "snoozed",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "scheduled" => Some(Self::Scheduled),
            "fired" => Some(Self::Fired),
            "acknowledged" => Some(Self::Acknowledged),
            "snoozed" => Some(Self::Snoozed),
            "canceled" => Some(Self::Canceled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Known notification channels. Anything else is accepted on the wire but
/// logged and skipped at dispatch time (spec: "unknown channels are non-fatal").
pub const KNOWN_CHANNELS: &[&str] = &["ntfy", "voice", "desktop_popup", "morning_briefing"];

/// De-duplicate a channel list while preserving first-occurrence order.
pub fn normalize_channels(channels: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for c in channels {
        if seen.insert(c.clone()) {
            out.push(c);
        }
    }
    if out.is_empty() {
        out.push("ntfy".to_string());
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: i64,
    pub action: String,
    pub actor: String,
    pub details: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AuditEntry {
    pub fn new(action: impl Into<String>, actor: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            ts: now_unix(),
            action: action.into(),
            actor: actor.into(),
            details: details.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Audit log cap per reminder; oldest entries are dropped first.
pub const AUDIT_LOG_CAP: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: i64,
    pub kind: ReminderKind,
    pub message: String,
    pub due_at: i64,
    pub created_at: i64,
    pub sent_at: Option<i64>,
    pub canceled_at: Option<i64>,
    pub timezone: String,
    pub channels: Vec<String>,
    pub priority: i32,
    pub status: ReminderStatus,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub context_ref: Option<String>,
    pub audit_log: Vec<AuditEntry>,
}

impl Reminder {
    /// Append an audit entry, dropping the oldest entry once the cap is exceeded.
    pub fn push_audit(&mut self, entry: AuditEntry) {
        self.audit_log.push(entry);
        if self.audit_log.len() > AUDIT_LOG_CAP {
            let overflow = self.audit_log.len() - AUDIT_LOG_CAP;
            self.audit_log.drain(0..overflow);
        }
    }
}

/// Clamp a user-supplied priority into the valid 1-10 range.
pub fn clamp_priority(priority: i32) -> (i32, bool) {
    if priority < 1 {
        (1, true)
    } else if priority > 10 {
        (10, true)
    } else {
        (priority, false)
    }
}

/// Value produced by the intent normalizer (C2). Not persisted directly —
/// the caller either inserts it into the store or parks it as a pending draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderIntent {
    pub intent_type: String,
    pub message: String,
    pub due_at: Option<i64>,
    pub timezone: String,
    pub channels: Vec<String>,
    pub recurrence: Option<String>,
    pub priority: i32,
    pub confidence: f32,
    pub needs_clarification: bool,
    pub clarifying_question: Option<String>,
    pub parsed_partial: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub ok: bool,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl DeliveryResult {
    pub fn ok(provider: impl Into<String>, message_id: Option<String>) -> Self {
        Self {
            ok: true,
            provider: provider.into(),
            message_id,
            error: None,
            dry_run: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn dry_run(provider: impl Into<String>) -> Self {
        Self {
            ok: true,
            provider: provider.into(),
            message_id: None,
            error: None,
            dry_run: Some(true),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn err(provider: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            provider: provider.into(),
            message_id: None,
            error: Some(error.into()),
            dry_run: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn not_implemented(provider: impl Into<String>) -> Self {
        Self::err(provider, "not_implemented")
    }
}

/// Payload built by the scheduler/callback endpoint for a dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyPayload {
    pub title: String,
    pub body: String,
    pub actions: Vec<NotifyAction>,
    #[serde(default)]
    pub context: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyAction {
    pub label: String,
    pub action: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOperation {
    Create,
    Update,
    Delete,
    Undo,
}

impl LedgerOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Undo => "undo",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "undo" => Some(Self::Undo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLedgerEntry {
    pub action_id: String,
    pub session_id: String,
    pub ts: i64,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: LedgerOperation,
    pub before_snapshot: Option<serde_json::Value>,
    pub after_snapshot: serde_json::Value,
    pub undo_token: String,
    pub undo_expiry: i64,
    pub undone_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub draft_id: String,
    pub session_id: String,
    pub ts: i64,
    pub entity_type: String,
    pub proposed_payload: serde_json::Value,
    pub expires_at: i64,
    pub committed_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub dedupe_key: String,
    pub first_seen_at: i64,
    pub ttl_expiry: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Preferences {
    pub default_channels: Vec<String>,
    pub default_priority: i32,
    pub default_topic: Option<String>,
    pub default_later_time: Option<String>,
    pub briefing_time: Option<String>,
    #[serde(default)]
    pub learning_flags: serde_json::Value,
}
