//! Shared types for the alarm notification dispatcher.
//!
//! These are the DTOs and small enums that flow between `alarm-queue`,
//! `alarm-db`, `alarm-channels`, `alarm-modempool` and `alarm-core`. Keeping
//! them in one crate means none of those crates need to depend on each other
//! just to share a struct.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

pub mod logging;

// ============================================================================
// Channels
// ============================================================================

/// One of the four delivery channels an alarm can fan out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Email,
    Voice,
    Push,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Sms, Channel::Email, Channel::Voice, Channel::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Email => "email",
            Channel::Voice => "voice",
            Channel::Push => "push",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = AlarmError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sms" => Ok(Channel::Sms),
            "email" => Ok(Channel::Email),
            "voice" => Ok(Channel::Voice),
            "push" => Ok(Channel::Push),
            other => Err(AlarmError::Validation(format!("unknown channel: {other}"))),
        }
    }
}

// ============================================================================
// Alarm (immutable event) and its inbound wire payload
// ============================================================================

/// Inbound bus payload. Compatible with the JSON shape described in the
/// external interfaces section: unknown fields are ignored, `gps_time` is
/// RFC3339 UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmMessage {
    pub alarm_id: i64,
    pub imei: String,
    pub status: String,
    #[serde(default)]
    pub category: Option<String>,
    pub gps_time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    #[serde(default)]
    pub is_sms: bool,
    #[serde(default)]
    pub is_email: bool,
    #[serde(default)]
    pub is_call: bool,
    #[serde(default = "default_true")]
    pub is_valid: bool,
    /// Retry attempt count carried in message headers/body by the consumer's
    /// own requeue path (not part of the producer's payload).
    #[serde(default)]
    pub attempt: u32,
}

fn default_true() -> bool {
    true
}

/// The persisted alarm row. Read-only for the core except for the per-channel
/// sent markers, which transition false->true at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alarm {
    pub id: i64,
    pub imei: String,
    pub status: String,
    pub category: Option<String>,
    pub gps_time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub is_sms: bool,
    pub is_email: bool,
    pub is_call: bool,
    pub is_valid: bool,
    pub sms_sent: bool,
    pub sms_sent_at: Option<DateTime<Utc>>,
    pub email_sent: bool,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub call_sent: bool,
    pub call_sent_at: Option<DateTime<Utc>>,
}

impl Alarm {
    pub fn is_channel_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Sms => self.is_sms,
            Channel::Email => self.is_email,
            Channel::Voice => self.is_call,
            Channel::Push => true,
        }
    }

    pub fn is_channel_sent(&self, channel: Channel) -> bool {
        match channel {
            Channel::Sms => self.sms_sent,
            Channel::Email => self.email_sent,
            Channel::Voice | Channel::Push => self.call_sent,
        }
    }
}

impl From<&AlarmMessage> for Alarm {
    /// Builds the in-memory view the processor works with. The DB remains the
    /// source of truth for sent markers; this conversion is used only when no
    /// row has been read yet (e.g. malformed-message fallback never reaches
    /// here since it short-circuits to the DLQ before conversion).
    fn from(m: &AlarmMessage) -> Self {
        Self {
            id: m.alarm_id,
            imei: m.imei.clone(),
            status: m.status.clone(),
            category: m.category.clone(),
            gps_time: m.gps_time,
            latitude: m.latitude,
            longitude: m.longitude,
            speed: m.speed,
            is_sms: m.is_sms,
            is_email: m.is_email,
            is_call: m.is_call,
            is_valid: m.is_valid,
            sms_sent: false,
            sms_sent_at: None,
            email_sent: false,
            email_sent_at: None,
            call_sent: false,
            call_sent_at: None,
        }
    }
}

// ============================================================================
// Contact
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub imei: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub priority: i32,
    pub active: bool,
    pub quiet_hours_start: Option<NaiveTime>,
    pub quiet_hours_end: Option<NaiveTime>,
}

impl Contact {
    /// True if `now` (UTC wall-clock) falls within this contact's quiet hours
    /// window. A window where start > end wraps past midnight.
    pub fn in_quiet_hours(&self, now: DateTime<Utc>) -> bool {
        let (start, end) = match (self.quiet_hours_start, self.quiet_hours_end) {
            (Some(s), Some(e)) => (s, e),
            _ => return false,
        };
        let t = now.time();
        if start <= end {
            t >= start && t < end
        } else {
            t >= start || t < end
        }
    }

    pub fn recipient_for(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Sms | Channel::Voice => self.phone.as_deref(),
            Channel::Email => self.email.as_deref(),
            // Push has no single per-contact recipient: it multicasts to every
            // registered device token for the owner, resolved separately via
            // `PushToken`/`PushTokenRepository`.
            Channel::Push => None,
        }
    }
}

// ============================================================================
// PushToken
// ============================================================================

/// A registered device token for a device owner, targeted by the push
/// channel's multicast send. Tokens the provider reports as invalid are
/// pruned rather than retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushToken {
    pub id: i64,
    pub imei: String,
    pub device_token: String,
    pub active: bool,
}

// ============================================================================
// NotificationAttempt (audit)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    Failed,
    Skipped,
    PermanentFailure,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Skipped => "skipped",
            AttemptStatus::PermanentFailure => "permanent_failure",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationAttempt {
    pub alarm_id: i64,
    pub imei: String,
    pub gps_time: DateTime<Utc>,
    pub channel: Channel,
    pub recipient: String,
    pub status: AttemptStatus,
    pub attempt_number: i32,
    pub sent_at: DateTime<Utc>,
    pub error: Option<String>,
    pub provider_message_id: Option<String>,
    pub provider_name: Option<String>,
    pub modem_id: Option<i64>,
    pub modem_name: Option<String>,
    pub response: Option<String>,
}

// ============================================================================
// DedupRecord
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupRecord {
    pub imei: String,
    pub alarm_type: String,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub occurrence_count: i32,
    pub notification_sent: bool,
}

// ============================================================================
// DLQItem
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqItem {
    pub id: i64,
    pub alarm_id: i64,
    pub imei: String,
    pub channel: Channel,
    pub payload: serde_json::Value,
    pub error_message: String,
    pub error_type: String,
    pub attempts: i32,
    pub last_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub reprocessed: bool,
    pub reprocessed_at: Option<DateTime<Utc>>,
    pub reprocessed_by: Option<String>,
}

/// Well-known `error_type` values the reprocessor and admin surface key off of.
pub mod error_types {
    pub const ALL_MODEMS_EXHAUSTED: &str = "all_modems_exhausted";
    pub const ADAPTER_FAILURE: &str = "adapter_failure";
    pub const CIRCUIT_OPEN: &str = "circuit_open";
    pub const MALFORMED_MESSAGE: &str = "malformed_message";
}

// ============================================================================
// Modem
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModemHealth {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Modem {
    pub id: i64,
    pub name: String,
    pub host: String,
    pub credentials: String,
    pub cert_fingerprint: Option<String>,
    pub modem_id: String,
    pub enabled: bool,
    pub priority: i32,
    pub max_concurrent_sms: i32,
    pub sms_sent_count: i32,
    pub sms_limit: i32,
    pub package_cost: f64,
    pub package_currency: String,
    pub package_start: DateTime<Utc>,
    pub package_end: DateTime<Utc>,
    pub allowed_services: Vec<String>,
    pub health_status: ModemHealth,
    pub last_health_check: Option<DateTime<Utc>>,
}

impl Modem {
    pub fn remaining_quota(&self) -> i32 {
        (self.sms_limit - self.sms_sent_count).max(0)
    }

    pub fn has_quota(&self) -> bool {
        self.sms_sent_count < self.sms_limit
    }

    pub fn allows_service(&self, service: &str) -> bool {
        self.allowed_services.iter().any(|s| s == service)
    }

    pub fn is_selectable(&self, service: &str) -> bool {
        self.enabled
            && self.health_status == ModemHealth::Healthy
            && self.allows_service(service)
            && self.has_quota()
    }
}

// ============================================================================
// Circuit breaker DTO (live state machine lives in alarm-channels)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub channel: Channel,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Worker registry
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub worker_id: String,
    pub host: String,
    pub pid: i32,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl WorkerRegistration {
    pub fn is_alive(&self, now: DateTime<Utc>, ttl_seconds: i64) -> bool {
        (now - self.last_heartbeat).num_seconds() <= ttl_seconds
    }
}

// ============================================================================
// System state
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemState {
    pub paused: bool,
    pub pause_reason: Option<String>,
    pub paused_by: Option<String>,
    pub mock_sms: bool,
    pub mock_email: bool,
}

// ============================================================================
// Skip / gating reasons (C5)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Deduplicated,
    QuietHours,
    BounceSuppressed,
    RateLimited,
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::Deduplicated => "deduplicated",
            SkipReason::QuietHours => "quiet_hours",
            SkipReason::BounceSuppressed => "bounce_suppressed",
            SkipReason::RateLimited => "rate_limited",
            SkipReason::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// Adapter error classification (C1 contract, §7 taxonomy)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network/timeout/5xx/KV unavailable - retry is appropriate.
    Retryable,
    /// Invalid recipient, malformed payload, non-rate-limited 4xx - no retry.
    Permanent,
    /// 429 or provider signal - back off, does not trip the breaker.
    RateLimited,
    /// Recipient rejected by the provider specifically (subset of Permanent
    /// that also prunes/suppresses the recipient going forward).
    InvalidRecipient,
}

impl ErrorKind {
    /// Whether this outcome should count toward tripping a channel's circuit
    /// breaker (§4.3: only "service-level" failures count).
    pub fn trips_breaker(&self) -> bool {
        matches!(self, ErrorKind::Retryable)
    }
}

/// Outcome of a single adapter `send()` call (§4.6 contract).
#[derive(Debug, Clone)]
pub struct AdapterOutcome {
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub provider_name: String,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub response: Option<String>,
    /// Which modem carried an SMS. `None` for every other channel.
    pub modem_id: Option<i64>,
    pub modem_name: Option<String>,
}

impl AdapterOutcome {
    pub fn success(provider_name: impl Into<String>, provider_message_id: Option<String>) -> Self {
        Self {
            success: true,
            provider_message_id,
            provider_name: provider_name.into(),
            error: None,
            error_kind: None,
            response: None,
            modem_id: None,
            modem_name: None,
        }
    }

    pub fn failure(provider_name: impl Into<String>, kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            provider_message_id: None,
            provider_name: provider_name.into(),
            error: Some(error.into()),
            error_kind: Some(kind),
            response: None,
            modem_id: None,
            modem_name: None,
        }
    }

    /// Attaches the modem identity a successful (or failed-after-selection)
    /// SMS send went through, for audit.
    pub fn with_modem(mut self, modem_id: i64, modem_name: impl Into<String>) -> Self {
        self.modem_id = Some(modem_id);
        self.modem_name = Some(modem_name.into());
        self
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AlarmError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("circuit open for channel {0}")]
    CircuitOpen(Channel),

    #[error("fatal startup error: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, AlarmError>;
