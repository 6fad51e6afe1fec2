//! Persistence layer for the alarm notification dispatcher.
//!
//! Repository traits mirror the teacher's outbox repository split: one
//! narrow trait per aggregate, a Postgres implementation behind `postgres/`,
//! and a pooled connection wrapper ([`pool::PersistencePool`]) that
//! tolerates a flapping database without taking the whole worker down.

pub mod error;
pub mod pool;
pub mod postgres;

pub use error::{DbError, Result};
pub use pool::{PersistencePool, PoolConfig};

use alarm_common::{
    Alarm, Channel, Contact, DedupRecord, DlqItem, Modem, NotificationAttempt, PushToken,
    SystemState, WorkerRegistration,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait AlarmRepository: Send + Sync {
    async fn get(&self, alarm_id: i64) -> Result<Option<Alarm>>;

    /// Flips the per-channel sent marker. Implementations must guard with
    /// `WHERE NOT <channel>_sent` so a racing duplicate delivery is a no-op.
    async fn mark_channel_sent(&self, alarm_id: i64, channel: Channel, at: DateTime<Utc>) -> Result<bool>;
}

#[async_trait]
pub trait ContactRepository: Send + Sync {
    /// Active contacts for a device, ordered by priority ascending (lower
    /// number contacted first).
    async fn list_for_imei(&self, imei: &str) -> Result<Vec<Contact>>;
}

#[async_trait]
pub trait DedupRepository: Send + Sync {
    /// Atomically increments the occurrence count for (imei, alarm_type),
    /// inserting a fresh record if none exists within the window. Returns
    /// the record as it stood *after* the increment, so the caller can
    /// check `occurrence_count` to decide whether this is the first
    /// occurrence in the window.
    async fn upsert_occurrence(
        &self,
        imei: &str,
        alarm_type: &str,
        now: DateTime<Utc>,
        window_secs: i64,
    ) -> Result<DedupRecord>;

    async fn mark_notification_sent(&self, imei: &str, alarm_type: &str) -> Result<()>;
}

#[async_trait]
pub trait DlqRepository: Send + Sync {
    async fn insert(&self, item: &DlqItem) -> Result<i64>;

    async fn get(&self, id: i64) -> Result<Option<DlqItem>>;

    async fn fetch_pending(&self, channel: Option<Channel>, limit: i64) -> Result<Vec<DlqItem>>;

    async fn fetch_by_filter(
        &self,
        channel: Option<Channel>,
        error_type: Option<&str>,
        older_than: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<DlqItem>>;

    async fn increment_attempts(&self, id: i64, error_message: &str, at: DateTime<Utc>) -> Result<i32>;

    async fn mark_reprocessed(&self, id: i64, by: &str, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait ModemRepository: Send + Sync {
    async fn list_enabled(&self) -> Result<Vec<Modem>>;

    async fn increment_usage(&self, modem_id: i64) -> Result<i32>;

    async fn reset_package(&self, modem_id: i64, new_start: DateTime<Utc>, new_end: DateTime<Utc>) -> Result<()>;

    async fn set_health(&self, modem_id: i64, healthy: bool, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait PushTokenRepository: Send + Sync {
    /// Active device tokens registered for this device owner, targeted by a
    /// single multicast push send.
    async fn list_active_for_imei(&self, imei: &str) -> Result<Vec<PushToken>>;

    /// Deactivates tokens the provider reported as invalid so future sends
    /// stop targeting them.
    async fn deactivate(&self, tokens: &[String]) -> Result<()>;
}

#[async_trait]
pub trait WorkerRepository: Send + Sync {
    async fn upsert_heartbeat(&self, registration: &WorkerRegistration) -> Result<()>;

    async fn list_all(&self) -> Result<Vec<WorkerRegistration>>;

    /// Deletes registrations whose last heartbeat is older than `ttl_seconds`
    /// ago. Returns the number of rows removed.
    async fn sweep_stale(&self, now: DateTime<Utc>, ttl_seconds: i64) -> Result<u64>;
}

#[async_trait]
pub trait SystemStateRepository: Send + Sync {
    async fn get(&self) -> Result<SystemState>;

    async fn set_paused(&self, paused: bool, reason: Option<&str>, by: Option<&str>) -> Result<()>;

    async fn set_mock(&self, mock_sms: Option<bool>, mock_email: Option<bool>) -> Result<()>;
}

#[async_trait]
pub trait BounceRepository: Send + Sync {
    /// True if this email address has bounced previously and delivery
    /// should be suppressed (§4 gating, email-only).
    async fn is_suppressed(&self, email: &str) -> Result<bool>;

    async fn record_bounce(&self, email: &str, at: DateTime<Utc>, reason: &str) -> Result<()>;
}

#[async_trait]
pub trait NotificationAttemptRepository: Send + Sync {
    /// Best-effort audit write. Implementations log and swallow failures
    /// rather than propagate them, since an audit-trail gap must never block
    /// the critical ack/sent-marker path.
    async fn record(&self, attempt: &NotificationAttempt);
}
