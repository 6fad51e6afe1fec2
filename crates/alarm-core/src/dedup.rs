//! Dedup/gating pipeline: for a given (alarm, contact, channel) triple,
//! decides whether a send should proceed, and if not, why.
//!
//! Checks run in a fixed order and the first miss wins: once a check fails
//! the rest are skipped, since later checks (notably the rate limiter) cost
//! a round trip and there's no reason to pay it if the send was never going
//! to happen anyway.

use alarm_channels::ratelimit::RateLimiterSet;
use alarm_common::{Alarm, Channel, Contact, SkipReason};
use alarm_db::{BounceRepository, DedupRepository};
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Skip(SkipReason),
}

pub struct Gate {
    dedup_repo: Arc<dyn DedupRepository>,
    bounce_repo: Arc<dyn BounceRepository>,
    rate_limiter: Arc<RateLimiterSet>,
    dedup_window_secs: i64,
    override_quiet_hours_for_critical: bool,
}

impl Gate {
    pub fn new(
        dedup_repo: Arc<dyn DedupRepository>,
        bounce_repo: Arc<dyn BounceRepository>,
        rate_limiter: Arc<RateLimiterSet>,
        dedup_window_secs: i64,
        override_quiet_hours_for_critical: bool,
    ) -> Self {
        Self {
            dedup_repo,
            bounce_repo,
            rate_limiter,
            dedup_window_secs,
            override_quiet_hours_for_critical,
        }
    }

    fn alarm_type_key(alarm: &Alarm) -> String {
        match &alarm.category {
            Some(category) => format!("{}:{}", alarm.status, category),
            None => alarm.status.clone(),
        }
    }

    /// Runs the dedup check on its own, since it must run exactly once per
    /// (alarm, channel) delivery attempt regardless of how many contacts are
    /// being notified on that channel — the window is per-device, not
    /// per-recipient.
    pub async fn check_dedup(&self, alarm: &Alarm, now: DateTime<Utc>) -> Result<GateDecision, alarm_db::DbError> {
        let alarm_type = Self::alarm_type_key(alarm);
        let record = self
            .dedup_repo
            .upsert_occurrence(&alarm.imei, &alarm_type, now, self.dedup_window_secs)
            .await?;

        if record.occurrence_count > 1 && record.notification_sent {
            return Ok(GateDecision::Skip(SkipReason::Deduplicated));
        }
        Ok(GateDecision::Allow)
    }

    pub async fn mark_dedup_sent(&self, alarm: &Alarm) {
        let alarm_type = Self::alarm_type_key(alarm);
        if let Err(e) = self.dedup_repo.mark_notification_sent(&alarm.imei, &alarm_type).await {
            tracing::error!(alarm_id = alarm.id, error = %e, "failed to mark dedup record as sent");
        }
    }

    /// Per-(contact, channel) checks: quiet hours, bounce suppression, rate
    /// limit. Assumes `check_dedup` has already passed for this alarm.
    pub async fn check_recipient(
        &self,
        alarm: &Alarm,
        contact: &Contact,
        channel: Channel,
        now: DateTime<Utc>,
    ) -> GateDecision {
        let is_critical = alarm.category.as_deref() == Some("critical");
        if contact.in_quiet_hours(now) && !(self.override_quiet_hours_for_critical && is_critical) {
            return GateDecision::Skip(SkipReason::QuietHours);
        }

        if channel == Channel::Email {
            if let Some(email) = &contact.email {
                match self.bounce_repo.is_suppressed(email).await {
                    Ok(true) => return GateDecision::Skip(SkipReason::BounceSuppressed),
                    Ok(false) => {}
                    Err(e) => tracing::warn!(error = %e, "bounce suppression check failed, allowing send"),
                }
            }
        }

        if !self.rate_limiter.check(channel, &alarm.imei).await {
            return GateDecision::Skip(SkipReason::RateLimited);
        }

        GateDecision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alarm_common::Contact;
    use chrono::NaiveTime;

    fn contact_with_quiet_hours(start: &str, end: &str) -> Contact {
        Contact {
            id: 1,
            imei: "123".to_string(),
            email: Some("a@example.com".to_string()),
            phone: Some("+15550000".to_string()),
            priority: 1,
            active: true,
            quiet_hours_start: Some(NaiveTime::parse_from_str(start, "%H:%M").unwrap()),
            quiet_hours_end: Some(NaiveTime::parse_from_str(end, "%H:%M").unwrap()),
        }
    }

    #[test]
    fn test_quiet_hours_non_wrapping() {
        let contact = contact_with_quiet_hours("22:00", "23:59");
        let inside = chrono::Utc::now().date_naive().and_hms_opt(22, 30, 0).unwrap();
        let inside = DateTime::<Utc>::from_naive_utc_and_offset(inside, Utc);
        assert!(contact.in_quiet_hours(inside));
    }

    #[test]
    fn test_quiet_hours_wrapping_midnight() {
        let contact = contact_with_quiet_hours("22:00", "06:00");
        let inside = chrono::Utc::now().date_naive().and_hms_opt(2, 0, 0).unwrap();
        let inside = DateTime::<Utc>::from_naive_utc_and_offset(inside, Utc);
        assert!(contact.in_quiet_hours(inside));

        let outside = chrono::Utc::now().date_naive().and_hms_opt(12, 0, 0).unwrap();
        let outside = DateTime::<Utc>::from_naive_utc_and_offset(outside, Utc);
        assert!(!contact.in_quiet_hours(outside));
    }
}
