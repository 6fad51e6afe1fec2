//! Alarm processing: the dedup/gate pipeline followed by fan-out to every
//! eligible channel, with per-channel contact fallback.
//!
//! Channels are dispatched concurrently via `FuturesUnordered` (grounded on
//! the notification dispatcher pattern used elsewhere in the corpus);
//! within a channel, contacts are tried in priority order until one attempt
//! succeeds or the list is exhausted. Push is the exception: it multicasts
//! to every registered device token for the owner in a single send rather
//! than iterating contacts.

use crate::dedup::{Gate, GateDecision};
use alarm_channels::breaker::CircuitBreakerSet;
use alarm_channels::{ChannelAdapter, ChannelMessage};
use alarm_common::{
    AdapterOutcome, Alarm, AlarmMessage, AttemptStatus, Channel, Contact, ErrorKind, NotificationAttempt, SkipReason,
};
use alarm_db::{AlarmRepository, ContactRepository, NotificationAttemptRepository, PushTokenRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;

/// Breaks the processor -> reprocessor -> consumer cycle: the DLQ writer is
/// injected as a trait object rather than `alarm-core::dlq` depending back
/// on the processor.
#[async_trait]
pub trait DlqWriter: Send + Sync {
    async fn write_failure(&self, alarm: &Alarm, channel: Channel, error_message: &str, error_type: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOutcome {
    Sent,
    Skipped(SkipReason),
    Failed,
    NoEligibleContact,
    BreakerOpen,
}

pub struct ProcessResult {
    pub alarm_id: i64,
    pub per_channel: HashMap<Channel, ChannelOutcome>,
}

pub struct Processor {
    alarm_repo: Arc<dyn AlarmRepository>,
    contact_repo: Arc<dyn ContactRepository>,
    attempt_repo: Arc<dyn NotificationAttemptRepository>,
    push_token_repo: Arc<dyn PushTokenRepository>,
    gate: Arc<Gate>,
    breakers: Arc<CircuitBreakerSet>,
    adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
    dlq: Arc<dyn DlqWriter>,
}

impl Processor {
    pub fn new(
        alarm_repo: Arc<dyn AlarmRepository>,
        contact_repo: Arc<dyn ContactRepository>,
        attempt_repo: Arc<dyn NotificationAttemptRepository>,
        push_token_repo: Arc<dyn PushTokenRepository>,
        gate: Arc<Gate>,
        breakers: Arc<CircuitBreakerSet>,
        adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
        dlq: Arc<dyn DlqWriter>,
    ) -> Self {
        Self {
            alarm_repo,
            contact_repo,
            attempt_repo,
            push_token_repo,
            gate,
            breakers,
            adapters,
            dlq,
        }
    }

    pub async fn process(&self, incoming: &AlarmMessage) -> Result<ProcessResult, alarm_db::DbError> {
        let now = Utc::now();

        let alarm = match self.alarm_repo.get(incoming.alarm_id).await? {
            Some(a) => a,
            None => Alarm::from(incoming),
        };

        if !alarm.is_valid {
            return Ok(ProcessResult {
                alarm_id: alarm.id,
                per_channel: Channel::ALL
                    .iter()
                    .map(|c| (*c, ChannelOutcome::Skipped(SkipReason::Cancelled)))
                    .collect(),
            });
        }

        let eligible_channels: Vec<Channel> = Channel::ALL
            .into_iter()
            .filter(|c| alarm.is_channel_enabled(*c) && !alarm.is_channel_sent(*c))
            .collect();

        if let GateDecision::Skip(reason) = self.gate.check_dedup(&alarm, now).await? {
            let contacts = self.contact_repo.list_for_imei(&alarm.imei).await?;
            for channel in &eligible_channels {
                let recipient = contacts
                    .first()
                    .and_then(|c| c.recipient_for(*channel))
                    .unwrap_or("")
                    .to_string();
                self.record_skipped(&alarm, *channel, &recipient, reason).await;
            }
            return Ok(ProcessResult {
                alarm_id: alarm.id,
                per_channel: Channel::ALL.iter().map(|c| (*c, ChannelOutcome::Skipped(reason))).collect(),
            });
        }

        let contacts = self.contact_repo.list_for_imei(&alarm.imei).await?;

        let mut futs = FuturesUnordered::new();
        for channel in eligible_channels.iter().copied() {
            let alarm = alarm.clone();
            let contacts = contacts.clone();
            futs.push(async move { (channel, self.dispatch(&alarm, &contacts, channel, now).await) });
        }

        let mut per_channel = HashMap::new();
        while let Some((channel, outcome)) = futs.next().await {
            per_channel.insert(channel, outcome);
        }

        for channel in Channel::ALL {
            per_channel.entry(channel).or_insert(ChannelOutcome::Skipped(SkipReason::Cancelled));
        }
        // Channels that were already sent or not enabled before this run
        // never entered the fan-out; reflect that distinctly from "cancelled".
        for channel in Channel::ALL {
            if !eligible_channels.contains(&channel) && alarm.is_channel_sent(channel) {
                per_channel.insert(channel, ChannelOutcome::Sent);
            }
        }

        if per_channel.values().any(|o| *o == ChannelOutcome::Sent) {
            self.gate.mark_dedup_sent(&alarm).await;
        }

        Ok(ProcessResult { alarm_id: alarm.id, per_channel })
    }

    /// Re-attempts delivery on a single channel for an alarm that previously
    /// failed and landed in the dead-letter queue. Skips the dedup/window
    /// check entirely — that already passed the first time this alarm was
    /// processed — but still runs quiet-hours/bounce/rate-limit gating per
    /// recipient, since those can have changed since the original failure.
    pub async fn reprocess_channel(&self, alarm_id: i64, channel: Channel) -> Result<ChannelOutcome, alarm_db::DbError> {
        let Some(alarm) = self.alarm_repo.get(alarm_id).await? else {
            return Ok(ChannelOutcome::NoEligibleContact);
        };
        if !alarm.is_valid || alarm.is_channel_sent(channel) {
            return Ok(ChannelOutcome::Skipped(SkipReason::Cancelled));
        }
        let contacts = self.contact_repo.list_for_imei(&alarm.imei).await?;
        let outcome = self.dispatch(&alarm, &contacts, channel, Utc::now()).await;
        if outcome == ChannelOutcome::Sent {
            self.gate.mark_dedup_sent(&alarm).await;
        }
        Ok(outcome)
    }

    async fn dispatch(&self, alarm: &Alarm, contacts: &[Contact], channel: Channel, now: DateTime<Utc>) -> ChannelOutcome {
        if channel == Channel::Push {
            self.dispatch_push(alarm, contacts, now).await
        } else {
            self.dispatch_contacts(alarm, contacts, channel, now).await
        }
    }

    async fn dispatch_contacts(&self, alarm: &Alarm, contacts: &[Contact], channel: Channel, now: DateTime<Utc>) -> ChannelOutcome {
        if !self.breakers.allow_request(channel) {
            return ChannelOutcome::BreakerOpen;
        }

        let Some(adapter) = self.adapters.get(&channel) else {
            return ChannelOutcome::NoEligibleContact;
        };

        let mut attempt_number = 0;
        let mut last_error: Option<String> = None;

        for contact in contacts {
            let Some(recipient) = contact.recipient_for(channel).map(str::to_string) else {
                continue;
            };

            match self.gate.check_recipient(alarm, contact, channel, now).await {
                GateDecision::Skip(reason) => {
                    self.record_skipped(alarm, channel, &recipient, reason).await;
                    if attempt_number == 0 {
                        last_error = Some(reason.to_string());
                    }
                    continue;
                }
                GateDecision::Allow => {}
            }

            attempt_number += 1;
            let message = ChannelMessage {
                alarm: alarm.clone(),
                contact: contact.clone(),
                recipient: recipient.clone(),
                rendered_body: render_body(alarm, channel),
                rendered_subject: render_subject(alarm, channel),
            };

            let outcome = adapter.send(&message).await;
            self.breakers.record_outcome(channel, outcome.success, outcome.error_kind);
            self.record_attempt(alarm, channel, &recipient, attempt_number, &outcome).await;

            if outcome.success {
                if let Err(e) = self.alarm_repo.mark_channel_sent(alarm.id, channel, Utc::now()).await {
                    tracing::error!(alarm_id = alarm.id, %channel, error = %e, "failed to persist sent marker");
                }
                return ChannelOutcome::Sent;
            }

            last_error = outcome.error.clone();
        }

        if attempt_number == 0 {
            return ChannelOutcome::NoEligibleContact;
        }

        let error_message = last_error.as_deref().unwrap_or("all recipients failed");
        let error_type = if error_message.contains(alarm_common::error_types::ALL_MODEMS_EXHAUSTED) {
            alarm_common::error_types::ALL_MODEMS_EXHAUSTED
        } else {
            alarm_common::error_types::ADAPTER_FAILURE
        };
        self.dlq.write_failure(alarm, channel, error_message, error_type).await;
        ChannelOutcome::Failed
    }

    /// Push has no per-contact recipient: every active device token
    /// registered for the owner is multicast in a single send. Quiet
    /// hours/rate-limit gating still runs against the highest-priority
    /// contact on file, since that is the only per-owner gating context
    /// push has access to.
    async fn dispatch_push(&self, alarm: &Alarm, contacts: &[Contact], now: DateTime<Utc>) -> ChannelOutcome {
        if !self.breakers.allow_request(Channel::Push) {
            return ChannelOutcome::BreakerOpen;
        }

        let Some(adapter) = self.adapters.get(&Channel::Push) else {
            return ChannelOutcome::NoEligibleContact;
        };

        let tokens = match self.push_token_repo.list_active_for_imei(&alarm.imei).await {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(alarm_id = alarm.id, error = %e, "failed to load push tokens");
                return ChannelOutcome::NoEligibleContact;
            }
        };
        if tokens.is_empty() {
            return ChannelOutcome::NoEligibleContact;
        }

        let Some(gating_contact) = contacts.first() else {
            return ChannelOutcome::NoEligibleContact;
        };

        let recipient = tokens.iter().map(|t| t.device_token.as_str()).collect::<Vec<_>>().join(",");

        match self.gate.check_recipient(alarm, gating_contact, Channel::Push, now).await {
            GateDecision::Skip(reason) => {
                self.record_skipped(alarm, Channel::Push, &recipient, reason).await;
                return ChannelOutcome::Skipped(reason);
            }
            GateDecision::Allow => {}
        }

        let message = ChannelMessage {
            alarm: alarm.clone(),
            contact: gating_contact.clone(),
            recipient: recipient.clone(),
            rendered_body: render_body(alarm, Channel::Push),
            rendered_subject: render_subject(alarm, Channel::Push),
        };

        let outcome = adapter.send(&message).await;
        self.breakers.record_outcome(Channel::Push, outcome.success, outcome.error_kind);
        self.record_attempt(alarm, Channel::Push, &recipient, 1, &outcome).await;

        if let Some(invalid) = outcome.response.as_deref().and_then(|r| r.strip_prefix("invalid_tokens=")) {
            let invalid_tokens: Vec<String> = invalid.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect();
            if !invalid_tokens.is_empty() {
                if let Err(e) = self.push_token_repo.deactivate(&invalid_tokens).await {
                    tracing::error!(alarm_id = alarm.id, error = %e, "failed to prune invalid push tokens");
                }
            }
        }

        if outcome.success {
            if let Err(e) = self.alarm_repo.mark_channel_sent(alarm.id, Channel::Push, Utc::now()).await {
                tracing::error!(alarm_id = alarm.id, error = %e, "failed to persist sent marker");
            }
            return ChannelOutcome::Sent;
        }

        let error_message = outcome.error.as_deref().unwrap_or("push send failed");
        self.dlq.write_failure(alarm, Channel::Push, error_message, alarm_common::error_types::ADAPTER_FAILURE).await;
        ChannelOutcome::Failed
    }

    async fn record_attempt(&self, alarm: &Alarm, channel: Channel, recipient: &str, attempt_number: i32, outcome: &AdapterOutcome) {
        let status = if outcome.success {
            AttemptStatus::Success
        } else {
            match outcome.error_kind {
                Some(ErrorKind::Permanent) | Some(ErrorKind::InvalidRecipient) => AttemptStatus::PermanentFailure,
                _ => AttemptStatus::Failed,
            }
        };
        let attempt = NotificationAttempt {
            alarm_id: alarm.id,
            imei: alarm.imei.clone(),
            gps_time: alarm.gps_time,
            channel,
            recipient: recipient.to_string(),
            status,
            attempt_number,
            sent_at: Utc::now(),
            error: outcome.error.clone(),
            provider_message_id: outcome.provider_message_id.clone(),
            provider_name: Some(outcome.provider_name.clone()),
            modem_id: outcome.modem_id,
            modem_name: outcome.modem_name.clone(),
            response: outcome.response.clone(),
        };
        self.attempt_repo.record(&attempt).await;
    }

    /// Audits a gated (never attempted) delivery, per §4.2's "if gated →
    /// record `skipped` with reason".
    async fn record_skipped(&self, alarm: &Alarm, channel: Channel, recipient: &str, reason: SkipReason) {
        let attempt = NotificationAttempt {
            alarm_id: alarm.id,
            imei: alarm.imei.clone(),
            gps_time: alarm.gps_time,
            channel,
            recipient: recipient.to_string(),
            status: AttemptStatus::Skipped,
            attempt_number: 0,
            sent_at: Utc::now(),
            error: Some(reason.to_string()),
            provider_message_id: None,
            provider_name: None,
            modem_id: None,
            modem_name: None,
            response: None,
        };
        self.attempt_repo.record(&attempt).await;
    }
}

fn render_body(alarm: &Alarm, channel: Channel) -> String {
    use alarm_channels::template::{render, DEFAULT_EMAIL_BODY_TEMPLATE, DEFAULT_SMS_TEMPLATE, DEFAULT_VOICE_SCRIPT_TEMPLATE};
    let template = match channel {
        Channel::Sms | Channel::Push => DEFAULT_SMS_TEMPLATE,
        Channel::Email => DEFAULT_EMAIL_BODY_TEMPLATE,
        Channel::Voice => DEFAULT_VOICE_SCRIPT_TEMPLATE,
    };
    render(template, None, alarm).body
}

fn render_subject(alarm: &Alarm, channel: Channel) -> Option<String> {
    use alarm_channels::template::{render, DEFAULT_EMAIL_BODY_TEMPLATE, DEFAULT_EMAIL_SUBJECT_TEMPLATE};
    if channel != Channel::Email {
        return None;
    }
    render(DEFAULT_EMAIL_BODY_TEMPLATE, Some(DEFAULT_EMAIL_SUBJECT_TEMPLATE), alarm).subject
}
