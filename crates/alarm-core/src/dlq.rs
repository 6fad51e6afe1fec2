//! Dead-letter queue writer and reprocessor.
//!
//! [`DbDlqWriter`] is the production [`crate::processor::DlqWriter`]: every
//! terminal per-channel failure lands a row here. [`Reprocessor`] runs on a
//! timer, grouping pending items by channel and respecting that channel's
//! circuit breaker so a reprocessing sweep doesn't hammer a provider that is
//! still down.

use crate::processor::{ChannelOutcome, DlqWriter, Processor};
use crate::state::StateManager;
use alarm_channels::breaker::CircuitBreakerSet;
use alarm_common::{Alarm, Channel, DlqItem};
use alarm_db::DlqRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub struct DbDlqWriter {
    repo: Arc<dyn DlqRepository>,
}

impl DbDlqWriter {
    pub fn new(repo: Arc<dyn DlqRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl DlqWriter for DbDlqWriter {
    async fn write_failure(&self, alarm: &Alarm, channel: Channel, error_message: &str, error_type: &str) {
        let now = Utc::now();
        let item = DlqItem {
            id: 0,
            alarm_id: alarm.id,
            imei: alarm.imei.clone(),
            channel,
            payload: serde_json::json!({
                "status": alarm.status,
                "category": alarm.category,
                "gps_time": alarm.gps_time,
            }),
            error_message: error_message.to_string(),
            error_type: error_type.to_string(),
            attempts: 1,
            last_attempt_at: now,
            created_at: now,
            reprocessed: false,
            reprocessed_at: None,
            reprocessed_by: None,
        };

        if let Err(e) = self.repo.insert(&item).await {
            tracing::error!(alarm_id = alarm.id, %channel, error = %e, "failed to write dead-letter item");
        }
    }
}

pub struct ReprocessorConfig {
    pub interval: Duration,
    pub batch_size: i64,
    pub max_attempts: i32,
}

pub struct Reprocessor {
    dlq_repo: Arc<dyn DlqRepository>,
    processor: Arc<Processor>,
    breakers: Arc<CircuitBreakerSet>,
    state: Arc<StateManager>,
    worker_id: String,
    config: ReprocessorConfig,
}

impl Reprocessor {
    pub fn new(
        dlq_repo: Arc<dyn DlqRepository>,
        processor: Arc<Processor>,
        breakers: Arc<CircuitBreakerSet>,
        state: Arc<StateManager>,
        worker_id: String,
        config: ReprocessorConfig,
    ) -> Self {
        Self { dlq_repo, processor, breakers, state, worker_id, config }
    }

    pub async fn run_once(&self) {
        if self.state.is_paused() {
            tracing::debug!("skipping reprocess sweep, system paused");
            return;
        }

        for channel in Channel::ALL {
            if !self.breakers.allow_request(channel) {
                tracing::debug!(%channel, "skipping reprocess sweep, breaker open");
                continue;
            }

            let items = match self.dlq_repo.fetch_pending(Some(channel), self.config.batch_size).await {
                Ok(items) => items,
                Err(e) => {
                    tracing::error!(%channel, error = %e, "failed to fetch pending dead-letter items");
                    continue;
                }
            };

            for item in items {
                self.reprocess_item(item).await;
            }
        }
    }

    async fn reprocess_item(&self, item: DlqItem) {
        if self.state.is_paused() {
            tracing::debug!(dlq_id = item.id, "skipping reprocess item, system paused");
            return;
        }

        if item.attempts >= self.config.max_attempts {
            tracing::warn!(dlq_id = item.id, attempts = item.attempts, "dead-letter item exceeded max attempts, giving up");
            if let Err(e) = self.dlq_repo.mark_reprocessed(item.id, "reprocessor:max_attempts", Utc::now()).await {
                tracing::error!(dlq_id = item.id, error = %e, "failed to mark exhausted dead-letter item");
            }
            return;
        }

        match self.processor.reprocess_channel(item.alarm_id, item.channel).await {
            Ok(ChannelOutcome::Sent) => {
                if let Err(e) = self.dlq_repo.mark_reprocessed(item.id, &self.worker_id, Utc::now()).await {
                    tracing::error!(dlq_id = item.id, error = %e, "failed to mark dead-letter item reprocessed");
                }
            }
            Ok(ChannelOutcome::Skipped(_)) => {
                if let Err(e) = self.dlq_repo.mark_reprocessed(item.id, "reprocessor:skipped", Utc::now()).await {
                    tracing::error!(dlq_id = item.id, error = %e, "failed to mark dead-letter item resolved");
                }
            }
            Ok(_) => {
                if let Err(e) = self.dlq_repo.increment_attempts(item.id, "reprocess attempt failed", Utc::now()).await {
                    tracing::error!(dlq_id = item.id, error = %e, "failed to record reprocess attempt");
                }
            }
            Err(e) => {
                tracing::error!(dlq_id = item.id, error = %e, "reprocess attempt errored");
            }
        }
    }

    /// Manually reprocesses a single item regardless of its scheduled sweep,
    /// for the admin surface's reprocess-one operation. Ignores breaker
    /// state, since an operator invoking this explicitly has already judged
    /// it worth trying.
    pub async fn reprocess_one(&self, dlq_id: i64) -> Result<ChannelOutcome, String> {
        let item = self
            .dlq_repo
            .get(dlq_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or("not found")?;
        self.processor
            .reprocess_channel(item.alarm_id, item.channel)
            .await
            .map_err(|e| e.to_string())
    }

    pub async fn reprocess_batch(
        &self,
        channel: Option<Channel>,
        error_type: Option<&str>,
        older_than: Option<DateTime<Utc>>,
        limit: i64,
    ) -> usize {
        let items = match self.dlq_repo.fetch_by_filter(channel, error_type, older_than, limit).await {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(error = %e, "batch reprocess fetch failed");
                return 0;
            }
        };
        let count = items.len();
        for item in items {
            self.reprocess_item(item).await;
        }
        count
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}
