//! Optional Postgres LISTEN/NOTIFY secondary trigger path.
//!
//! Disabled by default (`features.listen_notify_enabled`). When enabled, a
//! trigger on the alarms table can `NOTIFY alarm_events` as a low-latency
//! side channel alongside the bus. Since the same alarm can therefore reach
//! the processor twice, this path relies entirely on the same dedup gate as
//! the bus consumer to stay idempotent.

use crate::processor::Processor;
use alarm_common::AlarmMessage;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::sync::Arc;

const CHANNEL_NAME: &str = "alarm_events";

pub struct NotifyListener {
    pool: PgPool,
    processor: Arc<Processor>,
}

impl NotifyListener {
    pub fn new(pool: PgPool, processor: Arc<Processor>) -> Self {
        Self { pool, processor }
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.listen_loop().await {
                    Ok(()) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "LISTEN/NOTIFY connection failed, retrying in 5s");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                }
            }
        })
    }

    async fn listen_loop(&self) -> Result<(), sqlx::Error> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANNEL_NAME).await?;

        loop {
            let notification = listener.recv().await?;
            let payload = notification.payload();

            match serde_json::from_str::<AlarmMessage>(payload) {
                Ok(message) => {
                    if let Err(e) = self.processor.process(&message).await {
                        tracing::error!(alarm_id = message.alarm_id, error = %e, "LISTEN/NOTIFY-triggered processing failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed LISTEN/NOTIFY payload, ignoring");
                }
            }
        }
    }
}
