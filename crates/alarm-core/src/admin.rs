//! Narrow operator surface.
//!
//! The HTTP admin API, dashboard, and feature-flag store are external
//! collaborators that live outside this crate. `AdminOps` is the interface
//! they would call into — a trait rather than a hosted server, so embedding
//! it behind any transport (HTTP, gRPC, a CLI) is the caller's choice.

use crate::dlq::Reprocessor;
use crate::processor::ChannelOutcome;
use crate::state::StateManager;
use alarm_channels::breaker::CircuitBreakerSet;
use alarm_common::{Channel, CircuitBreakerSnapshot, DlqItem, WorkerRegistration};
use alarm_db::DlqRepository;
use alarm_modempool::ModemPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[async_trait]
pub trait AdminOps: Send + Sync {
    fn breaker_snapshot(&self, channel: Channel) -> CircuitBreakerSnapshot;
    fn breaker_snapshot_all(&self) -> Vec<CircuitBreakerSnapshot>;
    fn breaker_reset(&self, channel: Channel);

    fn system_state(&self) -> alarm_common::SystemState;
    async fn pause(&self, reason: Option<&str>, by: Option<&str>) -> Result<(), String>;
    async fn resume(&self) -> Result<(), String>;
    async fn set_mock(&self, mock_sms: Option<bool>, mock_email: Option<bool>) -> Result<(), String>;

    async fn dlq_list(&self, channel: Option<Channel>, limit: i64) -> Result<Vec<DlqItem>, String>;
    async fn dlq_reprocess_one(&self, dlq_id: i64) -> Result<ChannelOutcome, String>;
    async fn dlq_reprocess_batch(
        &self,
        channel: Option<Channel>,
        error_type: Option<&str>,
        older_than: Option<DateTime<Utc>>,
        limit: i64,
    ) -> usize;

    async fn modem_reset_package(&self, modem_id: i64, cycle_days: i64) -> Result<(), String>;
    async fn modem_set_dedicated(&self, imei: &str, modem_id: i64);
    async fn modem_clear_dedicated(&self, imei: &str);

    async fn list_workers(&self) -> Result<Vec<WorkerRegistration>, String>;
}

pub struct Admin {
    breakers: Arc<CircuitBreakerSet>,
    state: Arc<StateManager>,
    reprocessor: Arc<Reprocessor>,
    dlq_repo: Arc<dyn DlqRepository>,
    modem_pool: Arc<ModemPool>,
    workers_repo: Arc<dyn alarm_db::WorkerRepository>,
}

impl Admin {
    pub fn new(
        breakers: Arc<CircuitBreakerSet>,
        state: Arc<StateManager>,
        reprocessor: Arc<Reprocessor>,
        dlq_repo: Arc<dyn DlqRepository>,
        modem_pool: Arc<ModemPool>,
        workers_repo: Arc<dyn alarm_db::WorkerRepository>,
    ) -> Self {
        Self { breakers, state, reprocessor, dlq_repo, modem_pool, workers_repo }
    }
}

#[async_trait]
impl AdminOps for Admin {
    fn breaker_snapshot(&self, channel: Channel) -> CircuitBreakerSnapshot {
        self.breakers.snapshot(channel)
    }

    fn breaker_snapshot_all(&self) -> Vec<CircuitBreakerSnapshot> {
        self.breakers.snapshot_all()
    }

    fn breaker_reset(&self, channel: Channel) {
        self.breakers.force_reset(channel);
    }

    fn system_state(&self) -> alarm_common::SystemState {
        self.state.current()
    }

    async fn pause(&self, reason: Option<&str>, by: Option<&str>) -> Result<(), String> {
        self.state.pause(reason, by).await.map_err(|e| e.to_string())
    }

    async fn resume(&self) -> Result<(), String> {
        self.state.resume().await.map_err(|e| e.to_string())
    }

    async fn set_mock(&self, mock_sms: Option<bool>, mock_email: Option<bool>) -> Result<(), String> {
        self.state.set_mock(mock_sms, mock_email).await.map_err(|e| e.to_string())
    }

    async fn dlq_list(&self, channel: Option<Channel>, limit: i64) -> Result<Vec<DlqItem>, String> {
        self.dlq_repo.fetch_pending(channel, limit).await.map_err(|e| e.to_string())
    }

    async fn dlq_reprocess_one(&self, dlq_id: i64) -> Result<ChannelOutcome, String> {
        self.reprocessor.reprocess_one(dlq_id).await
    }

    async fn dlq_reprocess_batch(
        &self,
        channel: Option<Channel>,
        error_type: Option<&str>,
        older_than: Option<DateTime<Utc>>,
        limit: i64,
    ) -> usize {
        self.reprocessor.reprocess_batch(channel, error_type, older_than, limit).await
    }

    async fn modem_reset_package(&self, modem_id: i64, cycle_days: i64) -> Result<(), String> {
        let now = Utc::now();
        self.modem_pool
            .admin_reset_package(modem_id, now, now + chrono::Duration::days(cycle_days))
            .await
            .map_err(|e| e.to_string())
    }

    async fn modem_set_dedicated(&self, imei: &str, modem_id: i64) {
        self.modem_pool.set_dedicated(imei, modem_id);
    }

    async fn modem_clear_dedicated(&self, imei: &str) {
        self.modem_pool.clear_dedicated(imei);
    }

    async fn list_workers(&self) -> Result<Vec<WorkerRegistration>, String> {
        self.workers_repo.list_all().await.map_err(|e| e.to_string())
    }
}
