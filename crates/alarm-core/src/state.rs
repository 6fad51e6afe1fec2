//! System-wide pause flag and per-channel mock toggles.
//!
//! State lives in the database so every worker instance sees the same
//! value. A background poll plus a `watch` channel means callers on the hot
//! path read an in-memory cache instead of hitting the database on every
//! alarm.

use alarm_common::SystemState;
use alarm_db::SystemStateRepository;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub struct StateManager {
    repo: Arc<dyn SystemStateRepository>,
    tx: watch::Sender<SystemState>,
    rx: watch::Receiver<SystemState>,
    poll_interval: Duration,
}

impl StateManager {
    pub async fn new(repo: Arc<dyn SystemStateRepository>, poll_interval: Duration) -> alarm_db::Result<Arc<Self>> {
        let initial = repo.get().await?;
        let (tx, rx) = watch::channel(initial);
        Ok(Arc::new(Self { repo, tx, rx, poll_interval }))
    }

    pub fn current(&self) -> SystemState {
        self.rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SystemState> {
        self.rx.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.rx.borrow().paused
    }

    pub fn is_mocked(&self, channel: alarm_common::Channel) -> bool {
        let state = self.rx.borrow();
        match channel {
            alarm_common::Channel::Sms => state.mock_sms,
            alarm_common::Channel::Email => state.mock_email,
            alarm_common::Channel::Voice | alarm_common::Channel::Push => false,
        }
    }

    pub async fn pause(&self, reason: Option<&str>, by: Option<&str>) -> alarm_db::Result<()> {
        self.repo.set_paused(true, reason, by).await?;
        self.refresh_now().await
    }

    pub async fn resume(&self) -> alarm_db::Result<()> {
        self.repo.set_paused(false, None, None).await?;
        self.refresh_now().await
    }

    pub async fn set_mock(&self, mock_sms: Option<bool>, mock_email: Option<bool>) -> alarm_db::Result<()> {
        self.repo.set_mock(mock_sms, mock_email).await?;
        self.refresh_now().await
    }

    async fn refresh_now(&self) -> alarm_db::Result<()> {
        let state = self.repo.get().await?;
        let _ = self.tx.send(state);
        Ok(())
    }

    /// Spawns the periodic reload loop. Picks up changes made by another
    /// worker instance's admin call.
    pub fn spawn_poll_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            loop {
                ticker.tick().await;
                match self.repo.get().await {
                    Ok(state) => {
                        let _ = self.tx.send(state);
                    }
                    Err(e) => tracing::error!(error = %e, "failed to poll system state"),
                }
            }
        })
    }
}
