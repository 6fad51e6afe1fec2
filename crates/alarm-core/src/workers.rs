//! Cross-instance worker registry: heartbeat-based liveness so the admin
//! surface can report which worker instances are actually up, and so a
//! stale entry left behind by a crashed process eventually disappears.

use alarm_common::WorkerRegistration;
use alarm_db::WorkerRepository;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct WorkerRegistry {
    repo: Arc<dyn WorkerRepository>,
    worker_id: String,
    heartbeat_interval: Duration,
    ttl_multiplier: i64,
}

impl WorkerRegistry {
    pub fn new(repo: Arc<dyn WorkerRepository>, heartbeat_interval: Duration, ttl_multiplier: i64) -> Self {
        let worker_id = format!("{}-{}", hostname(), Uuid::new_v4());
        Self {
            repo,
            worker_id,
            heartbeat_interval,
            ttl_multiplier,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    async fn heartbeat_once(&self) -> alarm_db::Result<()> {
        let now = Utc::now();
        self.repo
            .upsert_heartbeat(&WorkerRegistration {
                worker_id: self.worker_id.clone(),
                host: hostname(),
                pid: std::process::id() as i32,
                started_at: now,
                last_heartbeat: now,
            })
            .await
    }

    /// Spawns the heartbeat loop and, on the same tick, sweeps registrations
    /// older than `ttl_multiplier * heartbeat_interval`. Every instance
    /// sweeps; the delete is idempotent so duplicate sweeps are harmless.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.heartbeat_once().await {
                tracing::error!(error = %e, "initial worker heartbeat failed");
            }

            let mut ticker = tokio::time::interval(self.heartbeat_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.heartbeat_once().await {
                    tracing::error!(error = %e, "worker heartbeat failed");
                }

                let ttl_seconds = self.heartbeat_interval.as_secs() as i64 * self.ttl_multiplier;
                match self.repo.sweep_stale(Utc::now(), ttl_seconds).await {
                    Ok(removed) if removed > 0 => tracing::info!(removed, "swept stale worker registrations"),
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "worker sweep failed"),
                }
            }
        })
    }

    pub async fn list_workers(&self) -> alarm_db::Result<Vec<WorkerRegistration>> {
        self.repo.list_all().await
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}
