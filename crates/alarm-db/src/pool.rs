//! Pooled Postgres connection with guarded recreation.
//!
//! A consecutive run of connection-level failures (not query failures) past
//! a threshold triggers a full pool recreation, gated by a cooldown so a
//! flapping database doesn't cause a recreate storm.

use crate::error::{DbError, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub dsn: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub query_timeout_secs: u64,
    pub recreate_cooldown_secs: u64,
    pub recreate_failure_threshold: u32,
}

pub struct PersistencePool {
    config: PoolConfig,
    inner: RwLock<PgPool>,
    consecutive_failures: AtomicU32,
    last_recreate_unix: AtomicU64,
}

impl PersistencePool {
    pub async fn connect(config: PoolConfig) -> Result<Arc<Self>> {
        let pool = Self::build_pool(&config).await?;
        Ok(Arc::new(Self {
            config,
            inner: RwLock::new(pool),
            consecutive_failures: AtomicU32::new(0),
            last_recreate_unix: AtomicU64::new(0),
        }))
    }

    async fn build_pool(config: &PoolConfig) -> Result<PgPool> {
        let options = PgConnectOptions::from_str(&config.dsn)
            .map_err(DbError::Sqlx)?
            .options([("TimeZone", "UTC")]);

        PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.query_timeout_secs))
            .connect_with(options)
            .await
            .map_err(DbError::Sqlx)
    }

    pub async fn pool(&self) -> PgPool {
        self.inner.read().await.clone()
    }

    /// Called by callers after an operation fails with a connection-level
    /// error (as opposed to a constraint violation or similar). Trips a pool
    /// recreation once the threshold is hit and the cooldown has elapsed.
    pub async fn record_connection_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures < self.config.recreate_failure_threshold {
            return;
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let last = self.last_recreate_unix.load(Ordering::SeqCst);
        if now.saturating_sub(last) < self.config.recreate_cooldown_secs {
            return;
        }

        tracing::warn!(failures, "recreating database pool after consecutive connection failures");
        match Self::build_pool(&self.config).await {
            Ok(new_pool) => {
                *self.inner.write().await = new_pool;
                self.last_recreate_unix.store(now, Ordering::SeqCst);
                self.consecutive_failures.store(0, Ordering::SeqCst);
            }
            Err(e) => {
                tracing::error!(error = %e, "pool recreation failed");
            }
        }
    }

    pub fn record_connection_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }
}

/// Retries a write operation up to 3 times with linear 1s/2s/5s backoff.
/// Used for the audit-style writes (notification attempts, DLQ inserts) that
/// must not block the critical ack path on a single transient failure, but
/// also must not silently retry forever.
pub async fn retry_write<F, Fut, T>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    const DELAYS_SECS: [u64; 3] = [1, 2, 5];
    let mut last_err = None;

    for delay in DELAYS_SECS {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                tracing::warn!(error = %e, "write failed, retrying");
                last_err = Some(e);
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }
        }
    }

    match op().await {
        Ok(v) => Ok(v),
        Err(e) => {
            last_err = Some(e);
            Err(DbError::RetriesExhausted(
                last_err.map(|e| e.to_string()).unwrap_or_default(),
            ))
        }
    }
}
