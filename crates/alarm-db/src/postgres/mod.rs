//! Postgres implementations of the repository traits.
//!
//! One struct, `PostgresStore`, implements every repository trait. Each
//! `impl` block is grouped by aggregate for readability; there is no
//! behavioral reason they couldn't be split into separate structs later.

mod alarms;
mod attempts;
mod bounces;
mod contacts;
mod dedup;
mod dlq;
mod modems;
mod push_tokens;
mod system_state;
mod workers;

use crate::error::{DbError, Result};
use crate::pool::{retry_write, PersistencePool};
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct PostgresStore {
    persistence: Arc<PersistencePool>,
}

impl PostgresStore {
    pub fn new(persistence: Arc<PersistencePool>) -> Self {
        Self { persistence }
    }

    pub(crate) async fn pool(&self) -> PgPool {
        self.persistence.pool().await
    }

    /// Runs a write through the bounded retry policy, reporting the
    /// outcome back to the pool so a run of connection-level failures can
    /// trigger auto-heal (pool recreation).
    pub(crate) async fn write<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        match retry_write(op).await {
            Ok(v) => {
                self.persistence.record_connection_success();
                Ok(v)
            }
            Err(e) => {
                self.persistence.record_connection_failure().await;
                Err(e)
            }
        }
    }
}
