use super::PostgresStore;
use crate::error::{DbError, Result};
use crate::WorkerRepository;
use alarm_common::WorkerRegistration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

#[async_trait]
impl WorkerRepository for PostgresStore {
    async fn upsert_heartbeat(&self, registration: &WorkerRegistration) -> Result<()> {
        self.write(|| async {
            let pool = self.pool().await;
            sqlx::query(
                r#"
                INSERT INTO worker_registry (worker_id, host, pid, started_at, last_heartbeat)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (worker_id) DO UPDATE SET last_heartbeat = $5
                "#,
            )
            .bind(&registration.worker_id)
            .bind(&registration.host)
            .bind(registration.pid)
            .bind(registration.started_at)
            .bind(registration.last_heartbeat)
            .execute(&pool)
            .await
        })
        .await?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<WorkerRegistration>> {
        let pool = self.pool().await;
        let rows = sqlx::query("SELECT worker_id, host, pid, started_at, last_heartbeat FROM worker_registry")
            .fetch_all(&pool)
            .await
            .map_err(DbError::Sqlx)?;

        Ok(rows
            .into_iter()
            .map(|r| WorkerRegistration {
                worker_id: r.get("worker_id"),
                host: r.get("host"),
                pid: r.get("pid"),
                started_at: r.get("started_at"),
                last_heartbeat: r.get("last_heartbeat"),
            })
            .collect())
    }

    async fn sweep_stale(&self, now: DateTime<Utc>, ttl_seconds: i64) -> Result<u64> {
        let rows_affected = self
            .write(|| async {
                let pool = self.pool().await;
                sqlx::query("DELETE FROM worker_registry WHERE last_heartbeat < $1 - make_interval(secs => $2)")
                    .bind(now)
                    .bind(ttl_seconds as f64)
                    .execute(&pool)
                    .await
                    .map(|r| r.rows_affected())
            })
            .await?;

        Ok(rows_affected)
    }
}
