use super::PostgresStore;
use crate::error::{DbError, Result};
use crate::ModemRepository;
use alarm_common::{Modem, ModemHealth};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

#[async_trait]
impl ModemRepository for PostgresStore {
    async fn list_enabled(&self) -> Result<Vec<Modem>> {
        let pool = self.pool().await;
        let rows = sqlx::query(
            r#"
            SELECT id, name, host, credentials, cert_fingerprint, modem_id, enabled, priority,
                   max_concurrent_sms, sms_sent_count, sms_limit, package_cost, package_currency,
                   package_start, package_end, allowed_services, health_status, last_health_check
            FROM modems
            WHERE enabled = true
            "#,
        )
        .fetch_all(&pool)
        .await
        .map_err(DbError::Sqlx)?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let health: String = r.get("health_status");
                Modem {
                    id: r.get("id"),
                    name: r.get("name"),
                    host: r.get("host"),
                    credentials: r.get("credentials"),
                    cert_fingerprint: r.get("cert_fingerprint"),
                    modem_id: r.get("modem_id"),
                    enabled: r.get("enabled"),
                    priority: r.get("priority"),
                    max_concurrent_sms: r.get("max_concurrent_sms"),
                    sms_sent_count: r.get("sms_sent_count"),
                    sms_limit: r.get("sms_limit"),
                    package_cost: r.get("package_cost"),
                    package_currency: r.get("package_currency"),
                    package_start: r.get("package_start"),
                    package_end: r.get("package_end"),
                    allowed_services: r.get("allowed_services"),
                    health_status: if health == "healthy" { ModemHealth::Healthy } else { ModemHealth::Unhealthy },
                    last_health_check: r.get("last_health_check"),
                }
            })
            .collect())
    }

    async fn increment_usage(&self, modem_id: i64) -> Result<i32> {
        let sms_sent_count: i32 = self
            .write(|| async {
                let pool = self.pool().await;
                let mut tx = pool.begin().await?;

                let row = sqlx::query("UPDATE modems SET sms_sent_count = sms_sent_count + 1 WHERE id = $1 RETURNING sms_sent_count")
                    .bind(modem_id)
                    .fetch_one(&mut *tx)
                    .await?;

                sqlx::query(
                    r#"
                    INSERT INTO alarms_sms_modem_usage (modem_id, date, count)
                    VALUES ($1, CURRENT_DATE, 1)
                    ON CONFLICT (modem_id, date) DO UPDATE SET count = alarms_sms_modem_usage.count + 1
                    "#,
                )
                .bind(modem_id)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;

                Ok(row.get("sms_sent_count"))
            })
            .await?;

        Ok(sms_sent_count)
    }

    async fn reset_package(&self, modem_id: i64, new_start: DateTime<Utc>, new_end: DateTime<Utc>) -> Result<()> {
        self.write(|| async {
            let pool = self.pool().await;
            sqlx::query("UPDATE modems SET sms_sent_count = 0, package_start = $2, package_end = $3 WHERE id = $1")
                .bind(modem_id)
                .bind(new_start)
                .bind(new_end)
                .execute(&pool)
                .await
        })
        .await?;
        Ok(())
    }

    async fn set_health(&self, modem_id: i64, healthy: bool, at: DateTime<Utc>) -> Result<()> {
        let status = if healthy { "healthy" } else { "unhealthy" };
        self.write(|| async {
            let pool = self.pool().await;
            sqlx::query("UPDATE modems SET health_status = $2, last_health_check = $3 WHERE id = $1")
                .bind(modem_id)
                .bind(status)
                .bind(at)
                .execute(&pool)
                .await
        })
        .await?;
        Ok(())
    }
}
