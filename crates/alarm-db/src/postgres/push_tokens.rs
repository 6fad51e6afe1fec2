use super::PostgresStore;
use crate::error::{DbError, Result};
use crate::PushTokenRepository;
use alarm_common::PushToken;
use async_trait::async_trait;
use sqlx::Row;

#[async_trait]
impl PushTokenRepository for PostgresStore {
    async fn list_active_for_imei(&self, imei: &str) -> Result<Vec<PushToken>> {
        let pool = self.pool().await;
        let rows = sqlx::query("SELECT id, imei, device_token, active FROM push_tokens WHERE imei = $1 AND active = true")
            .bind(imei)
            .fetch_all(&pool)
            .await
            .map_err(DbError::Sqlx)?;

        Ok(rows
            .into_iter()
            .map(|r| PushToken {
                id: r.get("id"),
                imei: r.get("imei"),
                device_token: r.get("device_token"),
                active: r.get("active"),
            })
            .collect())
    }

    async fn deactivate(&self, tokens: &[String]) -> Result<()> {
        if tokens.is_empty() {
            return Ok(());
        }
        self.write(|| async {
            let pool = self.pool().await;
            sqlx::query("UPDATE push_tokens SET active = false WHERE device_token = ANY($1)")
                .bind(tokens)
                .execute(&pool)
                .await
        })
        .await?;
        Ok(())
    }
}
