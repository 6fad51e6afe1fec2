use super::PostgresStore;
use crate::error::{DbError, Result};
use crate::SystemStateRepository;
use alarm_common::SystemState;
use async_trait::async_trait;
use sqlx::Row;

#[async_trait]
impl SystemStateRepository for PostgresStore {
    async fn get(&self) -> Result<SystemState> {
        let pool = self.pool().await;
        let row = sqlx::query("SELECT paused, pause_reason, paused_by, mock_sms, mock_email FROM system_state WHERE id = 1")
            .fetch_optional(&pool)
            .await
            .map_err(DbError::Sqlx)?;

        Ok(match row {
            Some(r) => SystemState {
                paused: r.get("paused"),
                pause_reason: r.get("pause_reason"),
                paused_by: r.get("paused_by"),
                mock_sms: r.get("mock_sms"),
                mock_email: r.get("mock_email"),
            },
            None => SystemState::default(),
        })
    }

    async fn set_paused(&self, paused: bool, reason: Option<&str>, by: Option<&str>) -> Result<()> {
        self.write(|| async {
            let pool = self.pool().await;
            sqlx::query(
                r#"
                INSERT INTO system_state (id, paused, pause_reason, paused_by)
                VALUES (1, $1, $2, $3)
                ON CONFLICT (id) DO UPDATE SET paused = $1, pause_reason = $2, paused_by = $3
                "#,
            )
            .bind(paused)
            .bind(reason)
            .bind(by)
            .execute(&pool)
            .await
        })
        .await?;
        Ok(())
    }

    async fn set_mock(&self, mock_sms: Option<bool>, mock_email: Option<bool>) -> Result<()> {
        if let Some(v) = mock_sms {
            self.write(|| async {
                let pool = self.pool().await;
                sqlx::query("INSERT INTO system_state (id, mock_sms) VALUES (1, $1) ON CONFLICT (id) DO UPDATE SET mock_sms = $1")
                    .bind(v)
                    .execute(&pool)
                    .await
            })
            .await?;
        }
        if let Some(v) = mock_email {
            self.write(|| async {
                let pool = self.pool().await;
                sqlx::query("INSERT INTO system_state (id, mock_email) VALUES (1, $1) ON CONFLICT (id) DO UPDATE SET mock_email = $1")
                    .bind(v)
                    .execute(&pool)
                    .await
            })
            .await?;
        }
        Ok(())
    }
}
