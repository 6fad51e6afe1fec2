use super::PostgresStore;
use crate::error::{DbError, Result};
use crate::BounceRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
impl BounceRepository for PostgresStore {
    async fn is_suppressed(&self, email: &str) -> Result<bool> {
        let pool = self.pool().await;
        let row = sqlx::query("SELECT 1 FROM email_bounces WHERE email = $1")
            .bind(email)
            .fetch_optional(&pool)
            .await
            .map_err(DbError::Sqlx)?;
        Ok(row.is_some())
    }

    async fn record_bounce(&self, email: &str, at: DateTime<Utc>, reason: &str) -> Result<()> {
        self.write(|| async {
            let pool = self.pool().await;
            sqlx::query(
                r#"
                INSERT INTO email_bounces (email, bounced_at, reason)
                VALUES ($1, $2, $3)
                ON CONFLICT (email) DO UPDATE SET bounced_at = $2, reason = $3
                "#,
            )
            .bind(email)
            .bind(at)
            .bind(reason)
            .execute(&pool)
            .await
        })
        .await?;
        Ok(())
    }
}
