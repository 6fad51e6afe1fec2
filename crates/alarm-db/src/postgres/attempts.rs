use super::PostgresStore;
use crate::NotificationAttemptRepository;
use alarm_common::NotificationAttempt;
use async_trait::async_trait;

#[async_trait]
impl NotificationAttemptRepository for PostgresStore {
    async fn record(&self, attempt: &NotificationAttempt) {
        let result = self
            .write(|| async {
                let pool = self.pool().await;
                sqlx::query(
                    r#"
                    INSERT INTO notification_attempts
                        (alarm_id, imei, gps_time, channel, recipient, status, attempt_number, sent_at,
                         error, provider_message_id, provider_name, modem_id, modem_name, response)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                    "#,
                )
                .bind(attempt.alarm_id)
                .bind(&attempt.imei)
                .bind(attempt.gps_time)
                .bind(attempt.channel.as_str())
                .bind(&attempt.recipient)
                .bind(attempt.status.as_str())
                .bind(attempt.attempt_number)
                .bind(attempt.sent_at)
                .bind(&attempt.error)
                .bind(&attempt.provider_message_id)
                .bind(&attempt.provider_name)
                .bind(attempt.modem_id)
                .bind(&attempt.modem_name)
                .bind(&attempt.response)
                .execute(&pool)
                .await
            })
            .await;

        if let Err(e) = result {
            tracing::error!(
                alarm_id = attempt.alarm_id,
                channel = %attempt.channel,
                error = %e,
                "failed to persist notification attempt audit record"
            );
        }
    }
}
