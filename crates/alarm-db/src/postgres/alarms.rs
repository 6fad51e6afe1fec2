use super::PostgresStore;
use crate::error::{DbError, Result};
use crate::AlarmRepository;
use alarm_common::{Alarm, Channel};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

#[async_trait]
impl AlarmRepository for PostgresStore {
    async fn get(&self, alarm_id: i64) -> Result<Option<Alarm>> {
        let pool = self.pool().await;
        let row = sqlx::query(
            r#"
            SELECT id, imei, status, category, gps_time, latitude, longitude, speed,
                   is_sms, is_email, is_call, is_valid,
                   sms_sent, sms_sent_at, email_sent, email_sent_at, call_sent, call_sent_at
            FROM alarms
            WHERE id = $1
            "#,
        )
        .bind(alarm_id)
        .fetch_optional(&pool)
        .await
        .map_err(DbError::Sqlx)?;

        Ok(row.map(|r| Alarm {
            id: r.get("id"),
            imei: r.get("imei"),
            status: r.get("status"),
            category: r.get("category"),
            gps_time: r.get("gps_time"),
            latitude: r.get("latitude"),
            longitude: r.get("longitude"),
            speed: r.get("speed"),
            is_sms: r.get("is_sms"),
            is_email: r.get("is_email"),
            is_call: r.get("is_call"),
            is_valid: r.get("is_valid"),
            sms_sent: r.get("sms_sent"),
            sms_sent_at: r.get("sms_sent_at"),
            email_sent: r.get("email_sent"),
            email_sent_at: r.get("email_sent_at"),
            call_sent: r.get("call_sent"),
            call_sent_at: r.get("call_sent_at"),
        }))
    }

    async fn mark_channel_sent(&self, alarm_id: i64, channel: Channel, at: DateTime<Utc>) -> Result<bool> {
        let (sent_col, at_col) = match channel {
            Channel::Sms => ("sms_sent", "sms_sent_at"),
            Channel::Email => ("email_sent", "email_sent_at"),
            Channel::Voice | Channel::Push => ("call_sent", "call_sent_at"),
        };
        let query = format!("UPDATE alarms SET {sent_col} = true, {at_col} = $2 WHERE id = $1 AND NOT {sent_col}");

        let rows_affected = self
            .write(|| {
                let query = query.clone();
                async move {
                    let pool = self.pool().await;
                    sqlx::query(&query).bind(alarm_id).bind(at).execute(&pool).await.map(|r| r.rows_affected())
                }
            })
            .await?;

        Ok(rows_affected > 0)
    }
}
