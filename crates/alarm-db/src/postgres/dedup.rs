use super::PostgresStore;
use crate::error::{DbError, Result};
use crate::DedupRepository;
use alarm_common::DedupRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

#[async_trait]
impl DedupRepository for PostgresStore {
    async fn upsert_occurrence(
        &self,
        imei: &str,
        alarm_type: &str,
        now: DateTime<Utc>,
        window_secs: i64,
    ) -> Result<DedupRecord> {
        // Eager pre-increment: within the window the row is bumped in place,
        // so concurrent instances converge on the same occurrence_count
        // instead of racing to decide who saw it "first". Outside the
        // window, the row restarts.
        let row = self
            .write(|| async {
                let pool = self.pool().await;
                sqlx::query(
                    r#"
                    INSERT INTO dedup_records (imei, alarm_type, first_occurrence, last_occurrence, occurrence_count, notification_sent)
                    VALUES ($1, $2, $3, $3, 1, false)
                    ON CONFLICT (imei, alarm_type) DO UPDATE SET
                        occurrence_count = CASE
                            WHEN dedup_records.last_occurrence >= $3 - make_interval(secs => $4)
                            THEN dedup_records.occurrence_count + 1
                            ELSE 1
                        END,
                        first_occurrence = CASE
                            WHEN dedup_records.last_occurrence >= $3 - make_interval(secs => $4)
                            THEN dedup_records.first_occurrence
                            ELSE $3
                        END,
                        notification_sent = CASE
                            WHEN dedup_records.last_occurrence >= $3 - make_interval(secs => $4)
                            THEN dedup_records.notification_sent
                            ELSE false
                        END,
                        last_occurrence = $3
                    RETURNING imei, alarm_type, first_occurrence, last_occurrence, occurrence_count, notification_sent
                    "#,
                )
                .bind(imei)
                .bind(alarm_type)
                .bind(now)
                .bind(window_secs as f64)
                .fetch_one(&pool)
                .await
            })
            .await?;

        Ok(DedupRecord {
            imei: row.get("imei"),
            alarm_type: row.get("alarm_type"),
            first_occurrence: row.get("first_occurrence"),
            last_occurrence: row.get("last_occurrence"),
            occurrence_count: row.get("occurrence_count"),
            notification_sent: row.get("notification_sent"),
        })
    }

    async fn mark_notification_sent(&self, imei: &str, alarm_type: &str) -> Result<()> {
        self.write(|| async {
            let pool = self.pool().await;
            sqlx::query("UPDATE dedup_records SET notification_sent = true WHERE imei = $1 AND alarm_type = $2")
                .bind(imei)
                .bind(alarm_type)
                .execute(&pool)
                .await
        })
        .await?;
        Ok(())
    }
}
