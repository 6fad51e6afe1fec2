use super::PostgresStore;
use crate::error::{DbError, Result};
use crate::DlqRepository;
use alarm_common::{Channel, DlqItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::str::FromStr;

fn row_to_item(r: sqlx::postgres::PgRow) -> DlqItem {
    let channel_str: String = r.get("channel");
    DlqItem {
        id: r.get("id"),
        alarm_id: r.get("alarm_id"),
        imei: r.get("imei"),
        channel: Channel::from_str(&channel_str).unwrap_or(Channel::Sms),
        payload: r.get("payload"),
        error_message: r.get("error_message"),
        error_type: r.get("error_type"),
        attempts: r.get("attempts"),
        last_attempt_at: r.get("last_attempt_at"),
        created_at: r.get("created_at"),
        reprocessed: r.get("reprocessed"),
        reprocessed_at: r.get("reprocessed_at"),
        reprocessed_by: r.get("reprocessed_by"),
    }
}

#[async_trait]
impl DlqRepository for PostgresStore {
    async fn insert(&self, item: &DlqItem) -> Result<i64> {
        let row = self
            .write(|| async {
                let pool = self.pool().await;
                sqlx::query(
                    r#"
                    INSERT INTO dlq_items (alarm_id, imei, channel, payload, error_message, error_type, attempts, last_attempt_at, created_at, reprocessed)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, false)
                    RETURNING id
                    "#,
                )
                .bind(item.alarm_id)
                .bind(&item.imei)
                .bind(item.channel.as_str())
                .bind(&item.payload)
                .bind(&item.error_message)
                .bind(&item.error_type)
                .bind(item.attempts)
                .bind(item.last_attempt_at)
                .bind(item.created_at)
                .fetch_one(&pool)
                .await
            })
            .await?;

        Ok(row.get("id"))
    }

    async fn get(&self, id: i64) -> Result<Option<DlqItem>> {
        let pool = self.pool().await;
        let row = sqlx::query("SELECT * FROM dlq_items WHERE id = $1")
            .bind(id)
            .fetch_optional(&pool)
            .await
            .map_err(DbError::Sqlx)?;
        Ok(row.map(row_to_item))
    }

    async fn fetch_pending(&self, channel: Option<Channel>, limit: i64) -> Result<Vec<DlqItem>> {
        let pool = self.pool().await;
        let rows = match channel {
            Some(c) => sqlx::query(
                "SELECT * FROM dlq_items WHERE reprocessed = false AND channel = $1 ORDER BY created_at ASC LIMIT $2",
            )
            .bind(c.as_str())
            .bind(limit)
            .fetch_all(&pool)
            .await,
            None => sqlx::query("SELECT * FROM dlq_items WHERE reprocessed = false ORDER BY created_at ASC LIMIT $1")
                .bind(limit)
                .fetch_all(&pool)
                .await,
        }
        .map_err(DbError::Sqlx)?;

        Ok(rows.into_iter().map(row_to_item).collect())
    }

    async fn fetch_by_filter(
        &self,
        channel: Option<Channel>,
        error_type: Option<&str>,
        older_than: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<DlqItem>> {
        let mut query = String::from("SELECT * FROM dlq_items WHERE reprocessed = false");
        let mut binds: Vec<String> = Vec::new();
        let mut idx = 1;

        if let Some(c) = channel {
            query.push_str(&format!(" AND channel = ${idx}"));
            binds.push(c.as_str().to_string());
            idx += 1;
        }
        if let Some(et) = error_type {
            query.push_str(&format!(" AND error_type = ${idx}"));
            binds.push(et.to_string());
            idx += 1;
        }
        let older_than_idx = older_than.map(|_| {
            query.push_str(&format!(" AND created_at < ${idx}"));
            let this = idx;
            idx += 1;
            this
        });
        query.push_str(&format!(" ORDER BY created_at ASC LIMIT ${idx}"));

        let mut q = sqlx::query(&query);
        for b in &binds {
            q = q.bind(b);
        }
        if older_than_idx.is_some() {
            q = q.bind(older_than.unwrap());
        }
        q = q.bind(limit);

        let pool = self.pool().await;
        let rows = q.fetch_all(&pool).await.map_err(DbError::Sqlx)?;
        Ok(rows.into_iter().map(row_to_item).collect())
    }

    async fn increment_attempts(&self, id: i64, error_message: &str, at: DateTime<Utc>) -> Result<i32> {
        let row = self
            .write(|| async {
                let pool = self.pool().await;
                sqlx::query(
                    "UPDATE dlq_items SET attempts = attempts + 1, error_message = $2, last_attempt_at = $3 WHERE id = $1 RETURNING attempts",
                )
                .bind(id)
                .bind(error_message)
                .bind(at)
                .fetch_one(&pool)
                .await
            })
            .await?;

        Ok(row.get("attempts"))
    }

    async fn mark_reprocessed(&self, id: i64, by: &str, at: DateTime<Utc>) -> Result<()> {
        self.write(|| async {
            let pool = self.pool().await;
            sqlx::query("UPDATE dlq_items SET reprocessed = true, reprocessed_by = $2, reprocessed_at = $3 WHERE id = $1")
                .bind(id)
                .bind(by)
                .bind(at)
                .execute(&pool)
                .await
        })
        .await?;
        Ok(())
    }
}
