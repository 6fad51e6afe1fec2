use super::PostgresStore;
use crate::error::{DbError, Result};
use crate::ContactRepository;
use alarm_common::Contact;
use async_trait::async_trait;
use sqlx::Row;

#[async_trait]
impl ContactRepository for PostgresStore {
    async fn list_for_imei(&self, imei: &str) -> Result<Vec<Contact>> {
        let pool = self.pool().await;
        let rows = sqlx::query(
            r#"
            SELECT id, imei, email, phone, priority, active, quiet_hours_start, quiet_hours_end
            FROM contacts
            WHERE imei = $1 AND active = true
            ORDER BY priority ASC
            "#,
        )
        .bind(imei)
        .fetch_all(&pool)
        .await
        .map_err(DbError::Sqlx)?;

        Ok(rows
            .into_iter()
            .map(|r| Contact {
                id: r.get("id"),
                imei: r.get("imei"),
                email: r.get("email"),
                phone: r.get("phone"),
                priority: r.get("priority"),
                active: r.get("active"),
                quiet_hours_start: r.get("quiet_hours_start"),
                quiet_hours_end: r.get("quiet_hours_end"),
            })
            .collect())
    }
}
