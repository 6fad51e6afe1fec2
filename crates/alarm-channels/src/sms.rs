use crate::{ChannelAdapter, ChannelMessage};
use alarm_common::{AdapterOutcome, Channel, ErrorKind};
use alarm_modempool::ModemPool;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub adapter_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct ModemSendResponse {
    message_id: Option<String>,
}

pub struct SmsAdapter {
    pool: Arc<ModemPool>,
    client: reqwest::Client,
}

impl SmsAdapter {
    pub fn new(pool: Arc<ModemPool>, config: &SmsConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.adapter_timeout_secs))
            .build()
            .unwrap_or_default();
        Self { pool, client }
    }
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, message: &ChannelMessage) -> AdapterOutcome {
        let Some(selected) = self.pool.select(&message.alarm.imei, "sms").await else {
            return AdapterOutcome::failure("modem_pool", ErrorKind::Retryable, "all_modems_exhausted");
        };

        let url = format!("https://{}/sms/send", selected.modem.host);
        let body = serde_json::json!({
            "to": message.recipient,
            "text": message.rendered_body,
        });

        let result = self
            .client
            .post(&url)
            .bearer_auth(&selected.modem.credentials)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                self.pool.record_send_success(selected.modem.id).await;
                self.pool.report_health_success(selected.modem.id).await;
                let message_id = resp
                    .json::<ModemSendResponse>()
                    .await
                    .ok()
                    .and_then(|r| r.message_id);
                AdapterOutcome::success(format!("modem:{}", selected.modem.name), message_id)
                    .with_modem(selected.modem.id, selected.modem.name.clone())
            }
            Ok(resp) if resp.status().as_u16() == 400 || resp.status().as_u16() == 422 => {
                AdapterOutcome::failure(
                    format!("modem:{}", selected.modem.name),
                    ErrorKind::InvalidRecipient,
                    format!("modem rejected recipient: {}", resp.status()),
                )
                .with_modem(selected.modem.id, selected.modem.name.clone())
            }
            Ok(resp) => {
                self.pool.report_health_failure(selected.modem.id).await;
                AdapterOutcome::failure(
                    format!("modem:{}", selected.modem.name),
                    ErrorKind::Retryable,
                    format!("modem returned status {}", resp.status()),
                )
                .with_modem(selected.modem.id, selected.modem.name.clone())
            }
            Err(e) => {
                self.pool.report_health_failure(selected.modem.id).await;
                AdapterOutcome::failure(format!("modem:{}", selected.modem.name), ErrorKind::Retryable, e.to_string())
                    .with_modem(selected.modem.id, selected.modem.name.clone())
            }
        }
    }
}
