use crate::{ChannelAdapter, ChannelMessage};
use alarm_common::{AdapterOutcome, Channel, ErrorKind};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub provider_url: String,
    pub adapter_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct VoiceCallResponse {
    call_id: Option<String>,
}

pub struct VoiceAdapter {
    client: reqwest::Client,
    provider_url: String,
}

impl VoiceAdapter {
    pub fn new(config: &VoiceConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.adapter_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            provider_url: config.provider_url.clone(),
        }
    }
}

#[async_trait]
impl ChannelAdapter for VoiceAdapter {
    fn channel(&self) -> Channel {
        Channel::Voice
    }

    async fn send(&self, message: &ChannelMessage) -> AdapterOutcome {
        let body = serde_json::json!({
            "to": message.recipient,
            "script": message.rendered_body,
        });

        match self.client.post(&self.provider_url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                let call_id = resp.json::<VoiceCallResponse>().await.ok().and_then(|r| r.call_id);
                AdapterOutcome::success("voice-provider", call_id)
            }
            Ok(resp) if resp.status() == 429 => {
                AdapterOutcome::failure("voice-provider", ErrorKind::RateLimited, "voice provider rate limited")
            }
            Ok(resp) if resp.status().is_client_error() => {
                AdapterOutcome::failure(
                    "voice-provider",
                    ErrorKind::InvalidRecipient,
                    format!("voice provider rejected request: {}", resp.status()),
                )
            }
            Ok(resp) => AdapterOutcome::failure(
                "voice-provider",
                ErrorKind::Retryable,
                format!("voice provider returned status {}", resp.status()),
            ),
            Err(e) => AdapterOutcome::failure("voice-provider", ErrorKind::Retryable, e.to_string()),
        }
    }
}
