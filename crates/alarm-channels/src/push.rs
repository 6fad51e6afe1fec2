use crate::{ChannelAdapter, ChannelMessage};
use alarm_common::{AdapterOutcome, Channel, ErrorKind};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub provider_url: String,
    pub adapter_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct PushSendResponse {
    message_id: Option<String>,
    #[serde(default)]
    invalid_tokens: Vec<String>,
}

pub struct PushAdapter {
    client: reqwest::Client,
    provider_url: String,
}

impl PushAdapter {
    pub fn new(config: &PushConfig) -> Self {
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
impl ChannelAdapter for PushAdapter {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    /// `message.recipient` carries the device token(s), comma-separated for
    /// multicast. Tokens the provider reports as invalid are not pruned here
    /// — that is the caller's responsibility, surfaced via the `response`
    /// field of the outcome.
    async fn send(&self, message: &ChannelMessage) -> AdapterOutcome {
        let tokens: Vec<&str> = message.recipient.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
        if tokens.is_empty() {
            return AdapterOutcome::failure("push-provider", ErrorKind::InvalidRecipient, "no device tokens");
        }

        let body = serde_json::json!({
            "tokens": tokens,
            "body": message.rendered_body,
        });

        match self.client.post(&self.provider_url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                let parsed = resp.json::<PushSendResponse>().await.ok();
                let mut outcome = AdapterOutcome::success(
                    "push-provider",
                    parsed.as_ref().and_then(|r| r.message_id.clone()),
                );
                if let Some(p) = parsed {
                    if !p.invalid_tokens.is_empty() {
                        outcome.response = Some(format!("invalid_tokens={}", p.invalid_tokens.join(",")));
                    }
                }
                outcome
            }
            Ok(resp) if resp.status().is_client_error() => AdapterOutcome::failure(
                "push-provider",
                ErrorKind::InvalidRecipient,
                format!("push provider rejected request: {}", resp.status()),
            ),
            Ok(resp) => AdapterOutcome::failure(
                "push-provider",
                ErrorKind::Retryable,
                format!("push provider returned status {}", resp.status()),
            ),
            Err(e) => AdapterOutcome::failure("push-provider", ErrorKind::Retryable, e.to_string()),
        }
    }
}
