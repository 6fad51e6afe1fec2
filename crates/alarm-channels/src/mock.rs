use crate::{ChannelAdapter, ChannelMessage};
use alarm_common::{AdapterOutcome, Channel};
use async_trait::async_trait;

/// Stands in for a real adapter when a channel is toggled into system-wide
/// mock mode. Always succeeds and never touches a circuit breaker's failure
/// count since `record_outcome` treats success the same regardless of
/// adapter.
pub struct MockAdapter {
    channel: Channel,
}

impl MockAdapter {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ChannelAdapter for MockAdapter {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, message: &ChannelMessage) -> AdapterOutcome {
        tracing::info!(
            alarm_id = message.alarm.id,
            channel = %self.channel,
            recipient = %message.recipient,
            "mock delivery (system in mock mode)"
        );
        AdapterOutcome::success("mock", None)
    }
}
