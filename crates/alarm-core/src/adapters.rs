//! Wraps a live channel adapter so system-wide mock mode (toggled at
//! runtime through the admin surface) takes effect without reconstructing
//! the processor's adapter map.

use crate::state::StateManager;
use alarm_channels::mock::MockAdapter;
use alarm_channels::{ChannelAdapter, ChannelMessage};
use alarm_common::{AdapterOutcome, Channel};
use async_trait::async_trait;
use std::sync::Arc;

pub struct MockableAdapter {
    channel: Channel,
    live: Arc<dyn ChannelAdapter>,
    mock: MockAdapter,
    state: Arc<StateManager>,
}

impl MockableAdapter {
    pub fn new(channel: Channel, live: Arc<dyn ChannelAdapter>, state: Arc<StateManager>) -> Self {
        Self { channel, live, mock: MockAdapter::new(channel), state }
    }
}

#[async_trait]
impl ChannelAdapter for MockableAdapter {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, message: &ChannelMessage) -> AdapterOutcome {
        if self.state.is_mocked(self.channel) {
            self.mock.send(message).await
        } else {
            self.live.send(message).await
        }
    }
}
