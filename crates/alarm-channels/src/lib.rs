//! Delivery channel adapters: SMS, email, voice, push, and a mock variant
//! used when a channel is in system-wide mock mode.
//!
//! Each adapter implements [`ChannelAdapter`]. The circuit breaker and rate
//! limiter wrap adapters rather than living inside them, so the same
//! breaker/limiter code guards every channel uniformly.

pub mod breaker;
pub mod email;
pub mod mock;
pub mod push;
pub mod ratelimit;
pub mod sms;
pub mod template;
pub mod voice;

use alarm_common::{AdapterOutcome, Alarm, Channel, Contact};
use async_trait::async_trait;

/// Everything an adapter needs to attempt one delivery.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub alarm: Alarm,
    pub contact: Contact,
    pub recipient: String,
    pub rendered_body: String,
    pub rendered_subject: Option<String>,
}

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, message: &ChannelMessage) -> AdapterOutcome;
}
