//! Message bus abstractions for the alarm dispatcher.
//!
//! [`AlarmConsumer`] and [`AlarmPublisher`] are the seams between the
//! notification pipeline and whatever bus technology carries alarm events.
//! The only production implementation is [`amqp::AmqpConsumer`] /
//! [`amqp::AmqpPublisher`], but keeping the pipeline against traits means
//! tests can swap in an in-memory double.

pub mod amqp;
pub mod error;

pub use error::{QueueError, Result};

use alarm_common::AlarmMessage;
use async_trait::async_trait;

/// A message pulled off the bus, not yet acknowledged.
#[derive(Debug, Clone)]
pub struct ReceivedAlarm {
    /// Opaque handle used to ack/nack this specific delivery.
    pub handle: String,
    pub message: AlarmMessage,
    /// Raw bytes as received, kept around so malformed payloads can still be
    /// routed to the DLQ even when they fail to deserialize into `message`.
    pub raw: Vec<u8>,
    /// How many times this delivery (by dedup key, not by AMQP redelivery
    /// flag) has been seen before, carried in message headers.
    pub delivery_attempt: u32,
}

#[async_trait]
pub trait AlarmConsumer: Send + Sync {
    fn identifier(&self) -> &str;

    /// Pulls the next available message, if any, within an internal poll
    /// timeout. Returns `Ok(None)` on timeout, not an error.
    async fn poll(&self) -> Result<Option<ReceivedAlarm>>;

    async fn ack(&self, handle: &str) -> Result<()>;

    async fn nack(&self, handle: &str, requeue: bool) -> Result<()>;

    /// Requeue with a delay. Implementations without native delay support
    /// fall back to an immediate requeue.
    async fn defer(&self, handle: &str, _delay_secs: u32) -> Result<()> {
        self.nack(handle, true).await
    }

    async fn is_healthy(&self) -> bool;

    async fn stop(&self) -> Result<()>;
}

#[async_trait]
pub trait AlarmPublisher: Send + Sync {
    /// Publishes a raw payload to the named queue. Used both for the
    /// malformed-message dead-letter path and for DLQ reprocessor replay.
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()>;
}
