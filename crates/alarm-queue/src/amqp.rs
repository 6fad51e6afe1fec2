//! AMQP (RabbitMQ-compatible) bus implementation, built on `lapin`.

use crate::error::{QueueError, Result};
use crate::{AlarmConsumer, AlarmPublisher, ReceivedAlarm};
use alarm_common::AlarmMessage;
use async_trait::async_trait;
use dashmap::DashMap;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    BasicRejectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use futures::StreamExt;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

const HEADER_ATTEMPT: &str = "x-alarm-attempt";

#[derive(Debug, Clone)]
pub struct AmqpConfig {
    pub uri: String,
    pub queue_name: String,
    pub consumer_tag: String,
    pub prefetch_count: u16,
    pub durable: bool,
    pub reconnect_backoff_base_secs: u64,
    pub reconnect_backoff_cap_secs: u64,
}

impl Default for AmqpConfig {
    fn default() -> Self {
        Self {
            uri: "amqp://127.0.0.1:5672/%2f".to_string(),
            queue_name: "alarms".to_string(),
            consumer_tag: format!("alarm-worker-{}", Uuid::new_v4()),
            prefetch_count: 10,
            durable: true,
            reconnect_backoff_base_secs: 1,
            reconnect_backoff_cap_secs: 30,
        }
    }
}

struct Connected {
    _connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

/// Durable-queue AMQP consumer with manual ack/nack and jittered exponential
/// backoff reconnect. Delivery tags are mapped to string handles so callers
/// never see lapin types.
pub struct AmqpConsumer {
    config: AmqpConfig,
    inner: RwLock<Option<Connected>>,
    handles: DashMap<String, u64>,
    reconnect_attempts: AtomicU64,
}

impl AmqpConsumer {
    pub fn new(config: AmqpConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(None),
            handles: DashMap::new(),
            reconnect_attempts: AtomicU64::new(0),
        }
    }

    async fn connect(&self) -> Result<()> {
        let connection =
            Connection::connect(&self.config.uri, ConnectionProperties::default())
                .await
                .map_err(|e| QueueError::Connection(e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        channel
            .basic_qos(self.config.prefetch_count, lapin::options::BasicQosOptions::default())
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        channel
            .queue_declare(
                &self.config.queue_name,
                QueueDeclareOptions {
                    durable: self.config.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        let consumer = channel
            .basic_consume(
                &self.config.queue_name,
                &self.config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        *self.inner.write().await = Some(Connected {
            _connection: connection,
            channel,
            consumer,
        });
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn reconnect_with_backoff(&self) {
        let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
        let base = self.config.reconnect_backoff_base_secs;
        let cap = self.config.reconnect_backoff_cap_secs;
        let exp = base.saturating_mul(1u64 << attempt.min(10)).min(cap);
        let jitter: u64 = rand::random::<u64>() % (exp.max(1) * 1000);
        let delay = Duration::from_millis(exp * 1000 / 2 + jitter);

        tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting to AMQP broker");
        tokio::time::sleep(delay).await;

        if let Err(e) = self.connect().await {
            tracing::error!(error = %e, "AMQP reconnect attempt failed");
        }
    }

    fn generate_handle(&self, delivery_tag: u64) -> String {
        let handle = Uuid::new_v4().to_string();
        self.handles.insert(handle.clone(), delivery_tag);
        handle
    }

    fn take_delivery_tag(&self, handle: &str) -> Result<u64> {
        self.handles
            .remove(handle)
            .map(|(_, tag)| tag)
            .ok_or_else(|| QueueError::UnknownHandle(handle.to_string()))
    }
}

#[async_trait]
impl AlarmConsumer for AmqpConsumer {
    fn identifier(&self) -> &str {
        &self.config.consumer_tag
    }

    async fn poll(&self) -> Result<Option<ReceivedAlarm>> {
        {
            let guard = self.inner.read().await;
            if guard.is_none() {
                drop(guard);
                self.connect().await?;
            }
        }

        let delivery = {
            let mut guard = self.inner.write().await;
            let Some(connected) = guard.as_mut() else {
                return Ok(None);
            };
            match tokio::time::timeout(Duration::from_millis(100), connected.consumer.next()).await {
                Ok(Some(Ok(delivery))) => Some(delivery),
                Ok(Some(Err(e))) => {
                    tracing::error!(error = %e, "AMQP delivery error");
                    *guard = None;
                    drop(guard);
                    self.reconnect_with_backoff().await;
                    return Ok(None);
                }
                Ok(None) => {
                    *guard = None;
                    drop(guard);
                    self.reconnect_with_backoff().await;
                    return Ok(None);
                }
                Err(_timeout) => None,
            }
        };

        let Some(delivery) = delivery else {
            return Ok(None);
        };

        let attempt = delivery
            .properties
            .headers()
            .as_ref()
            .and_then(|h| h.inner().get(HEADER_ATTEMPT))
            .and_then(|v| v.as_long_long_int())
            .unwrap_or(0) as u32;

        let raw = delivery.data.clone();
        let handle = self.generate_handle(delivery.delivery_tag);

        match serde_json::from_slice::<AlarmMessage>(&raw) {
            Ok(message) => Ok(Some(ReceivedAlarm {
                handle,
                message,
                raw,
                delivery_attempt: attempt,
            })),
            Err(e) => {
                tracing::warn!(error = %e, "malformed alarm payload, rejecting without requeue");
                let tag = self.take_delivery_tag(&handle)?;
                let guard = self.inner.read().await;
                if let Some(connected) = guard.as_ref() {
                    connected
                        .channel
                        .basic_reject(tag, BasicRejectOptions { requeue: false })
                        .await
                        .map_err(|e| QueueError::Ack(e.to_string()))?;
                }
                Ok(None)
            }
        }
    }

    async fn ack(&self, handle: &str) -> Result<()> {
        let tag = self.take_delivery_tag(handle)?;
        let guard = self.inner.read().await;
        let connected = guard.as_ref().ok_or_else(|| QueueError::Connection("not connected".into()))?;
        connected
            .channel
            .basic_ack(tag, BasicAckOptions::default())
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))
    }

    async fn nack(&self, handle: &str, requeue: bool) -> Result<()> {
        let tag = self.take_delivery_tag(handle)?;
        let guard = self.inner.read().await;
        let connected = guard.as_ref().ok_or_else(|| QueueError::Connection("not connected".into()))?;
        connected
            .channel
            .basic_nack(tag, BasicNackOptions { requeue, multiple: false })
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))
    }

    async fn is_healthy(&self) -> bool {
        let guard = self.inner.read().await;
        matches!(&*guard, Some(c) if c.channel.status().connected())
    }

    async fn stop(&self) -> Result<()> {
        let mut guard = self.inner.write().await;
        if let Some(connected) = guard.take() {
            connected
                .channel
                .close(200, "worker shutdown")
                .await
                .map_err(|e| QueueError::Connection(e.to_string()))?;
        }
        Ok(())
    }
}

/// Thin publisher used for the malformed-message DLQ route and for the
/// reprocessor's replay path.
pub struct AmqpPublisher {
    channel: Channel,
}

impl AmqpPublisher {
    pub async fn connect(uri: &str) -> Result<Self> {
        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        Ok(Self { channel })
    }
}

#[async_trait]
impl AlarmPublisher for AmqpPublisher {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        self.channel
            .queue_declare(queue, QueueDeclareOptions { durable: true, ..Default::default() }, FieldTable::default())
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;

        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AmqpConfig::default();
        assert_eq!(config.prefetch_count, 10);
        assert!(config.durable);
    }
}
