//! Bus consumer loop: pulls from [`AlarmConsumer`], runs each message
//! through the [`Processor`], and acks/nacks based on the outcome.
//!
//! While the system is paused, messages are nacked with requeue so they sit
//! on the bus rather than being dropped or piling up as dead letters.

use crate::processor::Processor;
use crate::state::StateManager;
use alarm_queue::AlarmConsumer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct ConsumerLoopConfig {
    pub max_delivery_attempts: u32,
    pub paused_requeue_delay_secs: u32,
}

pub struct ConsumerLoop {
    consumer: Arc<dyn AlarmConsumer>,
    processor: Arc<Processor>,
    state: Arc<StateManager>,
    config: ConsumerLoopConfig,
    running: AtomicBool,
}

impl ConsumerLoop {
    pub fn new(consumer: Arc<dyn AlarmConsumer>, processor: Arc<Processor>, state: Arc<StateManager>, config: ConsumerLoopConfig) -> Self {
        Self { consumer, processor, state, config, running: AtomicBool::new(true) }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub async fn run(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            let received = match self.consumer.poll().await {
                Ok(Some(r)) => r,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "consumer poll failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if self.state.is_paused() {
                if let Err(e) = self.consumer.defer(&received.handle, self.config.paused_requeue_delay_secs).await {
                    tracing::error!(error = %e, "failed to defer message while paused");
                }
                continue;
            }

            match self.processor.process(&received.message).await {
                Ok(result) => {
                    tracing::debug!(alarm_id = result.alarm_id, outcomes = ?result.per_channel, "alarm processed");
                    if let Err(e) = self.consumer.ack(&received.handle).await {
                        tracing::error!(error = %e, "failed to ack processed message");
                    }
                }
                Err(e) => {
                    tracing::error!(alarm_id = received.message.alarm_id, error = %e, "alarm processing failed");
                    if received.delivery_attempt + 1 >= self.config.max_delivery_attempts {
                        tracing::warn!(alarm_id = received.message.alarm_id, "exceeded max delivery attempts, dropping without requeue");
                        if let Err(e) = self.consumer.nack(&received.handle, false).await {
                            tracing::error!(error = %e, "failed to nack exhausted message");
                        }
                    } else if let Err(e) = self.consumer.nack(&received.handle, true).await {
                        tracing::error!(error = %e, "failed to nack message for retry");
                    }
                }
            }
        }
    }
}
