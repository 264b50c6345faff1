//! Event consumers.
//!
//! Consumers subscribe with durable groups and acknowledge after successful
//! processing. Malformed payloads are logged and acked so they never loop as
//! poison pills; processing errors are redelivered up to the delivery bound,
//! after which the message is routed to the dead-letter subject.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;

use wallpaperdb_core::config::ConsumerConfig;
use wallpaperdb_core::events::{
    WallpaperPayload, WallpaperUploadedEvent, EVENT_TYPE_WALLPAPER_UPLOADED,
};
use wallpaperdb_core::AppError;

use crate::traits::{Delivery, EventBus};

/// A downstream materializer of wallpaper events.
///
/// Handlers must be idempotent: at-least-once delivery means the same event
/// id can arrive more than once.
#[async_trait]
pub trait EventConsumer: Send + Sync {
    /// Durable consumer group name.
    fn group(&self) -> &str;

    async fn handle(&self, event: WallpaperUploadedEvent) -> Result<(), AppError>;
}

/// Drives one consumer against the bus until shutdown.
pub struct ConsumerRunner {
    bus: Arc<dyn EventBus>,
    consumer: Arc<dyn EventConsumer>,
    max_deliveries: u32,
    dead_letter_subject: String,
}

impl ConsumerRunner {
    pub fn new(
        bus: Arc<dyn EventBus>,
        consumer: Arc<dyn EventConsumer>,
        config: &ConsumerConfig,
    ) -> Self {
        Self {
            bus,
            consumer,
            max_deliveries: config.max_deliveries,
            dead_letter_subject: config.dead_letter_subject.clone(),
        }
    }

    /// Subscribe and process deliveries until the shutdown signal flips.
    /// The in-flight delivery finishes; the next one is not awaited.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), AppError> {
        let group = self.consumer.group().to_string();
        let mut subscription = self.bus.subscribe(&group).await?;
        tracing::info!(group = %group, "Consumer subscribed");

        loop {
            let delivery = tokio::select! {
                next = subscription.next() => next?,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            let Some(delivery) = delivery else {
                tracing::info!(group = %group, "Subscription closed");
                break;
            };

            self.process(&group, delivery).await;
        }

        tracing::info!(group = %group, "Consumer stopped");
        Ok(())
    }

    async fn process(&self, group: &str, delivery: Delivery) {
        let event = match WallpaperUploadedEvent::parse(&delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                // Malformed payloads are acked: redelivering them can never
                // succeed and would loop forever.
                tracing::warn!(
                    group = %group,
                    subject = %delivery.subject,
                    error = %e,
                    "Malformed event payload, acknowledging"
                );
                if let Err(ack_err) = delivery.ack().await {
                    tracing::warn!(group = %group, error = %ack_err, "Ack failed");
                }
                return;
            }
        };

        if event.event_type != EVENT_TYPE_WALLPAPER_UPLOADED {
            tracing::debug!(
                group = %group,
                event_type = %event.event_type,
                "Skipping unknown event type"
            );
            if let Err(ack_err) = delivery.ack().await {
                tracing::warn!(group = %group, error = %ack_err, "Ack failed");
            }
            return;
        }

        let event_id = event.event_id.clone();
        match self.consumer.handle(event).await {
            Ok(()) => {
                if let Err(ack_err) = delivery.ack().await {
                    tracing::warn!(group = %group, event_id = %event_id, error = %ack_err, "Ack failed");
                }
            }
            Err(e) if delivery.attempt >= self.max_deliveries => {
                tracing::error!(
                    group = %group,
                    event_id = %event_id,
                    attempt = delivery.attempt,
                    error = %e,
                    "Delivery bound exhausted, routing to dead letter"
                );
                let payload = delivery.payload.clone();
                let headers = delivery.headers.clone();
                if let Err(dlq_err) = self
                    .bus
                    .publish(&self.dead_letter_subject, payload, &headers)
                    .await
                {
                    tracing::error!(group = %group, event_id = %event_id, error = %dlq_err, "Dead-letter publish failed");
                }
                if let Err(ack_err) = delivery.ack().await {
                    tracing::warn!(group = %group, event_id = %event_id, error = %ack_err, "Ack failed");
                }
            }
            Err(e) => {
                tracing::warn!(
                    group = %group,
                    event_id = %event_id,
                    attempt = delivery.attempt,
                    error = %e,
                    "Processing failed, requesting redelivery"
                );
                if let Err(nak_err) = delivery.nak().await {
                    tracing::warn!(group = %group, event_id = %event_id, error = %nak_err, "Nak failed");
                }
            }
        }
    }
}

/// Read-model consumer: materializes uploads into an id-keyed map.
///
/// The upsert is keyed by wallpaper id, which is what makes redelivery safe.
/// Serves as the reference consumer and closes the loop for the integration
/// suite.
#[derive(Default)]
pub struct ReadModelConsumer {
    rows: Mutex<HashMap<String, WallpaperPayload>>,
}

impl ReadModelConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, wallpaper_id: &str) -> Option<WallpaperPayload> {
        self.rows
            .lock()
            .expect("read model poisoned")
            .get(wallpaper_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().expect("read model poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventConsumer for ReadModelConsumer {
    fn group(&self) -> &str {
        "wallpaper-read-model"
    }

    async fn handle(&self, event: WallpaperUploadedEvent) -> Result<(), AppError> {
        let mut rows = self.rows.lock().expect("read model poisoned");
        rows.insert(event.wallpaper.id.clone(), event.wallpaper);
        Ok(())
    }
}
