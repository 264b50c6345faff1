//! NATS JetStream event bus.
//!
//! The stream (default `WALLPAPER`, subjects `wallpaper.>`) is created on
//! connect if it does not exist. Subscriptions are durable pull consumers
//! with explicit acks; `max_deliver` bounds redelivery so a poison message
//! eventually stops coming back.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use async_nats::jetstream::consumer::{pull, AckPolicy};
use async_nats::jetstream::{self, AckKind};
use async_nats::HeaderMap;

use wallpaperdb_core::config::NatsConfig;
use wallpaperdb_core::events::{HEADER_TRACEPARENT, SUBJECT_WALLPAPER_ALL};
use wallpaperdb_core::{AppError, Lifecycle};

use crate::traits::{
    Acker, BusError, BusResult, Delivery, EventBus, EventHeaders, EventSubscription,
};

pub struct NatsEventBus {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    stream_name: String,
    max_deliveries: u32,
}

impl NatsEventBus {
    /// Connect and ensure the stream exists.
    pub async fn connect(config: &NatsConfig, max_deliveries: u32) -> BusResult<Self> {
        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| BusError::ConnectFailed(e.to_string()))?;
        let jetstream = jetstream::new(client.clone());

        jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: config.stream.clone(),
                subjects: vec![SUBJECT_WALLPAPER_ALL.to_string().into()],
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::ConfigError(e.to_string()))?;

        tracing::info!(
            url = %config.url,
            stream = %config.stream,
            "Connected to NATS JetStream"
        );

        Ok(Self {
            client,
            jetstream,
            stream_name: config.stream.clone(),
            max_deliveries,
        })
    }
}

#[async_trait]
impl EventBus for NatsEventBus {
    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        headers: &EventHeaders,
    ) -> BusResult<()> {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            header_map.insert(name.as_str(), value.as_str());
        }

        // The returned future resolves once the stream has persisted the
        // message; publish is not confirmed before that.
        self.jetstream
            .publish_with_headers(subject.to_string(), header_map, payload)
            .await
            .map_err(|e| BusError::PublishFailed(e.to_string()))?
            .await
            .map_err(|e| BusError::PublishFailed(e.to_string()))?;

        tracing::debug!(subject = %subject, "Event published");
        Ok(())
    }

    async fn subscribe(&self, group: &str) -> BusResult<Box<dyn EventSubscription>> {
        let stream = self
            .jetstream
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| BusError::SubscribeFailed(e.to_string()))?;

        let consumer = stream
            .get_or_create_consumer(
                group,
                pull::Config {
                    durable_name: Some(group.to_string()),
                    ack_policy: AckPolicy::Explicit,
                    max_deliver: self.max_deliveries as i64,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BusError::SubscribeFailed(e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| BusError::SubscribeFailed(e.to_string()))?;

        Ok(Box::new(NatsSubscription { messages }))
    }
}

struct NatsSubscription {
    messages: pull::Stream,
}

#[async_trait]
impl EventSubscription for NatsSubscription {
    async fn next(&mut self) -> BusResult<Option<Delivery>> {
        match self.messages.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(BusError::SubscribeFailed(e.to_string())),
            Some(Ok(message)) => {
                let attempt = message
                    .info()
                    .map(|info| info.delivered as u32)
                    .unwrap_or(1);

                let mut headers = EventHeaders::new();
                if let Some(value) = message
                    .headers
                    .as_ref()
                    .and_then(|h| h.get(HEADER_TRACEPARENT))
                {
                    headers.insert(HEADER_TRACEPARENT.to_string(), value.as_str().to_string());
                }

                let subject = message.subject.to_string();
                let payload = message.payload.clone();

                Ok(Some(Delivery::new(
                    subject,
                    payload,
                    headers,
                    attempt,
                    Box::new(NatsAcker { message }),
                )))
            }
        }
    }
}

struct NatsAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acker for NatsAcker {
    async fn ack(self: Box<Self>) -> BusResult<()> {
        self.message
            .ack()
            .await
            .map_err(|e| BusError::AckFailed(e.to_string()))
    }

    async fn nak(self: Box<Self>) -> BusResult<()> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| BusError::AckFailed(e.to_string()))
    }
}

#[async_trait]
impl Lifecycle for NatsEventBus {
    fn name(&self) -> &'static str {
        "event-bus"
    }

    async fn health(&self) -> Result<(), AppError> {
        self.client
            .flush()
            .await
            .map_err(|e| AppError::Bus(e.to_string()))
    }

    async fn close(&self) -> Result<(), AppError> {
        self.client
            .flush()
            .await
            .map_err(|e| AppError::Bus(e.to_string()))
    }
}
