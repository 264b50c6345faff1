//! Event bus abstraction.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use wallpaperdb_core::AppError;

/// Event bus operation errors
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Ack failed: {0}")]
    AckFailed(String),

    #[error("Stream configuration error: {0}")]
    ConfigError(String),
}

impl From<BusError> for AppError {
    fn from(err: BusError) -> Self {
        AppError::Bus(err.to_string())
    }
}

pub type BusResult<T> = Result<T, BusError>;

/// String headers carried with each message. The only header the pipeline
/// itself cares about is W3C `traceparent`; its absence is not an error.
pub type EventHeaders = HashMap<String, String>;

/// Acknowledgement handle for one delivery.
#[async_trait]
pub trait Acker: Send {
    async fn ack(self: Box<Self>) -> BusResult<()>;

    /// Negative-acknowledge: the message will be redelivered (up to the
    /// transport's delivery bound).
    async fn nak(self: Box<Self>) -> BusResult<()>;
}

/// One message handed to a subscriber.
pub struct Delivery {
    pub subject: String,
    pub payload: Bytes,
    pub headers: EventHeaders,
    /// 1-based delivery attempt for this message.
    pub attempt: u32,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(
        subject: String,
        payload: Bytes,
        headers: EventHeaders,
        attempt: u32,
        acker: Box<dyn Acker>,
    ) -> Self {
        Self {
            subject,
            payload,
            headers,
            attempt,
            acker,
        }
    }

    pub async fn ack(self) -> BusResult<()> {
        self.acker.ack().await
    }

    pub async fn nak(self) -> BusResult<()> {
        self.acker.nak().await
    }
}

/// Durable message stream with at-least-once delivery.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish and wait for the stream to confirm persistence.
    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        headers: &EventHeaders,
    ) -> BusResult<()>;

    /// Open a durable subscription identified by consumer group name.
    /// Reconnecting with the same name resumes where the group left off.
    async fn subscribe(&self, group: &str) -> BusResult<Box<dyn EventSubscription>>;
}

/// Pull side of a durable subscription.
#[async_trait]
pub trait EventSubscription: Send {
    /// Next delivery, or `None` once the subscription is closed.
    async fn next(&mut self) -> BusResult<Option<Delivery>>;
}
