//! In-memory event bus for tests.
//!
//! Records every published envelope for assertions and feeds live
//! subscriptions through unbounded channels. Nak re-queues a delivery with
//! a bumped attempt counter up to the configured delivery bound, mirroring
//! JetStream redelivery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::traits::{
    Acker, BusError, BusResult, Delivery, EventBus, EventHeaders, EventSubscription,
};

#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub subject: String,
    pub payload: Bytes,
    pub headers: EventHeaders,
}

#[derive(Clone)]
struct QueuedDelivery {
    subject: String,
    payload: Bytes,
    headers: EventHeaders,
    attempt: u32,
}

pub struct MemoryEventBus {
    published: Mutex<Vec<PublishedEvent>>,
    groups: Mutex<HashMap<String, mpsc::UnboundedSender<QueuedDelivery>>>,
    max_deliveries: u32,
    fail_publish: AtomicBool,
}

impl MemoryEventBus {
    pub fn new(max_deliveries: u32) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            groups: Mutex::new(HashMap::new()),
            max_deliveries,
            fail_publish: AtomicBool::new(false),
        }
    }

    /// Make every publish fail, simulating a bus outage.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Everything ever published, in order.
    pub fn published(&self) -> Vec<PublishedEvent> {
        self.published.lock().expect("bus poisoned").clone()
    }

    /// Number of events published on `subject`.
    pub fn published_on(&self, subject: &str) -> usize {
        self.published
            .lock()
            .expect("bus poisoned")
            .iter()
            .filter(|event| event.subject == subject)
            .count()
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        headers: &EventHeaders,
    ) -> BusResult<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BusError::PublishFailed("simulated outage".to_string()));
        }

        self.published
            .lock()
            .expect("bus poisoned")
            .push(PublishedEvent {
                subject: subject.to_string(),
                payload: payload.clone(),
                headers: headers.clone(),
            });

        let mut groups = self.groups.lock().expect("bus poisoned");
        groups.retain(|_, sender| {
            sender
                .send(QueuedDelivery {
                    subject: subject.to_string(),
                    payload: payload.clone(),
                    headers: headers.clone(),
                    attempt: 1,
                })
                .is_ok()
        });

        Ok(())
    }

    async fn subscribe(&self, group: &str) -> BusResult<Box<dyn EventSubscription>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.groups
            .lock()
            .expect("bus poisoned")
            .insert(group.to_string(), sender.clone());
        Ok(Box::new(MemorySubscription {
            receiver,
            redelivery: sender,
            max_deliveries: self.max_deliveries,
        }))
    }
}

struct MemorySubscription {
    receiver: mpsc::UnboundedReceiver<QueuedDelivery>,
    redelivery: mpsc::UnboundedSender<QueuedDelivery>,
    max_deliveries: u32,
}

#[async_trait]
impl EventSubscription for MemorySubscription {
    async fn next(&mut self) -> BusResult<Option<Delivery>> {
        match self.receiver.recv().await {
            None => Ok(None),
            Some(queued) => {
                let acker = MemoryAcker {
                    redelivery: if queued.attempt < self.max_deliveries {
                        Some((self.redelivery.clone(), queued.clone()))
                    } else {
                        None
                    },
                };
                Ok(Some(Delivery::new(
                    queued.subject,
                    queued.payload,
                    queued.headers,
                    queued.attempt,
                    Box::new(acker),
                )))
            }
        }
    }
}

struct MemoryAcker {
    redelivery: Option<(mpsc::UnboundedSender<QueuedDelivery>, QueuedDelivery)>,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(self: Box<Self>) -> BusResult<()> {
        Ok(())
    }

    async fn nak(self: Box<Self>) -> BusResult<()> {
        if let Some((sender, mut queued)) = self.redelivery {
            queued.attempt += 1;
            // receiver may already be gone during shutdown
            let _ = sender.send(queued);
        }
        Ok(())
    }
}
