//! Publish/subscribe abstraction used to talk to discovery repositories

pub mod local;
pub mod scatter_gather;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::DiscoveryError;
use crate::mqtt::topics::Topics;

/// Message received from the bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    /// Parse payload as JSON
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, DiscoveryError> {
        serde_json::from_slice(&self.payload).map_err(|e| {
            DiscoveryError::MessagingError(format!("Undecodable message on {}: {}", self.topic, e))
        })
    }
}

pub type SubscriptionId = u64;

/// Receiving end of one subscription; dropped senders end the stream
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    topic_filter: String,
    receiver: mpsc::UnboundedReceiver<BusMessage>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic_filter(&self) -> &str {
        &self.topic_filter
    }

    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }
}

/// Topic based publish/subscribe bus
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), DiscoveryError>;

    /// Subscribes to a topic filter; MQTT wildcards `+` and `#` are supported
    async fn subscribe(&self, topic_filter: &str) -> Result<Subscription, DiscoveryError>;

    async fn unsubscribe(
        &self,
        topic_filter: &str,
        subscription_id: SubscriptionId,
    ) -> Result<(), DiscoveryError>;
}

/// Serializes a value and publishes it
pub async fn publish_json<T: Serialize + ?Sized>(
    bus: &dyn PubSub,
    topic: &str,
    value: &T,
) -> Result<(), DiscoveryError> {
    let payload = serde_json::to_vec(value)?;
    bus.publish(topic, payload).await
}

struct RegistryEntry {
    id: SubscriptionId,
    topic_filter: String,
    sender: mpsc::UnboundedSender<BusMessage>,
}

/// Fan-out table shared by bus implementations
#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    entries: Mutex<Vec<RegistryEntry>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber; the flag is true for the first subscriber of the filter
    pub fn register(&self, topic_filter: &str) -> Result<(Subscription, bool), DiscoveryError> {
        if !Topics::is_valid_filter(topic_filter) {
            return Err(DiscoveryError::invalid_argument(format!(
                "invalid topic filter '{}'",
                topic_filter
            )));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut entries = self.lock()?;
        let first = !entries.iter().any(|e| e.topic_filter == topic_filter);
        entries.push(RegistryEntry {
            id,
            topic_filter: topic_filter.to_string(),
            sender,
        });

        let subscription = Subscription {
            id,
            topic_filter: topic_filter.to_string(),
            receiver,
        };
        Ok((subscription, first))
    }

    /// Removes a subscriber; the flag is true when no subscriber of the filter remains
    pub fn remove(&self, topic_filter: &str, id: SubscriptionId) -> Result<bool, DiscoveryError> {
        let mut entries = self.lock()?;
        entries.retain(|e| !(e.id == id && e.topic_filter == topic_filter));
        Ok(!entries.iter().any(|e| e.topic_filter == topic_filter))
    }

    /// Delivers a message to every matching subscriber and returns the number of receivers
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        entries.retain(|e| !e.sender.is_closed());

        let mut delivered = 0;
        for entry in entries.iter() {
            if Topics::matches(topic, &entry.topic_filter) {
                let message = BusMessage {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                };
                if entry.sender.send(message).is_ok() {
                    delivered += 1;
                }
            }
        }
        debug!("Dispatched message on {} to {} subscribers", topic, delivered);
        delivered
    }

    /// Distinct filters with at least one subscriber
    pub fn filters(&self) -> Vec<String> {
        let Ok(entries) = self.entries.lock() else {
            return Vec::new();
        };
        let mut filters: Vec<String> = entries.iter().map(|e| e.topic_filter.clone()).collect();
        filters.sort();
        filters.dedup();
        filters
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<RegistryEntry>>, DiscoveryError> {
        self.entries
            .lock()
            .map_err(|_| DiscoveryError::Internal("subscriber registry poisoned".to_string()))
    }
}
