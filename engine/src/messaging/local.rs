//! In-process bus

use async_trait::async_trait;
use tracing::debug;

use crate::errors::DiscoveryError;
use crate::messaging::{PubSub, SubscriberRegistry, Subscription, SubscriptionId};

/// Loopback bus delivering published messages to local subscribers only
#[derive(Default)]
pub struct LocalBus {
    registry: SubscriberRegistry,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribed_filters(&self) -> Vec<String> {
        self.registry.filters()
    }
}

#[async_trait]
impl PubSub for LocalBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), DiscoveryError> {
        if topic.is_empty() || topic.contains(['+', '#']) {
            return Err(DiscoveryError::invalid_argument(format!(
                "cannot publish on '{}'",
                topic
            )));
        }
        let delivered = self.registry.dispatch(topic, &payload);
        debug!("Local publish on {} reached {} subscribers", topic, delivered);
        Ok(())
    }

    async fn subscribe(&self, topic_filter: &str) -> Result<Subscription, DiscoveryError> {
        let (subscription, _) = self.registry.register(topic_filter)?;
        Ok(subscription)
    }

    async fn unsubscribe(
        &self,
        topic_filter: &str,
        subscription_id: SubscriptionId,
    ) -> Result<(), DiscoveryError> {
        self.registry.remove(topic_filter, subscription_id)?;
        Ok(())
    }
}
