//! Scatter-gather requests: publish to several request topics and collect replies

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::DiscoveryError;
use crate::messaging::{BusMessage, PubSub};
use crate::models::topic::{MAX_TIMEOUT_MS, MIN_TIMEOUT_MS};

/// Decides whether a message on a reply topic belongs to the request
pub type ReplyPredicate = Arc<dyn Fn(&BusMessage) -> bool + Send + Sync>;

/// One request topic and the reply collection window for it
#[derive(Debug, Clone)]
pub struct RequestStage {
    request_topic: String,
    reply_topic: String,
    payload: Vec<u8>,
    timeout: Duration,
    expected_replies: usize,
}

impl RequestStage {
    /// Stage with the maximum timeout and no reply quota
    pub fn new(
        request_topic: impl Into<String>,
        reply_topic: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<Self, DiscoveryError> {
        let request_topic = request_topic.into();
        let reply_topic = reply_topic.into();
        if request_topic.is_empty() || reply_topic.is_empty() {
            return Err(DiscoveryError::invalid_argument(
                "request and reply topics must not be empty",
            ));
        }
        Ok(Self {
            request_topic,
            reply_topic,
            payload,
            timeout: Duration::from_millis(MAX_TIMEOUT_MS),
            expected_replies: usize::MAX,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, DiscoveryError> {
        let millis = timeout.as_millis();
        if millis < MIN_TIMEOUT_MS as u128 || millis > MAX_TIMEOUT_MS as u128 {
            return Err(DiscoveryError::invalid_argument(format!(
                "timeout {:?} is outside {}..={} ms",
                timeout, MIN_TIMEOUT_MS, MAX_TIMEOUT_MS
            )));
        }
        self.timeout = timeout;
        Ok(self)
    }

    /// Stop collecting as soon as this many replies arrived
    pub fn with_expected_replies(mut self, expected_replies: usize) -> Result<Self, DiscoveryError> {
        if expected_replies == 0 {
            return Err(DiscoveryError::invalid_argument(
                "at least one reply must be expected",
            ));
        }
        self.expected_replies = expected_replies;
        Ok(self)
    }

    pub fn request_topic(&self) -> &str {
        &self.request_topic
    }

    pub fn reply_topic(&self) -> &str {
        &self.reply_topic
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn expected_replies(&self) -> usize {
        self.expected_replies
    }
}

/// Request made of one or more stages executed concurrently
pub struct ScatterGatherRequest {
    stages: Vec<RequestStage>,
    predicate: Option<ReplyPredicate>,
}

impl ScatterGatherRequest {
    pub fn new(stages: Vec<RequestStage>) -> Result<Self, DiscoveryError> {
        if stages.is_empty() {
            return Err(DiscoveryError::invalid_argument(
                "a scatter-gather request needs at least one stage",
            ));
        }
        Ok(Self {
            stages,
            predicate: None,
        })
    }

    /// Only replies accepted by the predicate are collected and counted
    pub fn with_predicate(mut self, predicate: ReplyPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn stages(&self) -> &[RequestStage] {
        &self.stages
    }

    /// Runs all stages and concatenates their replies in stage order.
    ///
    /// A stage that fails on the bus contributes no replies. Fails only when
    /// every stage failed.
    pub async fn execute(&self, bus: &dyn PubSub) -> Result<Vec<BusMessage>, DiscoveryError> {
        let futures = self
            .stages
            .iter()
            .map(|stage| run_stage(bus, stage, self.predicate.as_ref()));

        let mut replies = Vec::new();
        let mut last_error = None;
        let mut succeeded = 0;
        for (stage, result) in self.stages.iter().zip(join_all(futures).await) {
            match result {
                Ok(stage_replies) => {
                    succeeded += 1;
                    replies.extend(stage_replies);
                }
                Err(e) => {
                    warn!("Request stage on {} failed: {}", stage.request_topic, e);
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if succeeded == 0 => Err(e),
            _ => Ok(replies),
        }
    }

    /// Like [`execute`](Self::execute) but decodes replies, skipping undecodable ones
    pub async fn execute_json<R: DeserializeOwned>(
        &self,
        bus: &dyn PubSub,
    ) -> Result<Vec<R>, DiscoveryError> {
        Ok(self
            .execute(bus)
            .await?
            .into_iter()
            .filter_map(|msg| match msg.parse_json::<R>() {
                Ok(reply) => Some(reply),
                Err(e) => {
                    warn!("Dropping reply: {}", e);
                    None
                }
            })
            .collect())
    }
}

async fn run_stage(
    bus: &dyn PubSub,
    stage: &RequestStage,
    predicate: Option<&ReplyPredicate>,
) -> Result<Vec<BusMessage>, DiscoveryError> {
    let mut subscription = bus.subscribe(&stage.reply_topic).await?;
    let deadline = Instant::now() + stage.timeout;

    let collected = async {
        bus.publish(&stage.request_topic, stage.payload.clone()).await?;
        debug!(
            "Published request on {}, awaiting up to {} replies on {} for {:?}",
            stage.request_topic,
            if stage.expected_replies == usize::MAX {
                "unbounded".to_string()
            } else {
                stage.expected_replies.to_string()
            },
            stage.reply_topic,
            stage.timeout
        );

        let mut replies = Vec::new();
        while replies.len() < stage.expected_replies {
            match tokio::time::timeout_at(deadline, subscription.recv()).await {
                Ok(Some(message)) => {
                    if predicate.map_or(true, |accept| accept(&message)) {
                        replies.push(message);
                    }
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }
        Ok::<_, DiscoveryError>(replies)
    }
    .await;

    if let Err(e) = bus
        .unsubscribe(subscription.topic_filter(), subscription.id())
        .await
    {
        warn!("Failed to unsubscribe from {}: {}", stage.reply_topic, e);
    }

    let replies = collected?;
    debug!("Request stage on {} collected {} replies", stage.request_topic, replies.len());
    Ok(replies)
}
